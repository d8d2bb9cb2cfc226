use crate::field::ChemoField;
use crate::growth::GrowthModel;
use anyhow::Result;
use log::info;
use migration_common::Snapshot;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Agent counts in equal-width bins along the physical domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityHistogram {
    pub domain_length: f64,
    pub counts: Vec<u32>,
}

impl DensityHistogram {
    /// Splits `[0, domain_length]` into `floor(domain_length / nominal_width)`
    /// equal bins and counts the `xs` strictly inside each one.
    pub fn from_positions(xs: &[f64], domain_length: f64, nominal_width: f64) -> Self {
        let bins = if nominal_width > 0.0 && domain_length > 0.0 {
            (domain_length / nominal_width).floor() as usize
        } else {
            0
        };
        let mut counts = vec![0u32; bins];
        if bins > 0 {
            let width = domain_length / bins as f64;
            for &x in xs {
                if !(x > 0.0 && x < domain_length) {
                    continue;
                }
                let bin = ((x / width) as usize).min(bins - 1);
                // Points on a bin edge belong to neither neighbour.
                if x > bin as f64 * width && x < (bin + 1) as f64 * width {
                    counts[bin] += 1;
                }
            }
        }
        Self { domain_length, counts }
    }

    pub fn bin_width(&self) -> f64 {
        if self.counts.is_empty() {
            0.0
        } else {
            self.domain_length / self.counts.len() as f64
        }
    }

    /// Adds another replica's counts bin by bin, growing to the longer of the two.
    pub fn accumulate(&mut self, other: &DensityHistogram) {
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0);
            self.domain_length = other.domain_length;
        }
        for (total, &count) in self.counts.iter_mut().zip(&other.counts) {
            *total += count;
        }
    }
}

/// File name of the chemoattractant dump of `step`.
pub fn chemo_csv_path(base: &str, seed: u64, step: u32) -> PathBuf {
    PathBuf::from(format!("{}_seed{}_chemo_{:06}.csv", base, seed, step))
}

pub fn density_csv_path(base: &str) -> PathBuf {
    PathBuf::from(format!("{}_density_along_domain.csv", base))
}

/// Writes the field under an `x, y, z, u` header, column by column, with x in physical units.
pub fn write_chemo_csv<W: Write>(writer: W, field: &ChemoField, growth: &GrowthModel) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["x", " y", " z", " u"])?;
    let (length_x, length_y) = field.dims();
    for i in 0..length_x {
        let x = growth.physical_x(i).to_string();
        for j in 0..length_y {
            let y = j.to_string();
            let u = field.get(i, j).to_string();
            csv_writer.write_record([x.as_str(), y.as_str(), "0", u.as_str()])?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_chemo_csv(path: &Path, field: &ChemoField, growth: &GrowthModel) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("Failed to create chemo file '{}': {}", path.display(), e))?;
    write_chemo_csv(BufWriter::new(file), field, growth)
}

/// Writes `bin,x_start,x_end,count` rows.
pub fn write_density_csv<W: Write>(writer: W, histogram: &DensityHistogram) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["bin", "x_start", "x_end", "count"])?;
    let width = histogram.bin_width();
    for (bin, count) in histogram.counts.iter().enumerate() {
        csv_writer.write_record([
            bin.to_string(),
            format!("{:.4}", bin as f64 * width),
            format!("{:.4}", (bin + 1) as f64 * width),
            count.to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_density_csv(path: &Path, histogram: &DensityHistogram) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("Failed to create density file '{}': {}", path.display(), e))?;
    write_density_csv(BufWriter::new(file), histogram)?;
    info!("Density profile saved to {}", path.display());
    Ok(())
}

/// Snapshot encodings understood by the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Bincode,
    MessagePack,
}

impl SnapshotFormat {
    /// Parses the configured format name; `None` means JSON.
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name.unwrap_or("json") {
            "json" => Ok(SnapshotFormat::Json),
            "bincode" => Ok(SnapshotFormat::Bincode),
            "messagepack" => Ok(SnapshotFormat::MessagePack),
            other => anyhow::bail!("Unknown output format: {}", other),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
            SnapshotFormat::Bincode => "bin",
            SnapshotFormat::MessagePack => "msgpack",
        }
    }
}

pub fn snapshots_path(base: &str, seed: u64, format: SnapshotFormat) -> PathBuf {
    PathBuf::from(format!("{}_seed{}_snapshots.{}", base, seed, format.extension()))
}

/// Serializes `snapshots` into `writer` in the given format.
pub fn write_snapshots<W: Write>(mut writer: W, snapshots: &[Snapshot], format: SnapshotFormat) -> Result<()> {
    match format {
        SnapshotFormat::Json => serde_json::to_writer(&mut writer, snapshots)?,
        SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, snapshots)?,
        SnapshotFormat::MessagePack => rmp_serde::encode::write(&mut writer, snapshots)?,
    }
    writer.flush()?;
    Ok(())
}

pub fn save_snapshots(path: &Path, snapshots: &[Snapshot], format: SnapshotFormat) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("Failed to create snapshot file '{}': {}", path.display(), e))?;
    write_snapshots(BufWriter::new(file), snapshots, format)?;
    info!("{} snapshots saved to {} ({:?} format)", snapshots.len(), path.display(), format);
    Ok(())
}
