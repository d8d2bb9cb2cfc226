use anyhow::Result;
use log::{debug, error, info, trace};
use migration_common::SimulationConfig;
use migration_engine::output::{
    chemo_csv_path, density_csv_path, save_chemo_csv, save_density_csv, save_snapshots, snapshots_path,
    DensityHistogram, SnapshotFormat,
};
use migration_engine::Simulation;
use rayon::prelude::*;
use std::time::Instant;

/// End-of-run results of one replica.
struct ReplicaSummary {
    seed: u64,
    agent_count: usize,
    chain_break_fraction: f64,
    histogram: DensityHistogram,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Migration Engine...");

    // --- Load Configuration ---
    let config = SimulationConfig::load_or_default("config.toml")?;
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let format = match SnapshotFormat::parse(config.output.format.as_deref()) {
        Ok(format) => format,
        Err(e) => {
            error!("{}. Using JSON instead.", e);
            SnapshotFormat::Json
        }
    };

    // --- Run Replicas ---
    let seeds: Vec<u64> = (0..config.sweep.replicas as u64)
        .map(|r| config.sweep.first_seed.wrapping_add(r))
        .collect();
    info!("Running {} replica(s), seeds {:?}.", seeds.len(), seeds);
    let start_time = Instant::now();

    let summaries = seeds
        .par_iter()
        .map(|&seed| run_replica(&config, seed, format))
        .collect::<Result<Vec<_>>>()?;

    let total_duration = start_time.elapsed();
    info!(
        "All replicas finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    // --- Aggregate Statistics ---
    let mut total = DensityHistogram {
        domain_length: 0.0,
        counts: Vec::new(),
    };
    for summary in &summaries {
        debug!(
            "Seed {}: {} agents, chain-break fraction {:.3}",
            summary.seed, summary.agent_count, summary.chain_break_fraction
        );
        total.accumulate(&summary.histogram);
    }
    if !summaries.is_empty() {
        let mean_break = summaries.iter().map(|s| s.chain_break_fraction).sum::<f64>() / summaries.len() as f64;
        info!("Mean chain-break fraction over {} replica(s): {:.4}", summaries.len(), mean_break);
    }

    let density_path = density_csv_path(&config.output.base_filename);
    if let Err(e) = save_density_csv(&density_path, &total) {
        error!("Error saving density profile '{}': {}", density_path.display(), e);
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Steps one replica to the final time, writing its periodic outputs.
fn run_replica(config: &SimulationConfig, seed: u64, format: SnapshotFormat) -> Result<ReplicaSummary> {
    let mut sim = Simulation::new(config.clone(), seed)?;
    let total_steps = sim.params().total_steps;
    let record_interval_steps = sim.params().snapshot_interval_steps;
    let base = config.output.base_filename.as_str();

    // --- Initial Snapshot (step 0) ---
    sim.record_snapshot()?;

    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    for _ in 0..total_steps {
        let step_start_time = Instant::now();
        let report = match sim.step() {
            Ok(report) => report,
            Err(e) => {
                error!("Seed {}: error during simulation step {}: {}", seed, sim.current_time_step() + 1, e);
                anyhow::bail!("Simulation step failed.");
            }
        };
        let step_duration = step_start_time.elapsed();

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_step = record_interval_steps > 0 && report.step % record_interval_steps == 0;
        let is_last_step = report.step == total_steps;

        if should_print_status || is_record_step || is_last_step {
            info!(
                "Seed {} step [{}/{}] (t={:.2}) | Agents: {} | Domain: {:.1} | Min u: {:.4} | Step Time: {:6.2} ms",
                seed,
                report.step,
                total_steps,
                report.time,
                report.agent_count,
                report.domain_length,
                report.min_concentration,
                step_duration.as_secs_f64() * 1000.0
            );
            previous_print_time = now;
        } else {
            trace!("Seed {} step [{}/{}] completed", seed, report.step, total_steps);
        }

        if is_record_step || is_last_step {
            sim.record_snapshot()?;
            if config.output.save_chemo_csv {
                let path = chemo_csv_path(base, seed, report.step);
                if let Err(e) = save_chemo_csv(&path, sim.field(), sim.growth()) {
                    error!("Error writing chemo file '{}': {}", path.display(), e);
                }
            }
        }
    }
    info!(
        "Seed {} finished in {:.3} seconds.",
        seed,
        start_time.elapsed().as_secs_f64()
    );

    // --- Save Recorded Data ---
    if config.output.save_snapshots {
        let path = snapshots_path(base, seed, format);
        if let Err(e) = save_snapshots(&path, sim.get_recorded_snapshots(), format) {
            error!("Error saving snapshots to '{}': {}", path.display(), e);
        }
    } else {
        debug!("Skipping saving snapshots as per config (save_snapshots is false).");
    }

    Ok(ReplicaSummary {
        seed,
        agent_count: sim.agents().len(),
        chain_break_fraction: sim.chain_break_fraction(),
        histogram: sim.density_histogram(config.output.density_bin_width),
    })
}
