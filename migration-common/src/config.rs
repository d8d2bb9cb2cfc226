use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Geometry of the growing domain
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DomainConfig {
    /// Initial domain length in grid-resolution units (3.42 -> 342 columns).
    pub initial_length: f64,
    /// Grid points per unit of `initial_length` / `height_factor`.
    pub grid_resolution: f64,
    /// Domain height in grid-resolution units (1.2 -> 120 rows).
    pub height_factor: f64,
    /// Physical length (um) the domain must reach at `timing.final_time`.
    pub final_length: f64,
    /// Grid spacing along x.
    pub dx: f64,
    /// Grid spacing along y.
    pub dy: f64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        DomainConfig {
            initial_length: 3.42,
            grid_resolution: 100.0,
            height_factor: 1.2,
            final_length: 1014.0,
            dx: 1.0,
            dy: 1.0,
        }
    }
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    /// Physics time step (hours).
    pub dt: f64,
    /// Simulated time at which the run stops (hours).
    pub final_time: f64,
    /// Steps between recorded snapshots (0 disables periodic snapshots).
    pub snapshot_interval_steps: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            dt: 0.01,
            final_time: 54.0,
            snapshot_interval_steps: 100,
        }
    }
}

// Two-segment strain-rate profile
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct GrowthConfig {
    /// How many times faster the fast segment grows than the slow one.
    pub faster_ratio: f64,
    /// Fraction of the columns belonging to the first segment (0..=1).
    pub segment_fraction: f64,
    /// True if the first segment is the faster one.
    pub first_segment_faster: bool,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        GrowthConfig {
            faster_ratio: 2.0,
            segment_fraction: 1.0,
            first_segment_faster: true,
        }
    }
}

// Chemoattractant reaction-diffusion parameters
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ChemoConfig {
    pub diffusion: f64,
    pub reaction_rate: f64,
    /// Internalization rate lambda (1/h).
    pub internalization_rate: f64,
    pub initial_concentration: f64,
    /// Kernel pruning distance in cell radii (0 disables pruning).
    pub kernel_cutoff_radii: f64,
}

impl Default for ChemoConfig {
    fn default() -> Self {
        ChemoConfig {
            diffusion: 2.0,
            reaction_rate: 1.0,
            internalization_rate: 1.0,
            initial_concentration: 1.0,
            kernel_cutoff_radii: 8.0,
        }
    }
}

// Parameters for cell behavior and properties
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct CellParamsConfig {
    pub radius: f64,
    pub initial_leaders: u32,
    /// Filopodia reach (sensing radius, includes the cell radius).
    pub sensing_radius: f64,
    /// Radius within which an unchained follower attaches to a leader.
    pub direct_attach_radius: f64,
    /// Radius within which an unchained follower joins an existing chain.
    pub chain_attach_radius: f64,
    /// Distance past which a chained follower breaks away.
    pub detach_distance: f64,
    pub leader_speed: f64,
    /// Follower speed as a multiple of `leader_speed`.
    pub follower_speed_factor: f64,
    /// How far a follower must overtake a leader before they switch places.
    pub switch_margin: f64,
    pub filopodia: u32,
    /// Extra steps a leader repeats its last direction (0 disables persistence).
    pub persistence_steps: u32,
    /// Whether random-walk steps may also start a persistent run.
    pub random_persistence: bool,
    /// Relative concentration gain needed for a chemotactic step.
    pub gradient_threshold: f64,
}

impl Default for CellParamsConfig {
    fn default() -> Self {
        CellParamsConfig {
            radius: 7.5,
            initial_leaders: 5,
            sensing_radius: 27.5,
            direct_attach_radius: 27.5,
            chain_attach_radius: 27.5,
            detach_distance: 45.0,
            leader_speed: 0.14,
            follower_speed_factor: 1.3,
            switch_margin: 1.0,
            filopodia: 3,
            persistence_steps: 0,
            random_persistence: true,
            gradient_threshold: 0.05,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct InsertionConfig {
    /// Steps between insertion proposals (0 disables insertion).
    pub interval_steps: u32,
}

impl Default for InsertionConfig {
    fn default() -> Self {
        InsertionConfig { interval_steps: 1 }
    }
}

/// When the spatial index sees position commits made during a step.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexRefresh {
    /// Refresh after insertion and after the sweep only; collision checks
    /// during the sweep see pre-growth, pre-sweep positions.
    Stale,
    /// Refresh after growth and relocate each agent as soon as it moves.
    PerCommit,
}

/// What happens when a follower overtakes its nearest leader.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhenotypeSwap {
    /// Exchange coordinates only; kind and chain labels stay with the agents.
    PositionsOnly,
    Disabled,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    pub index_refresh: IndexRefresh,
    pub phenotype_swap: PhenotypeSwap,
    /// Reject chain attachments that would close a cycle.
    pub reject_chain_cycles: bool,
    /// Search domain of the spatial index as a multiple of the initial grid.
    pub index_padding: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            index_refresh: IndexRefresh::Stale,
            phenotype_swap: PhenotypeSwap::PositionsOnly,
            reject_chain_cycles: true,
            index_padding: 5.0,
        }
    }
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub base_filename: String,
    /// Write a chemoattractant CSV at every snapshot step.
    pub save_chemo_csv: bool,
    /// Save recorded agent snapshots at the end of each replica.
    pub save_snapshots: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    /// Width (um) of the bins of the end-of-run density histogram.
    pub density_bin_width: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "migration".to_string(),
            save_chemo_csv: true,
            save_snapshots: false,
            format: None,
            density_bin_width: 55.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SweepConfig {
    pub replicas: u32,
    pub first_seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig { replicas: 1, first_seed: 0 }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    pub growth: GrowthConfig,
    pub chemo: ChemoConfig,
    pub cell_params: CellParamsConfig,
    pub insertion: InsertionConfig,
    pub policy: PolicyConfig,
    pub output: OutputConfig,
    pub sweep: SweepConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = SimulationConfig::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Rejects parameter combinations the model cannot run with.
    pub fn validate(&self) -> Result<()> {
        let cell = &self.cell_params;
        if cell.radius <= 0.0 {
            anyhow::bail!("cell_params.radius must be positive.");
        }
        if self.timing.dt <= 0.0 || self.timing.final_time <= 0.0 {
            anyhow::bail!("timing.dt and timing.final_time must be positive.");
        }
        if self.domain.dx <= 0.0 || self.domain.dy <= 0.0 {
            anyhow::bail!("domain.dx and domain.dy must be positive.");
        }
        let (length_x, length_y) = self.grid_dims();
        if length_x < 3 || length_y < 3 {
            anyhow::bail!("grid must be at least 3x3, got {}x{}.", length_x, length_y);
        }
        if self.domain.final_length <= 0.0 {
            anyhow::bail!("domain.final_length must be positive.");
        }
        if self.growth.faster_ratio <= 0.0 {
            anyhow::bail!("growth.faster_ratio must be positive.");
        }
        if !(0.0..=1.0).contains(&self.growth.segment_fraction) {
            anyhow::bail!("growth.segment_fraction must lie in [0, 1].");
        }
        if cell.filopodia == 0 {
            anyhow::bail!("cell_params.filopodia must be at least 1.");
        }
        if (length_y as f64 - 1.0) <= 2.0 * cell.radius {
            anyhow::bail!("domain height ({} rows) cannot hold a cell of radius {}.", length_y, cell.radius);
        }
        if cell.detach_distance <= 0.0 || cell.sensing_radius < 0.0 {
            anyhow::bail!("cell_params.detach_distance must be positive and sensing_radius non-negative.");
        }
        if self.policy.index_padding < 1.0 {
            anyhow::bail!("policy.index_padding must be at least 1.");
        }
        if self.output.density_bin_width <= 0.0 {
            anyhow::bail!("output.density_bin_width must be positive.");
        }
        Ok(())
    }

    /// Number of grid columns and rows of the chemoattractant matrix.
    pub fn grid_dims(&self) -> (usize, usize) {
        let length_x = (self.domain.initial_length * self.domain.grid_resolution) as usize;
        let length_y = (self.domain.height_factor * self.domain.grid_resolution) as usize;
        (length_x, length_y)
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let cell = &self.cell_params;
        let (length_x, length_y) = self.grid_dims();

        let radius = cell.radius;
        let diameter = 2.0 * radius;
        let total_steps = (self.timing.final_time / self.timing.dt).ceil() as u32;

        SimParams {
            // Grid
            length_x,
            length_y,
            height: length_y as f64,
            dx: self.domain.dx,
            dy: self.domain.dy,
            // Time
            dt: self.timing.dt,
            final_time: self.timing.final_time,
            total_steps,
            snapshot_interval_steps: self.timing.snapshot_interval_steps,
            // Growth
            final_length: self.domain.final_length,
            faster_ratio: self.growth.faster_ratio,
            segment_boundary: (self.growth.segment_fraction * length_x as f64) as usize,
            first_segment_faster: self.growth.first_segment_faster,
            // Chemoattractant
            diffusion: self.chemo.diffusion,
            reaction_rate: self.chemo.reaction_rate,
            // Uptake per agent, normalized by the area of a cell.
            sink_coefficient: self.chemo.internalization_rate
                / (2.0 * std::f64::consts::PI * radius * radius),
            initial_concentration: self.chemo.initial_concentration,
            kernel_cutoff: if self.chemo.kernel_cutoff_radii > 0.0 {
                Some(self.chemo.kernel_cutoff_radii * radius)
            } else {
                None
            },
            // Cells
            radius,
            diameter,
            initial_leaders: cell.initial_leaders as usize,
            sensing_radius: cell.sensing_radius,
            direct_attach_radius: cell.direct_attach_radius,
            chain_attach_radius: cell.chain_attach_radius,
            detach_distance: cell.detach_distance,
            leader_speed: cell.leader_speed,
            follower_speed_factor: cell.follower_speed_factor,
            follower_speed: cell.follower_speed_factor * cell.leader_speed,
            switch_margin: cell.switch_margin,
            filopodia: cell.filopodia as usize,
            persistence_steps: cell.persistence_steps,
            random_persistence: cell.random_persistence,
            gradient_threshold: cell.gradient_threshold,
            // Insertion & policies
            insertion_interval_steps: self.insertion.interval_steps,
            index_refresh: self.policy.index_refresh,
            phenotype_swap: self.policy.phenotype_swap,
            reject_chain_cycles: self.policy.reject_chain_cycles,
            index_padding: self.policy.index_padding,
        }
    }
}
