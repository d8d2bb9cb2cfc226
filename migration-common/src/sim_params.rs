use serde::{Deserialize, Serialize};
use crate::config::{IndexRefresh, PhenotypeSwap};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Grid
    pub length_x: usize,
    pub length_y: usize,
    pub height: f64, // Domain height (rows), y band is [radius, height - 1 - radius]
    pub dx: f64,
    pub dy: f64,

    // Time
    pub dt: f64,
    pub final_time: f64,
    pub total_steps: u32,
    pub snapshot_interval_steps: u32,

    // Growth
    pub final_length: f64,
    pub faster_ratio: f64,
    pub segment_boundary: usize, // First column of the second strain segment
    pub first_segment_faster: bool,

    // Chemoattractant
    pub diffusion: f64,
    pub reaction_rate: f64,
    pub sink_coefficient: f64, // lambda / (2 pi r^2)
    pub initial_concentration: f64,
    pub kernel_cutoff: Option<f64>, // Internalization pruning distance (um)

    // Cell Properties
    pub radius: f64,
    pub diameter: f64,
    pub initial_leaders: usize,
    pub sensing_radius: f64,
    pub direct_attach_radius: f64,
    pub chain_attach_radius: f64,
    pub detach_distance: f64,
    pub leader_speed: f64, // um per step
    pub follower_speed_factor: f64,
    pub follower_speed: f64,
    pub switch_margin: f64,
    pub filopodia: usize,
    pub persistence_steps: u32,
    pub random_persistence: bool,
    pub gradient_threshold: f64,

    // Insertion & policies
    pub insertion_interval_steps: u32,
    pub index_refresh: IndexRefresh,
    pub phenotype_swap: PhenotypeSwap,
    pub reject_chain_cycles: bool,
    pub index_padding: f64,
}

impl SimParams {
    /// Upper y bound of the band agent centres must stay in.
    pub fn y_max(&self) -> f64 {
        self.height - 1.0 - self.radius
    }
}
