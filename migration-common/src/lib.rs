pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    CellParamsConfig, ChemoConfig, DomainConfig, GrowthConfig, IndexRefresh, InsertionConfig,
    OutputConfig, PhenotypeSwap, PolicyConfig, SimulationConfig, SweepConfig, TimingConfig,
};
pub use sim_params::SimParams;
pub use snapshot::{AgentRecord, CellKind, Snapshot};
pub use vecmath::{heading, Vec2};
