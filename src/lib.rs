//! Leader/follower cell migration on a growing domain, guided by a
//! reaction-diffusion chemoattractant field.

pub mod agent;
pub mod field;
pub mod growth;
pub mod insertion;
pub mod internalization;
pub mod movement;
pub mod output;
pub mod rng;
pub mod simulation;
pub mod spatial;

pub use simulation::{Simulation, StepReport};
