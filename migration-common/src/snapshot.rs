use serde::{Serialize, Deserialize};

/// Phenotype of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Leader,
    Follower,
}

/// Per-agent record stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub kind: CellKind,
    /// Chain depth (0 = not in a chain).
    pub chain: u32,
    pub chain_type: Option<u32>,
    pub attached_to: Option<u32>,
}

/// A snapshot of the agent population at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The simulation time (hours) at which the snapshot was taken.
    pub time: f64,
    pub step: u32,
    /// Physical domain length, `Gamma(last)`.
    pub domain_length: f64,
    pub total_agent_count: u32,
    /// Followers currently part of a chain.
    pub chained_followers: u32,
    pub agents: Vec<AgentRecord>,
}
