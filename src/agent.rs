use migration_common::{AgentRecord, CellKind, SimParams, Vec2};

/// One migrating cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Stable id; equal to the agent's slot in the [`AgentStore`].
    pub id: u32,
    pub position: Vec2,
    pub radius: f64,
    pub kind: CellKind,
    /// Last realized step vector (or the adopted chain direction).
    pub direction: Vec2,
    /// Chain depth: 0 when free, k for the k-th link behind a leader.
    pub chain: u32,
    /// Id of the leader whose chain this agent belongs (or belonged) to.
    pub chain_type: Option<u32>,
    /// Id of the agent immediately ahead in the chain.
    pub attached_to: Option<u32>,
    /// True while a leader repeats its last direction.
    pub persistent: bool,
    pub same_dir_step: u32,
    /// Growth-map column the agent occupied at the last growth update.
    pub scaling: usize,
}

impl Agent {
    fn new(id: u32, kind: CellKind, position: Vec2, radius: f64) -> Self {
        Self {
            id,
            position,
            radius,
            kind,
            direction: Vec2::zero(),
            chain: 0,
            chain_type: None,
            attached_to: None,
            persistent: false,
            same_dir_step: 0,
            scaling: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.kind == CellKind::Leader
    }

    pub fn is_chained(&self) -> bool {
        self.chain > 0
    }

    pub fn record(&self) -> AgentRecord {
        AgentRecord {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            kind: self.kind,
            chain: self.chain,
            chain_type: self.chain_type,
            attached_to: self.attached_to,
        }
    }
}

/// Dense arena of agents. Agents are never removed, so slot `i` always holds id `i`.
#[derive(Debug, Clone, Default)]
pub struct AgentStore {
    agents: Vec<Agent>,
    /// The first `leader_count` slots are the leader slots.
    leader_count: usize,
}

impl AgentStore {
    /// Places the initial leaders at the domain entrance, evenly spread in y.
    pub fn with_leaders(params: &SimParams) -> Self {
        let mut store = AgentStore::default();
        let n = params.initial_leaders;
        let span = params.height - 1.0;
        for i in 0..n {
            let y = (i + 1) as f64 * span / n as f64 - 0.5 * span / n as f64;
            store.push(CellKind::Leader, Vec2::new(params.radius, y), params.radius);
        }
        store.leader_count = n;
        store
    }

    fn push(&mut self, kind: CellKind, position: Vec2, radius: f64) -> u32 {
        let id = self.agents.len() as u32;
        self.agents.push(Agent::new(id, kind, position, radius));
        id
    }

    /// Appends a free follower and returns its id.
    pub fn add_follower(&mut self, position: Vec2, radius: f64) -> u32 {
        self.push(CellKind::Follower, position, radius)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn leader_count(&self) -> usize {
        self.leader_count
    }

    /// Slots `0..leader_count`; phenotype switching exchanges positions, never slots.
    pub fn leader_slots(&self) -> std::ops::Range<usize> {
        0..self.leader_count
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn get(&self, id: u32) -> Option<&Agent> {
        self.agents.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Agent> {
        self.agents.get_mut(id as usize)
    }

    pub fn positions(&self) -> Vec<Vec2> {
        self.agents.iter().map(|a| a.position).collect()
    }

    pub fn swap_positions(&mut self, a: usize, b: usize) {
        let pa = self.agents[a].position;
        self.agents[a].position = self.agents[b].position;
        self.agents[b].position = pa;
    }

    /// True if following `start`'s attachments forward reaches `target`.
    ///
    /// Walks at most `len()` links, so a pre-existing cycle cannot hang it.
    pub fn lineage_contains(&self, start: u32, target: u32) -> bool {
        let mut current = Some(start);
        for _ in 0..=self.agents.len() {
            match current {
                Some(id) if id == target => return true,
                Some(id) => current = self.get(id).and_then(|a| a.attached_to),
                None => return false,
            }
        }
        false
    }

    /// Clears the chain depth and attachment of every agent labelled `chain_type`.
    /// Returns how many agents were released.
    pub fn dissolve_chain(&mut self, chain_type: u32) -> usize {
        let mut released = 0;
        for agent in self.agents.iter_mut().filter(|a| a.chain_type == Some(chain_type)) {
            if agent.chain > 0 {
                released += 1;
            }
            agent.chain = 0;
            agent.attached_to = None;
        }
        released
    }

    pub fn followers(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|a| !a.is_leader())
    }

    /// Share of followers not attached to any chain (0 when there are no followers).
    pub fn chain_break_fraction(&self) -> f64 {
        let (free, total) = self
            .followers()
            .fold((0usize, 0usize), |(free, total), a| (free + usize::from(!a.is_chained()), total + 1));
        if total == 0 {
            0.0
        } else {
            free as f64 / total as f64
        }
    }
}

impl std::ops::Index<usize> for AgentStore {
    type Output = Agent;
    fn index(&self, slot: usize) -> &Agent {
        &self.agents[slot]
    }
}

impl std::ops::IndexMut<usize> for AgentStore {
    fn index_mut(&mut self, slot: usize) -> &mut Agent {
        &mut self.agents[slot]
    }
}
