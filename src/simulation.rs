use crate::agent::{Agent, AgentStore};
use crate::field::{stable_time_step, ChemoField};
use crate::growth::GrowthModel;
use crate::insertion;
use crate::internalization::Internalization;
use crate::movement::{sweep_order, Sweep, SweepStats};
use crate::output::DensityHistogram;
use crate::rng::ReplicaRng;
use crate::spatial::SpatialIndex;
use anyhow::Result;
use log::{debug, info, trace, warn};
use migration_common::{IndexRefresh, SimParams, SimulationConfig, Snapshot};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What happened during one call to [`Simulation::step`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepReport {
    /// Step number just completed (1-based).
    pub step: u32,
    pub time: f64,
    /// True if a follower was inserted this step.
    pub inserted: bool,
    pub agent_count: u32,
    pub domain_length: f64,
    pub min_concentration: f64,
    pub sweep: SweepStats,
}

/// One replica of the growing-domain migration model.
pub struct Simulation {
    /// The configuration this replica was built from.
    pub config: SimulationConfig,
    params: SimParams,
    seed: u64,
    rng: ReplicaRng,
    agents: AgentStore,
    index: SpatialIndex,
    growth: GrowthModel,
    field: ChemoField,
    sink: Internalization,
    /// Number of completed steps.
    current_time_step: u32,
    /// Stores collected agent snapshots at record intervals.
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Creates a replica for `seed`: unstretched domain, saturated field and
    /// the initial leaders at the entrance.
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();

        let growth = GrowthModel::new(&params);
        let bound = stable_time_step(&params, growth.min_stretch(params.final_time));
        if params.dt > bound {
            warn!(
                "Time step dt={} exceeds the explicit stability bound {:.4}; the field may diverge.",
                params.dt, bound
            );
        }

        let mut agents = AgentStore::with_leaders(&params);
        for slot in 0..agents.len() {
            let x = agents[slot].position.x;
            agents[slot].scaling = growth.segment_index(x);
        }

        let mut index = SpatialIndex::new(
            params.length_x as f64 * params.dx,
            params.height,
            params.diameter,
            params.index_padding,
        );
        index.rebuild(&agents.positions());

        info!(
            "Replica seed {}: {}x{} grid, {} leaders, {} steps of dt={}.",
            seed, params.length_x, params.length_y, agents.len(), params.total_steps, params.dt
        );
        debug!("Simulation Parameters: {:#?}", params);

        Ok(Self {
            field: ChemoField::new(&params),
            sink: Internalization::new(&params),
            rng: ReplicaRng::new(seed),
            config,
            params,
            seed,
            agents,
            index,
            growth,
            current_time_step: 0,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the replica by one time step.
    pub fn step(&mut self) -> Result<StepReport> {
        let step = self.current_time_step;
        let step_start = Instant::now();

        // --- 1. Insertion at the entrance ---
        let inserted = if insertion::is_due(&self.params, step) {
            insertion::propose(&mut self.agents, &self.index, &self.params, &mut self.rng.insertion)?.is_some()
        } else {
            false
        };
        if inserted {
            self.refresh_index();
        }

        // --- 2. Domain growth and agent repositioning ---
        let time = (step + 1) as f64 * self.params.dt;
        self.growth.advance(time);
        self.reposition_agents();
        self.growth.commit();
        if self.params.index_refresh == IndexRefresh::PerCommit {
            self.refresh_index();
        }

        // --- 3. Internalization and field update ---
        let positions = self.agents.positions();
        self.sink.accumulate(&self.growth, &positions, &self.params);
        self.field.step(&self.growth, self.sink.values(), &self.params);

        // --- 4. Movement sweep in random order ---
        let order = sweep_order(self.agents.len(), &mut self.rng.sweep);
        let sweep = Sweep::new(
            &mut self.agents,
            &mut self.index,
            &self.growth,
            &self.field,
            &self.params,
            &mut self.rng.angles,
        )?;
        let stats = sweep.run(&order);
        self.refresh_index();

        self.current_time_step += 1;
        let report = StepReport {
            step: self.current_time_step,
            time,
            inserted,
            agent_count: self.agents.len() as u32,
            domain_length: self.growth.domain_length(),
            min_concentration: self.field.min_value(),
            sweep: stats,
        };
        debug!("Step {} stats: {:?}", report.step, stats);
        trace!(
            "Step {} completed in {:.2} ms",
            report.step,
            step_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(report)
    }

    /// Carries every agent along with the stretch of the column segment it occupies.
    fn reposition_agents(&mut self) {
        for slot in 0..self.agents.len() {
            let segment = self.growth.segment_index(self.agents[slot].position.x);
            let agent = &mut self.agents[slot];
            agent.scaling = segment;
            agent.position.x += self.growth.displacement(segment);
        }
    }

    /// Rebuilds the spatial index from the current agent positions.
    pub fn refresh_index(&mut self) {
        self.index.rebuild(&self.agents.positions());
    }

    /// Collects the agent population into a snapshot.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let time = self.time();
        debug!("Recording snapshot at t={:.2} (step {})...", time, self.current_time_step);

        let chained_followers = self.agents.followers().filter(|a| a.is_chained()).count() as u32;
        let snapshot = Snapshot {
            time,
            step: self.current_time_step,
            domain_length: self.growth.domain_length(),
            total_agent_count: self.agents.len() as u32,
            chained_followers,
            agents: self.agents.agents().iter().map(Agent::record).collect(),
        };
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    /// Agent counts along the current domain in bins about `bin_width` wide.
    pub fn density_histogram(&self, bin_width: f64) -> DensityHistogram {
        let xs: Vec<f64> = self.agents.agents().iter().map(|a| a.position.x).collect();
        DensityHistogram::from_positions(&xs, self.growth.domain_length(), bin_width)
    }

    /// Share of followers that are not part of any chain.
    pub fn chain_break_fraction(&self) -> f64 {
        self.agents.chain_break_fraction()
    }

    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    /// Mutable access for placing agents by hand; call [`Simulation::refresh_index`] afterwards.
    pub fn agents_mut(&mut self) -> &mut AgentStore {
        &mut self.agents
    }

    pub fn growth(&self) -> &GrowthModel {
        &self.growth
    }

    pub fn field(&self) -> &ChemoField {
        &self.field
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn current_time_step(&self) -> u32 {
        self.current_time_step
    }

    /// Elapsed model time.
    pub fn time(&self) -> f64 {
        self.current_time_step as f64 * self.params.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.domain.initial_length = 1.0;
        config.domain.final_length = 300.0;
        config
    }

    #[test]
    fn new_replica_starts_unstretched() {
        let sim = Simulation::new(small_config(), 0).unwrap();
        assert_eq!(sim.current_time_step(), 0);
        assert_eq!(sim.agents().len(), 5);
        assert_eq!(sim.growth().domain_length(), 99.0);
        assert_eq!(sim.agents()[0].scaling, 7);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = small_config();
        config.cell_params.radius = 0.0;
        assert!(Simulation::new(config, 0).is_err());
    }

    #[test]
    fn step_advances_clock_and_domain() {
        let mut sim = Simulation::new(small_config(), 1).unwrap();
        let report = sim.step().unwrap();
        assert_eq!(report.step, 1);
        assert_eq!(sim.current_time_step(), 1);
        assert!((report.time - 0.01).abs() < 1e-15);
        assert!(report.domain_length > 99.0);
        assert_eq!(report.agent_count as usize, sim.agents().len());
    }

    #[test]
    fn snapshots_capture_the_population() {
        let mut sim = Simulation::new(small_config(), 2).unwrap();
        sim.step().unwrap();
        sim.record_snapshot().unwrap();
        let snapshot = &sim.get_recorded_snapshots()[0];
        assert_eq!(snapshot.step, 1);
        assert_eq!(snapshot.total_agent_count as usize, sim.agents().len());
        assert_eq!(snapshot.agents.len(), sim.agents().len());
        assert_eq!(snapshot.agents[0].x, sim.agents()[0].position.x);
    }

    #[test]
    fn histogram_counts_every_interior_agent() {
        let sim = Simulation::new(small_config(), 0).unwrap();
        let histogram = sim.density_histogram(55.0);
        // 99 / 55 -> a single 99-wide bin holding all five leaders.
        assert_eq!(histogram.counts, vec![5]);
        assert_eq!(sim.chain_break_fraction(), 0.0);
    }
}
