use crate::agent::AgentStore;
use crate::field::ChemoField;
use crate::growth::GrowthModel;
use crate::spatial::SpatialIndex;
use anyhow::Result;
use log::debug;
use migration_common::{heading, IndexRefresh, PhenotypeSwap, SimParams, Vec2};
use rand::distr::Uniform;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Counters collected over one movement sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Committed moves.
    pub moved: u32,
    /// Moves rejected by the collision or bounds check.
    pub blocked: u32,
    pub attached: u32,
    pub detached: u32,
    pub swaps: u32,
    /// Leaders whose gradient test was undefined (concentration <= 0 or non-finite).
    pub numerical_faults: u32,
}

/// A uniformly shuffled visiting order over `count` agents.
pub fn sweep_order<R: Rng>(count: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..count).collect();
    order.shuffle(rng);
    order
}

/// Relative concentration gain `(best - current) / sqrt(current)`.
///
/// `None` when the ratio is undefined.
pub fn gradient_gain(current: f64, best: f64) -> Option<f64> {
    if !(current > 0.0) || !current.is_finite() || !best.is_finite() {
        return None;
    }
    Some((best - current) / current.sqrt())
}

/// One pass of the movement policy over the agents, committing positions
/// directly into the store.
///
/// Collision checks query `index`; under [`IndexRefresh::Stale`] it is not
/// updated during the sweep, so earlier moves stay invisible to later checks.
pub struct Sweep<'a, R> {
    store: &'a mut AgentStore,
    index: &'a mut SpatialIndex,
    growth: &'a GrowthModel,
    field: &'a ChemoField,
    params: &'a SimParams,
    rng: &'a mut R,
    angle_dist: Uniform<f64>,
    stats: SweepStats,
}

impl<'a, R: Rng> Sweep<'a, R> {
    pub fn new(
        store: &'a mut AgentStore,
        index: &'a mut SpatialIndex,
        growth: &'a GrowthModel,
        field: &'a ChemoField,
        params: &'a SimParams,
        rng: &'a mut R,
    ) -> Result<Self> {
        let angle_dist = Uniform::new(0.0, std::f64::consts::TAU)?;
        Ok(Self {
            store,
            index,
            growth,
            field,
            params,
            rng,
            angle_dist,
            stats: SweepStats::default(),
        })
    }

    /// Moves every agent in `order` once and returns the sweep counters.
    pub fn run(mut self, order: &[usize]) -> SweepStats {
        for &slot in order {
            self.move_agent(slot);
        }
        self.stats
    }

    pub fn stats(&self) -> SweepStats {
        self.stats
    }

    /// Applies the policy of the agent in `slot`.
    pub fn move_agent(&mut self, slot: usize) {
        if slot >= self.store.len() {
            return;
        }
        if self.store[slot].is_leader() {
            self.move_leader(slot);
        } else {
            self.move_follower(slot);
            self.switch_phenotype(slot);
        }
    }

    fn in_bounds(&self, p: Vec2) -> bool {
        let r = self.params.radius;
        p.x > r && p.x < self.growth.domain_length() - r && p.y > r && p.y < self.params.y_max()
    }

    /// Commits `position + step` if it is in bounds and no other indexed agent
    /// lies within one diameter of it.
    fn try_move(&mut self, slot: usize, step: Vec2) -> bool {
        if step == Vec2::zero() {
            return false;
        }
        let destination = self.store[slot].position + step;
        if !self.in_bounds(destination) || !self.index.is_free(destination, self.params.diameter, Some(slot)) {
            self.stats.blocked += 1;
            return false;
        }
        self.store[slot].position = destination;
        if self.params.index_refresh == IndexRefresh::PerCommit {
            self.index.relocate(slot, destination);
        }
        self.stats.moved += 1;
        true
    }

    fn move_leader(&mut self, slot: usize) {
        if self.store[slot].persistent {
            let direction = self.store[slot].direction;
            self.try_move(slot, direction);
            // Counts attempts, committed or not.
            self.store[slot].same_dir_step += 1;
        } else {
            self.sense_and_move(slot);
        }

        let limit = self.params.persistence_steps;
        let leader = &mut self.store[slot];
        if leader.same_dir_step > limit {
            leader.persistent = false;
            leader.same_dir_step = 0;
        }
    }

    /// Probes the field with filopodia and climbs the gradient if it is steep
    /// enough, otherwise takes the reserved random step.
    fn sense_and_move(&mut self, slot: usize) {
        let angles: Vec<f64> = (0..self.params.filopodia)
            .map(|_| self.rng.sample(&self.angle_dist))
            .collect();
        let random_angle = self.rng.sample(&self.angle_dist);

        let agent = &self.store[slot];
        let column = agent.scaling as f64;
        let y = agent.position.y;
        let lx = self.params.sensing_radius * self.growth.local_scale(agent.scaling);
        let ly = self.params.sensing_radius;

        let current = self.field.sample_rounded(column, y);
        let mut best = (random_angle, f64::NEG_INFINITY);
        for &theta in &angles {
            let value = self.field.sample_rounded(column + theta.sin() * lx, y + theta.cos() * ly);
            if value > best.1 {
                best = (theta, value);
            }
        }

        let climb = match gradient_gain(current, best.1) {
            Some(gain) => gain > self.params.gradient_threshold,
            None => {
                self.stats.numerical_faults += 1;
                debug!(
                    "Leader {} senses undefined gain (concentration {:.3e}); moving randomly.",
                    slot, current
                );
                false
            }
        };

        let persistence = self.params.persistence_steps > 0;
        let (theta, persist) = if climb {
            (best.0, persistence)
        } else {
            (random_angle, persistence && self.params.random_persistence)
        };
        let step = heading(theta).scale(self.params.leader_speed);
        if self.try_move(slot, step) {
            let leader = &mut self.store[slot];
            leader.direction = step;
            if persist {
                leader.persistent = true;
            }
        }
    }

    fn move_follower(&mut self, slot: usize) {
        if self.store[slot].is_chained() {
            if !self.detach_if_stretched(slot) {
                self.follow_chain(slot);
            }
            return;
        }

        if self.attach(slot) {
            self.follow_chain(slot);
        } else {
            let theta = self.rng.sample(&self.angle_dist);
            let step = heading(theta).scale(self.params.follower_speed);
            if self.try_move(slot, step) {
                self.store[slot].direction = step;
            }
        }
    }

    /// Dissolves the follower's chain if it trails its attachment by more
    /// than the detachment distance. Returns true if it did.
    fn detach_if_stretched(&mut self, slot: usize) -> bool {
        let agent = &self.store[slot];
        let gap = agent
            .attached_to
            .and_then(|id| self.store.get(id))
            .map(|ahead| agent.position.distance(ahead.position));
        if matches!(gap, Some(d) if d <= self.params.detach_distance) {
            return false;
        }

        let chain_type = agent.chain_type;
        let follower = &mut self.store[slot];
        follower.chain = 0;
        follower.attached_to = None;
        let released = chain_type.map_or(0, |ct| self.store.dissolve_chain(ct));
        self.stats.detached += 1;
        debug!("Follower {} detached; {} chain links released.", slot, released);
        true
    }

    /// Copies the direction of the agent ahead and steps along it at follower speed.
    fn follow_chain(&mut self, slot: usize) {
        let direction = match self.store[slot].attached_to.and_then(|id| self.store.get(id)) {
            Some(ahead) => ahead.direction,
            None => return,
        };
        self.store[slot].direction = direction;
        self.try_move(slot, direction.scale(self.params.follower_speed_factor));
    }

    /// Nearest indexed agent within `radius` of `point` passing `accept`;
    /// ties go to the lowest slot.
    fn nearest<F>(&self, point: Vec2, radius: f64, mut accept: F) -> Option<usize>
    where
        F: FnMut(&AgentStore, usize) -> bool,
    {
        let store: &AgentStore = &*self.store;
        let mut best: Option<(f64, usize)> = None;
        self.index.for_each_within(point, radius, |n| {
            if n.index >= store.len() || !accept(store, n.index) {
                return;
            }
            let d = n.offset.length_squared();
            if best.map_or(true, |(bd, bi)| d < bd || (d == bd && n.index < bi)) {
                best = Some((d, n.index));
            }
        });
        best.map(|(_, slot)| slot)
    }

    /// Attaches a free follower to the nearest leader, or failing that one link
    /// behind the nearest chained follower.
    fn attach(&mut self, slot: usize) -> bool {
        let position = self.store[slot].position;
        let own_id = self.store[slot].id;

        let target = self
            .nearest(position, self.params.direct_attach_radius, |store, n| {
                n != slot && store[n].is_leader()
            })
            .map(|leader| {
                let ahead = &self.store[leader];
                (ahead.id, 1, ahead.id, ahead.direction)
            })
            .or_else(|| {
                let reject_cycles = self.params.reject_chain_cycles;
                self.nearest(position, self.params.chain_attach_radius, |store, n| {
                    let candidate = &store[n];
                    n != slot
                        && !candidate.is_leader()
                        && candidate.is_chained()
                        && !(reject_cycles && store.lineage_contains(candidate.id, own_id))
                })
                .and_then(|link| {
                    let ahead = &self.store[link];
                    ahead
                        .chain_type
                        .map(|ct| (ahead.id, ahead.chain + 1, ct, ahead.direction))
                })
            });

        let Some((attached_to, chain, chain_type, direction)) = target else {
            return false;
        };
        let follower = &mut self.store[slot];
        follower.attached_to = Some(attached_to);
        follower.chain = chain;
        follower.chain_type = Some(chain_type);
        follower.direction = direction;
        self.stats.attached += 1;
        true
    }

    /// Swaps positions with the nearest leader when the follower has overtaken it.
    fn switch_phenotype(&mut self, slot: usize) {
        if self.params.phenotype_swap == PhenotypeSwap::Disabled || self.store.leader_count() == 0 {
            return;
        }
        let margin = self.params.switch_margin;
        let position = self.store[slot].position;

        let rearmost = self
            .store
            .leader_slots()
            .map(|i| self.store[i].position.x)
            .fold(f64::INFINITY, f64::min);
        if position.x <= rearmost + margin {
            return;
        }

        let nearest = self
            .store
            .leader_slots()
            .min_by(|&a, &b| {
                let da = self.store[a].position.distance_squared(position);
                let db = self.store[b].position.distance_squared(position);
                da.total_cmp(&db)
            })
            .unwrap_or(0);
        if position.x <= self.store[nearest].position.x + margin {
            return;
        }

        self.store.swap_positions(slot, nearest);
        if self.params.index_refresh == IndexRefresh::PerCommit {
            self.index.relocate(slot, self.store[slot].position);
            self.index.relocate(nearest, self.store[nearest].position);
        }
        self.stats.swaps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_common::{CellKind, SimulationConfig};

    struct Fixture {
        params: SimParams,
        store: AgentStore,
        index: SpatialIndex,
        growth: GrowthModel,
        field: ChemoField,
        rng: StdRng,
    }

    impl Fixture {
        /// Leaders at `leaders`, followers at `followers`, identity growth map.
        fn new(
            leaders: &[(f64, f64)],
            followers: &[(f64, f64)],
            configure: impl FnOnce(&mut SimulationConfig),
        ) -> Self {
            let mut config = SimulationConfig::default();
            config.cell_params.initial_leaders = leaders.len() as u32;
            configure(&mut config);
            let params = config.get_sim_params();

            let mut store = AgentStore::with_leaders(&params);
            for (slot, &(x, y)) in leaders.iter().enumerate() {
                store[slot].position = Vec2::new(x, y);
            }
            for &(x, y) in followers {
                store.add_follower(Vec2::new(x, y), params.radius);
            }
            for slot in 0..store.len() {
                store[slot].scaling = store[slot].position.x as usize;
            }
            let mut index = SpatialIndex::new(
                params.length_x as f64,
                params.height,
                params.diameter,
                params.index_padding,
            );
            index.rebuild(&store.positions());

            Self {
                growth: GrowthModel::new(&params),
                field: ChemoField::new(&params),
                params,
                store,
                index,
                rng: StdRng::seed_from_u64(11),
            }
        }

        fn sweep(&mut self) -> Sweep<'_, StdRng> {
            Sweep::new(
                &mut self.store,
                &mut self.index,
                &self.growth,
                &self.field,
                &self.params,
                &mut self.rng,
            )
            .unwrap()
        }

        fn step_agent(&mut self, slot: usize) -> SweepStats {
            let mut sweep = self.sweep();
            sweep.move_agent(slot);
            sweep.stats()
        }

        fn rebuild_index(&mut self) {
            self.index.rebuild(&self.store.positions());
        }
    }

    #[test]
    fn order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut order = sweep_order(40, &mut rng);
        assert_ne!(order, (0..40).collect::<Vec<_>>());
        order.sort_unstable();
        assert_eq!(order, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn gain_is_undefined_without_concentration() {
        assert_eq!(gradient_gain(0.0, 1.0), None);
        assert_eq!(gradient_gain(-0.1, 1.0), None);
        assert_eq!(gradient_gain(f64::NAN, 1.0), None);
        assert_eq!(gradient_gain(4.0, 5.0), Some(0.5));
    }

    #[test]
    fn leader_climbs_a_steep_gradient() {
        let mut fx = Fixture::new(&[(100.0, 60.0)], &[], |c| c.cell_params.filopodia = 64);
        let (nx, ny) = fx.field.dims();
        for i in 0..nx {
            for j in 0..ny {
                fx.field.set(i, j, 1.0 + 0.1 * i as f64);
            }
        }
        let stats = fx.step_agent(0);
        let leader = &fx.store[0];
        assert_eq!(stats.moved, 1);
        assert!(leader.direction.x > 0.0);
        assert!(leader.position.x > 100.0);
        assert!((leader.direction.length() - fx.params.leader_speed).abs() < 1e-12);
        assert!(!leader.persistent);
    }

    #[test]
    fn empty_field_counts_a_fault_and_walks_randomly() {
        let mut fx = Fixture::new(&[(100.0, 60.0)], &[], |c| c.chemo.initial_concentration = 0.0);
        let stats = fx.step_agent(0);
        assert_eq!(stats.numerical_faults, 1);
        assert_eq!(stats.moved, 1);
        let moved = fx.store[0].position.distance(Vec2::new(100.0, 60.0));
        assert!((moved - fx.params.leader_speed).abs() < 1e-12);
    }

    #[test]
    fn persistent_leader_repeats_direction_then_resenses() {
        let mut fx = Fixture::new(&[(100.0, 60.0)], &[], |c| c.cell_params.persistence_steps = 2);
        fx.store[0].persistent = true;
        fx.store[0].direction = Vec2::new(0.14, 0.0);

        fx.step_agent(0);
        assert!((fx.store[0].position.x - 100.14).abs() < 1e-12);
        assert_eq!(fx.store[0].same_dir_step, 1);
        fx.step_agent(0);
        assert_eq!(fx.store[0].same_dir_step, 2);
        assert!(fx.store[0].persistent);
        fx.step_agent(0);
        assert!(!fx.store[0].persistent);
        assert_eq!(fx.store[0].same_dir_step, 0);
        assert!((fx.store[0].position.x - 100.42).abs() < 1e-9);
    }

    #[test]
    fn persistent_move_checks_the_destination() {
        // The blocker is 15.04 from the leader but 14.9 from where it wants to go.
        let mut fx = Fixture::new(&[(100.0, 60.0), (115.04, 60.0)], &[], |c| {
            c.cell_params.persistence_steps = 5
        });
        fx.store[0].persistent = true;
        fx.store[0].direction = Vec2::new(0.14, 0.0);
        let stats = fx.step_agent(0);
        assert_eq!(stats.blocked, 1);
        assert_eq!(fx.store[0].position, Vec2::new(100.0, 60.0));
        assert_eq!(fx.store[0].same_dir_step, 1);
    }

    #[test]
    fn moves_leaving_the_band_are_rejected() {
        let mut fx = Fixture::new(&[(100.0, 7.6)], &[], |c| c.cell_params.persistence_steps = 5);
        fx.store[0].persistent = true;
        fx.store[0].direction = Vec2::new(0.0, -0.14);
        let stats = fx.step_agent(0);
        assert_eq!(stats.blocked, 1);
        assert_eq!(fx.store[0].position.y, 7.6);
    }

    #[test]
    fn follower_attaches_to_nearby_leader_and_mirrors_it() {
        let mut fx = Fixture::new(&[(100.0, 60.0)], &[(80.0, 60.0)], |_| {});
        let stats = fx.step_agent(1);
        let follower = &fx.store[1];
        assert_eq!(stats.attached, 1);
        assert_eq!(follower.chain, 1);
        assert_eq!(follower.chain_type, Some(0));
        assert_eq!(follower.attached_to, Some(0));
        // The leader has not moved yet, so there is nothing to follow.
        assert_eq!(follower.position, Vec2::new(80.0, 60.0));

        fx.store[0].direction = Vec2::new(0.14, 0.0);
        fx.step_agent(1);
        let follower = &fx.store[1];
        assert_eq!(follower.direction, Vec2::new(0.14, 0.0));
        assert!((follower.position.x - (80.0 + 0.14 * 1.3)).abs() < 1e-12);
        assert_eq!(follower.position.y, 60.0);
    }

    #[test]
    fn follower_joins_the_end_of_a_chain() {
        let mut fx = Fixture::new(&[(100.0, 60.0)], &[(80.0, 60.0), (58.0, 60.0)], |_| {});
        fx.store[0].direction = Vec2::new(0.14, 0.0);
        fx.store[1].chain = 1;
        fx.store[1].chain_type = Some(0);
        fx.store[1].attached_to = Some(0);
        fx.store[1].direction = Vec2::new(0.14, 0.0);

        let stats = fx.step_agent(2);
        let tail = &fx.store[2];
        assert_eq!(stats.attached, 1);
        assert_eq!(tail.chain, 2);
        assert_eq!(tail.chain_type, Some(0));
        assert_eq!(tail.attached_to, Some(1));
        assert!(tail.position.x > 58.0);
    }

    #[test]
    fn nearest_leader_wins() {
        let mut fx = Fixture::new(&[(100.0, 80.0), (100.0, 45.0)], &[(85.0, 60.0)], |_| {});
        fx.step_agent(2);
        assert_eq!(fx.store[2].attached_to, Some(1));
    }

    #[test]
    fn attachments_that_close_a_cycle_are_skipped() {
        let setup = |reject: bool| {
            let mut fx = Fixture::new(&[(300.0, 100.0)], &[(60.0, 60.0), (80.0, 60.0)], |c| {
                c.policy.reject_chain_cycles = reject
            });
            // Slot 2 claims to hang off slot 1, which is itself free.
            fx.store[2].chain = 1;
            fx.store[2].chain_type = Some(0);
            fx.store[2].attached_to = Some(1);
            fx.step_agent(1);
            fx.store[1].attached_to
        };
        assert_eq!(setup(true), None);
        assert_eq!(setup(false), Some(2));
    }

    #[test]
    fn stretched_link_dissolves_the_whole_chain() {
        let mut fx = Fixture::new(
            &[(100.0, 60.0), (100.0, 100.0)],
            &[(40.0, 60.0), (20.0, 60.0), (80.0, 100.0)],
            |_| {},
        );
        let link = |store: &mut AgentStore, slot: usize, chain: u32, chain_type: u32, to: u32| {
            store[slot].chain = chain;
            store[slot].chain_type = Some(chain_type);
            store[slot].attached_to = Some(to);
        };
        link(&mut fx.store, 2, 1, 0, 0); // 60 from its leader
        link(&mut fx.store, 3, 2, 0, 2);
        link(&mut fx.store, 4, 1, 1, 1);

        let stats = fx.step_agent(2);
        assert_eq!(stats.detached, 1);
        assert_eq!(stats.moved, 0);
        assert_eq!(fx.store[2].chain, 0);
        assert_eq!(fx.store[2].attached_to, None);
        assert_eq!(fx.store[3].chain, 0);
        assert_eq!(fx.store[3].attached_to, None);
        assert_eq!(fx.store[4].chain, 1);
        assert_eq!(fx.store[2].position, Vec2::new(40.0, 60.0));
    }

    #[test]
    fn overtaking_follower_swaps_positions_only() {
        let run = |swap: PhenotypeSwap| {
            let mut fx = Fixture::new(&[(50.0, 30.0), (200.0, 90.0)], &[(120.0, 60.0)], |c| {
                c.policy.phenotype_swap = swap
            });
            let stats = fx.step_agent(2);
            (stats, fx.store)
        };

        let (stats, store) = run(PhenotypeSwap::PositionsOnly);
        assert_eq!(stats.swaps, 1);
        assert_eq!(store[2].position, Vec2::new(50.0, 30.0));
        assert!(store[0].position.x > 119.0);
        assert_eq!(store[0].kind, CellKind::Leader);
        assert_eq!(store[2].kind, CellKind::Follower);
        assert_eq!(store[2].chain, 0);

        let (stats, store) = run(PhenotypeSwap::Disabled);
        assert_eq!(stats.swaps, 0);
        assert_eq!(store[0].position, Vec2::new(50.0, 30.0));
    }

    #[test]
    fn per_commit_policy_updates_the_index_immediately() {
        let run = |policy: IndexRefresh| {
            let mut fx = Fixture::new(&[(100.0, 60.0)], &[], |c| {
                c.policy.index_refresh = policy;
                c.cell_params.persistence_steps = 3;
            });
            fx.store[0].persistent = true;
            fx.store[0].direction = Vec2::new(0.14, 0.0);
            fx.step_agent(0);
            let indexed = fx.index.indexed_position(0);
            fx.rebuild_index();
            (indexed, fx.index.indexed_position(0))
        };

        let (during, after) = run(IndexRefresh::PerCommit);
        assert_eq!(during, after);
        let (during, after) = run(IndexRefresh::Stale);
        assert_eq!(during, Some(Vec2::new(100.0, 60.0)));
        assert_ne!(during, after);
    }

    #[test]
    fn stale_index_lets_converging_leaders_overlap() {
        let run = |policy: IndexRefresh| {
            let mut fx = Fixture::new(&[(100.0, 60.0), (115.2, 60.0)], &[], |c| {
                c.policy.index_refresh = policy;
                c.cell_params.persistence_steps = 3;
            });
            fx.store[0].persistent = true;
            fx.store[0].direction = Vec2::new(0.14, 0.0);
            fx.store[1].persistent = true;
            fx.store[1].direction = Vec2::new(-0.14, 0.0);
            let stats = fx.sweep().run(&[0, 1]);
            (stats, fx.store[0].position.distance(fx.store[1].position))
        };

        // Both destinations clear the other's snapshot position, so both commit.
        let (stats, gap) = run(IndexRefresh::Stale);
        assert_eq!(stats.moved, 2);
        assert!(gap < 15.0);

        let (stats, gap) = run(IndexRefresh::PerCommit);
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.blocked, 1);
        assert!(gap >= 15.0);
    }

    #[test]
    fn full_sweep_visits_everyone_once() {
        let mut fx = Fixture::new(&[(100.0, 30.0), (100.0, 90.0)], &[(200.0, 60.0), (250.0, 60.0)], |_| {});
        let order = sweep_order(fx.store.len(), &mut StdRng::seed_from_u64(1));
        let stats = fx.sweep().run(&order);
        assert_eq!(stats.moved + stats.blocked, 4);
        assert_eq!(stats.attached, 0);
    }
}
