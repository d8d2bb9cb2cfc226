use crate::agent::AgentStore;
use crate::spatial::SpatialIndex;
use anyhow::Result;
use log::trace;
use migration_common::{SimParams, Vec2};
use rand::distr::Uniform;
use rand::prelude::*;

/// True if a proposal is due at `step`; an interval of 0 disables insertion.
pub fn is_due(params: &SimParams, step: u32) -> bool {
    let interval = params.insertion_interval_steps;
    interval > 0 && step % interval == 0
}

/// Entrance point with height `y`.
pub fn entrance(params: &SimParams, y: f64) -> Vec2 {
    Vec2::new(params.radius, y)
}

/// Appends a follower at `point` unless an indexed agent lies within one diameter.
///
/// Returns the new id, or `None` when the proposal is dropped.
pub fn try_place(store: &mut AgentStore, index: &SpatialIndex, params: &SimParams, point: Vec2) -> Option<u32> {
    if !index.is_free(point, params.diameter, None) {
        trace!("Insertion at ({:.2}, {:.2}) rejected: entrance occupied.", point.x, point.y);
        return None;
    }
    Some(store.add_follower(point, params.radius))
}

/// Draws one entrance height from `rng` and tries to place a follower there.
/// Rejected proposals are not retried.
pub fn propose<R: Rng>(
    store: &mut AgentStore,
    index: &SpatialIndex,
    params: &SimParams,
    rng: &mut R,
) -> Result<Option<u32>> {
    let y_dist = Uniform::new(params.radius, params.y_max())?;
    let y = rng.sample(y_dist);
    Ok(try_place(store, index, params, entrance(params, y)))
}
