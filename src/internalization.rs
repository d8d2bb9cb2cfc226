use crate::growth::GrowthModel;
use migration_common::{SimParams, Vec2};
use rayon::prelude::*;

/// Per-grid-cell uptake weight: a Gaussian kernel summed over all agents.
///
/// Same layout as [`crate::field::ChemoField`]. Recomputed from scratch every step.
#[derive(Debug, Clone)]
pub struct Internalization {
    length_y: usize,
    values: Vec<f64>,
    /// Agent positions sorted by x, reused between steps.
    sorted: Vec<Vec2>,
}

impl Internalization {
    pub fn new(params: &SimParams) -> Self {
        Self {
            length_y: params.length_y,
            values: vec![0.0; params.length_x * params.length_y],
            sorted: Vec::new(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.length_y + j]
    }

    /// Sums `exp(-((Gamma(i) - x)^2 + (j - y)^2) / (2 r^2))` over all agents for
    /// every cell `(i, j)`.
    ///
    /// Agents further than `params.kernel_cutoff` from a column along x are
    /// skipped. Columns are processed in parallel; each cell sums its agents in
    /// x order, so the result does not depend on the thread count.
    pub fn accumulate(&mut self, growth: &GrowthModel, positions: &[Vec2], params: &SimParams) {
        self.sorted.clear();
        self.sorted.extend_from_slice(positions);
        self.sorted.sort_by(|a, b| a.x.total_cmp(&b.x));

        let inv_two_r2 = 1.0 / (2.0 * params.radius * params.radius);
        let cutoff = params.kernel_cutoff;
        let gamma = growth.gamma();
        let sorted = &self.sorted;

        self.values
            .par_chunks_mut(self.length_y)
            .enumerate()
            .for_each(|(i, column)| {
                let gx = gamma[i];
                let nearby = match cutoff {
                    Some(c) => {
                        let lo = sorted.partition_point(|p| p.x < gx - c);
                        let hi = sorted.partition_point(|p| p.x <= gx + c);
                        &sorted[lo..hi]
                    }
                    None => &sorted[..],
                };

                for (j, out) in column.iter_mut().enumerate() {
                    let y = j as f64;
                    *out = nearby
                        .iter()
                        .map(|p| {
                            let dx = gx - p.x;
                            let dy = y - p.y;
                            (-(dx * dx + dy * dy) * inv_two_r2).exp()
                        })
                        .sum();
                }
            });
    }
}
