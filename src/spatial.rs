use migration_common::Vec2;
use log::warn;
use rayon::prelude::*;

/// An agent returned by a radius query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Slot of the agent in the agent store.
    pub index: usize,
    /// Indexed position of the agent minus the query point.
    pub offset: Vec2,
}

impl Neighbor {
    pub fn distance(&self) -> f64 {
        self.offset.length()
    }
}

/// Uniform bucket grid over a padded copy of the domain.
///
/// Positions are copied in on [`SpatialIndex::rebuild`]; queries answer
/// against that copy until the next rebuild or [`SpatialIndex::relocate`].
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    inv_cell_size: f64,
    grid_dim_x: u32,
    grid_dim_y: u32,
    padding: f64,

    // --- Indexed state ---
    positions: Vec<Vec2>,
    // Grid cell index for each agent
    agent_grid_indices: Vec<u32>,
    // Number of agents in each grid cell
    cell_counts: Vec<u32>,
    // Start index in cell_agent_indices for each grid cell (prefix sum)
    cell_starts: Vec<u32>,
    // Agent indices sorted by grid cell
    cell_agent_indices: Vec<u32>,
}

impl SpatialIndex {
    /// Creates an empty index covering `padding` times the `width x height` domain.
    pub fn new(width: f64, height: f64, cell_size: f64, padding: f64) -> Self {
        let cell_size = cell_size.max(1e-6);
        let mut index = Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            grid_dim_x: 1,
            grid_dim_y: 1,
            padding,
            positions: Vec::new(),
            agent_grid_indices: Vec::new(),
            cell_counts: Vec::new(),
            cell_starts: Vec::new(),
            cell_agent_indices: Vec::new(),
        };
        index.resize(width * padding, height * padding);
        index
    }

    fn resize(&mut self, width: f64, height: f64) {
        self.grid_dim_x = ((width * self.inv_cell_size).ceil() as u32).max(1);
        self.grid_dim_y = ((height * self.inv_cell_size).ceil() as u32).max(1);
        let cells = (self.grid_dim_x * self.grid_dim_y) as usize;
        self.cell_counts = vec![0; cells];
        self.cell_starts = vec![0; cells];
    }

    fn extent(&self) -> (f64, f64) {
        (
            self.grid_dim_x as f64 * self.cell_size,
            self.grid_dim_y as f64 * self.cell_size,
        )
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position of agent `index` as seen by queries.
    pub fn indexed_position(&self, index: usize) -> Option<Vec2> {
        self.positions.get(index).copied()
    }

    // Calculates the 1D grid cell index for a given position
    #[inline(always)]
    fn cell_of(&self, pos: Vec2) -> u32 {
        let grid_x = ((pos.x * self.inv_cell_size).floor().max(0.0) as u32).min(self.grid_dim_x - 1);
        let grid_y = ((pos.y * self.inv_cell_size).floor().max(0.0) as u32).min(self.grid_dim_y - 1);
        grid_y * self.grid_dim_x + grid_x
    }

    /// Rebuilds the buckets from `positions` (slot order).
    pub fn rebuild(&mut self, positions: &[Vec2]) {
        self.positions.clear();
        self.positions.extend_from_slice(positions);

        // Grow the padded search domain if the tissue has outgrown it.
        let (width, height) = self.extent();
        let max_x = positions.iter().map(|p| p.x).fold(0.0, f64::max);
        let max_y = positions.iter().map(|p| p.y).fold(0.0, f64::max);
        if max_x >= width || max_y >= height {
            warn!(
                "Agents reach ({:.1}, {:.1}) beyond the indexed extent ({:.1} x {:.1}); enlarging the index.",
                max_x, max_y, width, height
            );
            self.resize(
                (max_x.max(width) + self.cell_size) * self.padding,
                (max_y.max(height) + self.cell_size) * self.padding,
            );
        }

        let count = positions.len();

        // Phase 1: Assign grid indices to each agent (Parallel).
        let mut grid_indices = std::mem::take(&mut self.agent_grid_indices);
        grid_indices.resize(count, 0);
        {
            let index = &*self;
            grid_indices
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(grid_idx_out, &pos)| *grid_idx_out = index.cell_of(pos));
        }
        self.agent_grid_indices = grid_indices;

        // Phase 2: Count agents in each grid cell (Serial).
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        for &grid_idx in &self.agent_grid_indices {
            self.cell_counts[grid_idx as usize] += 1;
        }

        // Phase 3: Calculate cell start indices using a prefix sum.
        let mut total_sum = 0;
        for (start, &cell_count) in self.cell_starts.iter_mut().zip(&self.cell_counts) {
            *start = total_sum;
            total_sum += cell_count;
        }

        // Phase 4: Scatter agents into their buckets in slot order, so bucket
        // contents (and therefore query order) are deterministic.
        self.cell_agent_indices.resize(count, 0);
        let mut write_offsets = self.cell_starts.clone();
        for (agent_idx, &grid_idx) in self.agent_grid_indices.iter().enumerate() {
            let slot = &mut write_offsets[grid_idx as usize];
            self.cell_agent_indices[*slot as usize] = agent_idx as u32;
            *slot += 1;
        }
    }

    /// Moves one indexed agent; rebuilds only if it changed bucket.
    pub fn relocate(&mut self, index: usize, pos: Vec2) {
        if index >= self.positions.len() {
            let mut positions = self.positions.clone();
            positions.resize(index + 1, pos);
            positions[index] = pos;
            self.rebuild(&positions);
            return;
        }
        let (width, height) = self.extent();
        if pos.x < width && pos.y < height && self.cell_of(pos) == self.agent_grid_indices[index] {
            self.positions[index] = pos;
        } else {
            let mut positions = std::mem::take(&mut self.positions);
            positions[index] = pos;
            self.rebuild(&positions);
        }
    }

    /// Visits every indexed agent strictly within `radius` of `point`.
    pub fn for_each_within<F>(&self, point: Vec2, radius: f64, mut f: F)
    where
        F: FnMut(Neighbor),
    {
        if self.positions.is_empty() || radius <= 0.0 {
            return;
        }
        let radius_sq = radius * radius;
        let reach = (radius * self.inv_cell_size).ceil() as i64;
        let center_x = (point.x * self.inv_cell_size).floor() as i64;
        let center_y = (point.y * self.inv_cell_size).floor() as i64;

        let dim_x = self.grid_dim_x as i64;
        let dim_y = self.grid_dim_y as i64;
        // Agents outside the extent were clamped into the edge buckets.
        let x_lo = (center_x - reach).clamp(0, dim_x - 1);
        let x_hi = (center_x + reach).clamp(0, dim_x - 1);
        let y_lo = (center_y - reach).clamp(0, dim_y - 1);
        let y_hi = (center_y + reach).clamp(0, dim_y - 1);

        for gy in y_lo..=y_hi {
            for gx in x_lo..=x_hi {
                let grid_idx = (gy * dim_x + gx) as usize;
                let start = self.cell_starts[grid_idx] as usize;
                let end = start + self.cell_counts[grid_idx] as usize;
                for &agent_idx in &self.cell_agent_indices[start..end] {
                    let offset = self.positions[agent_idx as usize] - point;
                    if offset.length_squared() < radius_sq {
                        f(Neighbor { index: agent_idx as usize, offset });
                    }
                }
            }
        }
    }

    /// All indexed agents strictly within `radius` of `point`.
    pub fn query(&self, point: Vec2, radius: f64) -> Vec<Neighbor> {
        let mut found = Vec::new();
        self.for_each_within(point, radius, |n| found.push(n));
        found
    }

    /// True if no indexed agent other than `exclude` is strictly within `radius` of `point`.
    pub fn is_free(&self, point: Vec2, radius: f64, exclude: Option<usize>) -> bool {
        let mut free = true;
        self.for_each_within(point, radius, |n| {
            if Some(n.index) != exclude {
                free = false;
            }
        });
        free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(positions: &[Vec2], point: Vec2, radius: f64) -> Vec<usize> {
        let mut found: Vec<usize> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance_squared(point) < radius * radius)
            .map(|(i, _)| i)
            .collect();
        found.sort_unstable();
        found
    }

    fn scattered_positions() -> Vec<Vec2> {
        (0..200)
            .map(|i| {
                let t = i as f64;
                Vec2::new((t * 37.3) % 340.0, (t * 11.7) % 119.0)
            })
            .collect()
    }

    #[test]
    fn query_matches_brute_force() {
        let positions = scattered_positions();
        let mut index = SpatialIndex::new(342.0, 120.0, 15.0, 5.0);
        index.rebuild(&positions);

        for (point, radius) in [
            (Vec2::new(100.0, 60.0), 15.0),
            (Vec2::new(0.0, 0.0), 27.5),
            (Vec2::new(339.0, 118.0), 45.0),
            (Vec2::new(170.0, 3.0), 80.0),
        ] {
            let mut got: Vec<usize> = index.query(point, radius).iter().map(|n| n.index).collect();
            got.sort_unstable();
            assert_eq!(got, brute_force(&positions, point, radius));
        }
    }

    #[test]
    fn offsets_point_from_query_to_agent() {
        let mut index = SpatialIndex::new(100.0, 100.0, 10.0, 2.0);
        index.rebuild(&[Vec2::new(10.0, 10.0), Vec2::new(50.0, 50.0)]);
        let hits = index.query(Vec2::new(13.0, 14.0), 15.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[0].offset, Vec2::new(-3.0, -4.0));
        assert_eq!(hits[0].distance(), 5.0);
    }

    #[test]
    fn boundary_distance_is_exclusive() {
        let mut index = SpatialIndex::new(100.0, 100.0, 15.0, 2.0);
        index.rebuild(&[Vec2::new(30.0, 30.0)]);
        assert!(index.is_free(Vec2::new(45.0, 30.0), 15.0, None));
        assert!(!index.is_free(Vec2::new(44.9, 30.0), 15.0, None));
        assert!(index.is_free(Vec2::new(44.9, 30.0), 15.0, Some(0)));
    }

    #[test]
    fn queries_see_positions_as_of_last_refresh() {
        let mut positions = vec![Vec2::new(20.0, 20.0), Vec2::new(80.0, 20.0)];
        let mut index = SpatialIndex::new(100.0, 50.0, 15.0, 5.0);
        index.rebuild(&positions);

        positions[1] = Vec2::new(25.0, 20.0);
        assert_eq!(index.query(Vec2::new(22.0, 20.0), 15.0).len(), 1);

        index.relocate(1, positions[1]);
        assert_eq!(index.query(Vec2::new(22.0, 20.0), 15.0).len(), 2);
        assert_eq!(index.indexed_position(1), Some(positions[1]));
    }

    #[test]
    fn outgrown_extent_is_enlarged() {
        let mut index = SpatialIndex::new(10.0, 10.0, 5.0, 1.0);
        let far = Vec2::new(500.0, 5.0);
        index.rebuild(&[Vec2::new(2.0, 2.0), far]);
        let hits = index.query(Vec2::new(498.0, 5.0), 5.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 1);
        assert!(index.extent().0 > 500.0);
    }
}
