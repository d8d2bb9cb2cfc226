use crate::growth::GrowthModel;
use migration_common::SimParams;
use rayon::prelude::*;

/// Chemoattractant concentration on the fixed `length_x x length_y` grid.
///
/// Storage is column-major in x: cell `(i, j)` lives at `i * length_y + j`,
/// so each x column is a contiguous slice.
#[derive(Debug, Clone)]
pub struct ChemoField {
    length_x: usize,
    length_y: usize,
    // --- Ping-Pong Buffers ---
    concentration: Vec<f64>,
    next: Vec<f64>,
}

/// Largest explicit time step the stencil tolerates.
///
/// The x coefficients scale with `1 / Gamma_x^2`, so the bound tightens when
/// any column's stretch drops below 1:
/// `dt <= 1 / (2 D (1 / (dx^2 * min_stretch^2) + 1 / dy^2))`.
pub fn stable_time_step(params: &SimParams, min_stretch: f64) -> f64 {
    if params.diffusion <= 0.0 {
        return f64::INFINITY;
    }
    let sx = params.dx * min_stretch;
    let inv = 2.0 * params.diffusion * (1.0 / (sx * sx) + 1.0 / (params.dy * params.dy));
    1.0 / inv
}

impl ChemoField {
    /// Creates a field filled with the configured initial concentration.
    pub fn new(params: &SimParams) -> Self {
        let cells = params.length_x * params.length_y;
        Self {
            length_x: params.length_x,
            length_y: params.length_y,
            concentration: vec![params.initial_concentration; cells],
            next: vec![params.initial_concentration; cells],
        }
    }

    #[inline(always)]
    fn idx(&self, i: usize, j: usize) -> usize {
        i * self.length_y + j
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.length_x, self.length_y)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.concentration[self.idx(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.idx(i, j);
        self.concentration[idx] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.concentration
    }

    /// Concentration at grid indices; anything outside the grid reads 0.
    pub fn sample(&self, i: i64, j: i64) -> f64 {
        if i < 0 || j < 0 || i >= self.length_x as i64 || j >= self.length_y as i64 {
            return 0.0;
        }
        self.get(i as usize, j as usize)
    }

    /// Concentration at the grid point nearest to `(x, y)` in grid units.
    pub fn sample_rounded(&self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        self.sample(x.round() as i64, y.round() as i64)
    }

    /// Advances the field by one explicit Euler step.
    ///
    /// `sink` is the internalization grid (same layout as the field). Interior
    /// cells get diffusion in the stretched x coordinate, plain diffusion in y,
    /// uptake, logistic production and dilution by the local strain; edges then
    /// copy their interior neighbour.
    pub fn step(&mut self, growth: &GrowthModel, sink: &[f64], params: &SimParams) {
        let (nx, ny) = (self.length_x, self.length_y);
        let dt = params.dt;
        let diffusion = params.diffusion;
        let inv_dy2 = 1.0 / (params.dy * params.dy);
        let two_dx2 = 2.0 * params.dx * params.dx;
        let sink_coefficient = params.sink_coefficient;
        let reaction = params.reaction_rate;

        let stretch = growth.stretch();
        let strain = growth.strain();
        let c = &self.concentration;

        self.next
            .par_chunks_mut(ny)
            .enumerate()
            .filter(|(i, _)| *i > 0 && *i < nx - 1)
            .for_each(|(i, column_out)| {
                let gx = stretch[i];
                let w_right = 1.0 / gx + 1.0 / stretch[i + 1];
                let w_left = 1.0 / gx + 1.0 / stretch[i - 1];
                let coeff_x = diffusion / (two_dx2 * gx);

                let left = &c[(i - 1) * ny..i * ny];
                let centre = &c[i * ny..(i + 1) * ny];
                let right = &c[(i + 1) * ny..(i + 2) * ny];
                let uptake = &sink[i * ny..(i + 1) * ny];

                for j in 1..ny - 1 {
                    let u = centre[j];
                    let diffusion_x = coeff_x * (w_right * (right[j] - u) - w_left * (u - left[j]));
                    let diffusion_y = diffusion * (centre[j + 1] - 2.0 * u + centre[j - 1]) * inv_dy2;
                    let internalization = u * sink_coefficient * uptake[j];
                    let production = reaction * u * (1.0 - u);
                    let dilution = strain[i] * u;
                    column_out[j] =
                        u + dt * (diffusion_x + diffusion_y - internalization + production - dilution);
                }
            });

        // Zero-flux edges: x edges first, then y edges (corners follow y).
        for j in 0..ny {
            self.next[j] = self.next[ny + j];
            self.next[(nx - 1) * ny + j] = self.next[(nx - 2) * ny + j];
        }
        for i in 0..nx {
            let base = i * ny;
            self.next[base] = self.next[base + 1];
            self.next[base + ny - 1] = self.next[base + ny - 2];
        }

        std::mem::swap(&mut self.concentration, &mut self.next);
    }

    /// Smallest concentration currently on the grid.
    pub fn min_value(&self) -> f64 {
        self.concentration.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_common::SimulationConfig;

    fn small_params(configure: impl FnOnce(&mut SimulationConfig)) -> SimParams {
        let mut config = SimulationConfig::default();
        config.domain.initial_length = 0.4;
        config.domain.height_factor = 0.3;
        config.domain.final_length = 60.0;
        configure(&mut config);
        config.get_sim_params()
    }

    #[test]
    fn out_of_grid_samples_read_zero() {
        let params = small_params(|_| {});
        let field = ChemoField::new(&params);
        assert_eq!(field.sample(-1, 3), 0.0);
        assert_eq!(field.sample(3, params.length_y as i64), 0.0);
        assert_eq!(field.sample(3, 3), 1.0);
        assert_eq!(field.sample_rounded(2.6, 4.4), field.get(3, 4));
        assert_eq!(field.sample_rounded(f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn saturated_field_only_dilutes() {
        let params = small_params(|_| {});
        let mut growth = GrowthModel::new(&params);
        growth.advance(params.dt);
        let mut field = ChemoField::new(&params);
        let sink = vec![0.0; params.length_x * params.length_y];
        field.step(&growth, &sink, &params);

        // c = 1 is a fixed point of the logistic term, so only -strain * c acts.
        let expected = 1.0 - params.dt * growth.strain()[5];
        assert!((field.get(5, 5) - expected).abs() < 1e-12);
        assert!(field.min_value() < 1.0);
    }

    #[test]
    fn edges_replicate_interior_neighbours() {
        let params = small_params(|c| c.chemo.reaction_rate = 0.0);
        let growth = GrowthModel::new(&params);
        let mut field = ChemoField::new(&params);
        let (nx, ny) = field.dims();
        for i in 0..nx {
            for j in 0..ny {
                field.set(i, j, (i * 7 + j * 3) as f64 / 100.0);
            }
        }
        let sink = vec![0.0; nx * ny];
        field.step(&growth, &sink, &params);

        for j in 1..ny - 1 {
            assert_eq!(field.get(0, j), field.get(1, j));
            assert_eq!(field.get(nx - 1, j), field.get(nx - 2, j));
        }
        for i in 0..nx {
            assert_eq!(field.get(i, 0), field.get(i, 1));
            assert_eq!(field.get(i, ny - 1), field.get(i, ny - 2));
        }
    }

    #[test]
    fn diffusion_spreads_a_peak_symmetrically() {
        let params = small_params(|c| {
            c.chemo.reaction_rate = 0.0;
            c.chemo.initial_concentration = 0.0;
            // No growth, so no dilution and the stencil reduces to the 5-point Laplacian.
            c.domain.final_length = 40.0;
        });
        let growth = GrowthModel::new(&params);
        let mut field = ChemoField::new(&params);
        field.set(10, 10, 1.0);
        let sink = vec![0.0; params.length_x * params.length_y];
        field.step(&growth, &sink, &params);

        assert!(growth.strain().iter().all(|&s| s == 0.0));
        let d = params.diffusion * params.dt;
        assert!((field.get(10, 10) - (1.0 - 4.0 * d)).abs() < 1e-12);
        assert!((field.get(9, 10) - d).abs() < 1e-12);
        assert_eq!(field.get(9, 10), field.get(11, 10));
        assert_eq!(field.get(10, 9), field.get(10, 11));
    }

    #[test]
    fn internalization_removes_concentration_where_agents_sit() {
        let params = small_params(|_| {});
        let growth = GrowthModel::new(&params);
        let mut field = ChemoField::new(&params);
        let mut sink = vec![0.0; params.length_x * params.length_y];
        sink[10 * params.length_y + 10] = 2.0;
        field.step(&growth, &sink, &params);
        assert!(field.get(10, 10) < field.get(20, 20));
    }

    #[test]
    fn default_time_step_is_stable() {
        let params = SimulationConfig::default().get_sim_params();
        let bound = stable_time_step(&params, 1.0);
        assert!((bound - 0.125).abs() < 1e-12);
        assert!(params.dt <= bound);
        assert!(stable_time_step(&params, 0.5) < bound);
    }
}
