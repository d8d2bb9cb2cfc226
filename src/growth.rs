use migration_common::SimParams;
use log::debug;

/// Piecewise-constant strain field and the growth map it integrates into.
///
/// `gamma[i]` is the physical x coordinate of grid column `i`. It is
/// recomputed each step from the per-column stretch `exp(t * strain[i])`,
/// starting from `gamma[0] = 0`.
#[derive(Debug, Clone)]
pub struct GrowthModel {
    strain: Vec<f64>,
    /// Gamma_x: per-column stretch multiplier.
    stretch: Vec<f64>,
    gamma: Vec<f64>,
    gamma_old: Vec<f64>,
    /// Gamma_t: per-column growth rate over the last step.
    rate: Vec<f64>,
    dx: f64,
    dt: f64,
}

/// Growth exponents `(first segment, second segment)` that stretch the domain
/// to `params.final_length` at `params.final_time`.
///
/// Solves `n * xvar * L_fast + xvar * L_slow = final_length` for the common
/// factor `xvar`; the fast segment then grows by `n * xvar` and the slow one
/// by `xvar` over the whole run.
pub fn segment_exponents(params: &SimParams) -> (f64, f64) {
    let length = params.length_x as f64;
    let theta = params.segment_boundary.min(params.length_x) as f64 / length;
    let n = params.faster_ratio;

    let (fast_len, slow_len) = if params.first_segment_faster {
        (length * theta, length * (1.0 - theta))
    } else {
        (length * (1.0 - theta), length * theta)
    };
    let xvar = params.final_length / (n * fast_len + slow_len);

    let fast = (n * xvar).ln() / params.final_time;
    let slow = xvar.ln() / params.final_time;
    if params.first_segment_faster {
        (fast, slow)
    } else {
        (slow, fast)
    }
}

impl GrowthModel {
    /// Builds the strain field and the identity map of an unstretched domain.
    pub fn new(params: &SimParams) -> Self {
        let length_x = params.length_x;
        let (alpha1, alpha2) = segment_exponents(params);
        let boundary = params.segment_boundary.min(length_x);
        debug!(
            "Growth exponents: alpha1={:.6} (columns 0..{}), alpha2={:.6} (columns {}..{})",
            alpha1, boundary, alpha2, boundary, length_x
        );

        let strain: Vec<f64> = (0..length_x)
            .map(|i| if i < boundary { alpha1 } else { alpha2 })
            .collect();
        let gamma: Vec<f64> = (0..length_x).map(|i| i as f64).collect();

        Self {
            strain,
            stretch: vec![1.0; length_x],
            gamma_old: gamma.clone(),
            gamma,
            rate: vec![0.0; length_x],
            dx: params.dx,
            dt: params.dt,
        }
    }

    /// Recomputes stretch, growth map and growth rate for elapsed time `t`.
    /// `gamma_old` keeps the previous map until [`GrowthModel::commit`].
    pub fn advance(&mut self, t: f64) {
        for (s, &alpha) in self.stretch.iter_mut().zip(&self.strain) {
            *s = (t * alpha).exp();
        }

        // Column 0 cannot be integrated; it is pinned at the origin.
        self.gamma[0] = 0.0;
        for i in 1..self.gamma.len() {
            self.gamma[i] = self.stretch[i] * self.dx + self.gamma[i - 1];
        }

        for ((r, &g), &g_old) in self.rate.iter_mut().zip(&self.gamma).zip(&self.gamma_old) {
            *r = (g - g_old) / self.dt;
        }
    }

    /// Largest column whose previous physical coordinate does not exceed `x`.
    pub fn segment_index(&self, x: f64) -> usize {
        self.gamma_old.partition_point(|&g| g <= x).saturating_sub(1)
    }

    /// How far the growth of the last step carried column `j`.
    pub fn displacement(&self, j: usize) -> f64 {
        self.gamma[j] - self.gamma_old[j]
    }

    /// Makes the current map the reference for the next step.
    pub fn commit(&mut self) {
        self.gamma_old.copy_from_slice(&self.gamma);
    }

    /// Converts a grid-unit length at column `j` to physical units: `j / Gamma(j)`.
    pub fn local_scale(&self, j: usize) -> f64 {
        match self.gamma.get(j) {
            Some(&g) if g > 0.0 => j as f64 / g,
            _ => 1.0,
        }
    }

    /// Smallest stretch multiplier any column reaches over `[0, final_time]`.
    pub fn min_stretch(&self, final_time: f64) -> f64 {
        self.strain
            .iter()
            .map(|&alpha| (final_time * alpha.min(0.0)).exp())
            .fold(1.0, f64::min)
    }

    /// Physical x coordinate of column `i`.
    pub fn physical_x(&self, i: usize) -> f64 {
        self.gamma[i]
    }

    /// Physical domain length, `Gamma(last)`.
    pub fn domain_length(&self) -> f64 {
        self.gamma.last().copied().unwrap_or(0.0)
    }

    pub fn gamma(&self) -> &[f64] {
        &self.gamma
    }

    pub fn gamma_old(&self) -> &[f64] {
        &self.gamma_old
    }

    pub fn stretch(&self) -> &[f64] {
        &self.stretch
    }

    pub fn strain(&self) -> &[f64] {
        &self.strain
    }

    pub fn growth_rate(&self) -> &[f64] {
        &self.rate
    }
}
