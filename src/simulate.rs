//! # Longitudinal Data Simulator
//!
//! Draws one realization of the response vector under a linear mixed model
//! with a random intercept and a random slope on time. Subjects are
//! independent, so instead of materializing the dense N·K × N·K
//! block-diagonal covariance, the shared per-subject K×K marginal covariance
//! `Σ = Z·R·Zᵀ + σ²·I` is factored once and each subject's vector is drawn
//! as `μᵢ + L·z`.
//!
//! Sampled values are floored and clamped at zero to land on the bounded
//! ordinal response scale.

use crate::design::Design;
use ndarray::{Array1, Array2};
use ndarray_linalg::{Cholesky, UPLO};
use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

/// Numerical failures during response simulation. All of these are fatal:
/// the parameters must be corrected, there is nothing to retry against.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(
        "random-effects covariance is not positive semi-definite: \
         var_intercept * var_slope = {product:.6} < cov^2 = {cov_sq:.6}"
    )]
    NotPositiveSemiDefinite { product: f64, cov_sq: f64 },

    #[error("fixed-effects vector has length {found}, but the design has {expected} columns")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Cholesky factorization of the marginal covariance failed: {0}")]
    CholeskyFailed(ndarray_linalg::error::LinalgError),
}

/// Population parameters of the generating linear mixed model.
#[derive(Debug, Clone)]
pub struct ResponseModel {
    /// Fixed-effects vector β, one entry per design column.
    pub beta: Array1<f64>,
    /// Standard deviation of the random intercept (σ0).
    pub sd_intercept: f64,
    /// Standard deviation of the random slope on time (σ1).
    pub sd_slope: f64,
    /// Covariance between random intercept and random slope (σr).
    pub cov_intercept_slope: f64,
    /// Residual standard deviation (σ).
    pub sd_residual: f64,
}

impl ResponseModel {
    /// The 2×2 random-effects covariance matrix
    /// `R = [[σ0², σr], [σr, σ1²]]`.
    pub fn random_effects_cov(&self) -> Array2<f64> {
        let v0 = self.sd_intercept * self.sd_intercept;
        let v1 = self.sd_slope * self.sd_slope;
        let c = self.cov_intercept_slope;
        ndarray::array![[v0, c], [c, v1]]
    }

    fn validate(&self, design_cols: usize) -> Result<(), SimulationError> {
        if self.beta.len() != design_cols {
            return Err(SimulationError::DimensionMismatch {
                expected: design_cols,
                found: self.beta.len(),
            });
        }
        let product =
            self.sd_intercept * self.sd_intercept * self.sd_slope * self.sd_slope;
        let cov_sq = self.cov_intercept_slope * self.cov_intercept_slope;
        if product < cov_sq {
            return Err(SimulationError::NotPositiveSemiDefinite { product, cov_sq });
        }
        Ok(())
    }
}

/// Floors a sampled value and clamps it at zero.
///
/// The response scale is bounded below (0 = no symptoms); values above the
/// instrument's natural maximum are deliberately left untouched. The
/// transform is idempotent.
pub fn truncate_to_scale(value: f64) -> f64 {
    value.floor().max(0.0)
}

/// The shared per-subject marginal covariance `Σ = Z·R·Zᵀ + σ²·I_K`, where
/// `Z = [1, time]` over the shared visit grid.
pub fn marginal_covariance(time_grid: &[f64], model: &ResponseModel) -> Array2<f64> {
    let k = time_grid.len();
    let mut z = Array2::zeros((k, 2));
    for (v, &t) in time_grid.iter().enumerate() {
        z[[v, 0]] = 1.0;
        z[[v, 1]] = t;
    }
    let r = model.random_effects_cov();
    let mut sigma = z.dot(&r).dot(&z.t());
    let resid = model.sd_residual * model.sd_residual;
    for v in 0..k {
        sigma[[v, v]] += resid;
    }
    sigma
}

/// Draws one response per design row.
///
/// Consumes exactly `n_subjects * K` standard-normal draws from `rng`:
/// subjects in id order, each subject's K draws in visit order. Reordering
/// these draws changes the realized dataset under a fixed seed.
pub fn simulate_responses<R: Rng>(
    design: &Design,
    model: &ResponseModel,
    rng: &mut R,
) -> Result<Array1<f64>, SimulationError> {
    model.validate(design.matrix.ncols())?;

    let sigma = marginal_covariance(&design.time_grid(), model);
    let lower = sigma
        .cholesky(UPLO::Lower)
        .map_err(SimulationError::CholeskyFailed)?;

    let mean = design.matrix.dot(&model.beta);
    let k = design.visits;
    let mut responses = Array1::zeros(mean.len());
    for i in 0..design.n_subjects {
        let z: Array1<f64> = (0..k).map(|_| rng.sample(StandardNormal)).collect();
        let noise = lower.dot(&z);
        for v in 0..k {
            let row = i * k + v;
            responses[row] = truncate_to_scale(mean[row] + noise[v]);
        }
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{DesignSpec, build_design};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model() -> ResponseModel {
        ResponseModel {
            beta: array![10.0, -1.0 / 6.0, 0.0, -0.5],
            sd_intercept: 2.15,
            sd_slope: 0.25,
            cov_intercept_slope: -0.125,
            sd_residual: 2.0,
        }
    }

    #[test]
    fn marginal_covariance_is_symmetric_psd() {
        let sigma = marginal_covariance(&[0.0, 3.0, 6.0], &model());

        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(sigma[[i, j]], sigma[[j, i]], epsilon = 1e-12);
            }
        }
        // PSD iff the Cholesky factorization exists.
        assert!(sigma.cholesky(UPLO::Lower).is_ok());
    }

    #[test]
    fn psd_violation_is_rejected_before_any_draw() {
        let spec = DesignSpec::two_arm(5, 5, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let design = build_design(&spec, &mut rng).unwrap();

        let mut bad = model();
        bad.cov_intercept_slope = 2.0; // 2^2 > 2.15^2 * 0.25^2
        match simulate_responses(&design, &bad, &mut rng) {
            Err(SimulationError::NotPositiveSemiDefinite { product, cov_sq }) => {
                assert!(product < cov_sq);
            }
            other => panic!("expected NotPositiveSemiDefinite, got {other:?}"),
        }
    }

    #[test]
    fn beta_length_must_match_design() {
        let spec = DesignSpec::two_arm(2, 2, 3);
        let mut rng = StdRng::seed_from_u64(2);
        let design = build_design(&spec, &mut rng).unwrap();

        let mut bad = model();
        bad.beta = array![10.0, -1.0];
        assert!(matches!(
            simulate_responses(&design, &bad, &mut rng),
            Err(SimulationError::DimensionMismatch {
                expected: 4,
                found: 2
            })
        ));
    }

    #[test]
    fn truncation_is_idempotent_and_nonnegative() {
        for &v in &[-3.7, -0.2, 0.0, 0.4, 2.9, 11.0] {
            let once = truncate_to_scale(v);
            assert!(once >= 0.0);
            assert_abs_diff_eq!(truncate_to_scale(once), once, epsilon = 0.0);
            assert_abs_diff_eq!(once.fract(), 0.0, epsilon = 0.0);
        }
        // Values above the instrument maximum are not clamped.
        assert_abs_diff_eq!(truncate_to_scale(37.9), 37.0, epsilon = 0.0);
    }

    #[test]
    fn responses_are_on_the_integer_scale() {
        let spec = DesignSpec::two_arm(20, 20, 3);
        let mut rng = StdRng::seed_from_u64(3);
        let design = build_design(&spec, &mut rng).unwrap();
        let responses = simulate_responses(&design, &model(), &mut rng).unwrap();

        assert_eq!(responses.len(), 120);
        for &y in responses.iter() {
            assert!(y >= 0.0);
            assert_abs_diff_eq!(y.fract(), 0.0, epsilon = 0.0);
        }
    }

    #[test]
    fn fixed_seed_reproduces_the_draw() {
        let spec = DesignSpec::two_arm(10, 10, 3);

        let mut rng_a = StdRng::seed_from_u64(42);
        let design_a = build_design(&spec, &mut rng_a).unwrap();
        let first = simulate_responses(&design_a, &model(), &mut rng_a).unwrap();

        let mut rng_b = StdRng::seed_from_u64(42);
        let design_b = build_design(&spec, &mut rng_b).unwrap();
        let second = simulate_responses(&design_b, &model(), &mut rng_b).unwrap();

        assert_eq!(first, second);
    }
}
