//! # Linear Mixed Model Estimation via REML
//!
//! Fits `y_i = X_i β + Z_i b_i + ε_i` with a per-subject random intercept
//! and random slope on time, `b_i ~ N(0, G)` (2×2, unstructured) and
//! `ε_i ~ N(0, σ²I)`. Variance components are estimated by restricted
//! maximum likelihood using the Laird–Ware EM iteration: each pass computes
//! the GLS fixed effects for the current (G, σ²), then replaces the variance
//! components with their REML-projected conditional expectations. The 2×2
//! structure gives closed-form E-steps, so no quasi-Newton machinery is
//! needed for this model family.
//!
//! Non-convergence is a hard error: silently reporting the last iterate
//! would invalidate the downstream comparison of model variants.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use ndarray_linalg::{Cholesky, Inverse, Solve, UPLO};
use thiserror::Error;

/// Failures of the REML fit. All are fatal to the run.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("design has {x_rows} rows but the response has {y_len} entries")]
    DimensionMismatch { x_rows: usize, y_len: usize },

    #[error("coefficient names ({names}) do not match the design columns ({cols})")]
    NameMismatch { names: usize, cols: usize },

    #[error("model is saturated: {n} observations for {p} fixed effects")]
    Saturated { n: usize, p: usize },

    #[error("a linear system solve failed; the GLS cross-product may be singular: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error(
        "REML did not converge within {max_iterations} iterations; last log-likelihood change was {last_change:.6e}"
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },
}

/// Tuning knobs for the REML iteration.
#[derive(Debug, Clone)]
pub struct LmmConfig {
    /// Maximum EM iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the REML log-likelihood.
    pub tol: f64,
    /// Lower bound for variance components (prevents collapse to zero).
    pub var_floor: f64,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-6,
            var_floor: 1e-10,
        }
    }
}

/// A converged REML fit.
#[derive(Debug, Clone)]
pub struct LmmFit {
    /// Fixed-effect coefficient names, one per design column.
    pub coefficient_names: Vec<String>,
    /// GLS fixed-effect estimates.
    pub coefficients: Array1<f64>,
    /// Standard errors from the inverse GLS cross-product.
    pub std_errors: Array1<f64>,
    /// Two-sided Wald p-values.
    pub p_values: Array1<f64>,
    /// Estimated random-effects covariance G (intercept, slope).
    pub random_effects_cov: Array2<f64>,
    /// Estimated residual variance σ².
    pub sigma2: f64,
    /// REML log-likelihood (up to an additive constant) at convergence.
    pub log_reml: f64,
    /// Iterations used.
    pub iterations: usize,
}

impl LmmFit {
    /// Coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Coefficient value by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        Some(self.coefficients[self.coefficient_index(name)?])
    }

    /// Wald z-statistic for coefficient `index`.
    pub fn z_value(&self, index: usize) -> f64 {
        self.coefficients[index] / self.std_errors[index]
    }
}

/// One subject's slice of the stacked data.
struct SubjectBlock {
    x: Array2<f64>,
    z: Array2<f64>,
    y: Array1<f64>,
}

/// Fits the mixed model by REML.
///
/// `x` is the fixed-effects design (rows sorted by subject), `time` the
/// random-slope covariate, `y` the response, and `subject` the per-row
/// grouping id (rows of one subject must be contiguous). Subjects may have
/// unequal numbers of rows, which is what the exclude-rescued model variant
/// relies on.
pub fn fit_lmm(
    x: ArrayView2<'_, f64>,
    time: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    subject: &[usize],
    names: &[String],
    config: &LmmConfig,
) -> Result<LmmFit, FitError> {
    let n = y.len();
    let p = x.ncols();
    if x.nrows() != n || time.len() != n || subject.len() != n {
        return Err(FitError::DimensionMismatch {
            x_rows: x.nrows(),
            y_len: n,
        });
    }
    if names.len() != p {
        return Err(FitError::NameMismatch {
            names: names.len(),
            cols: p,
        });
    }
    if n <= p {
        return Err(FitError::Saturated { n, p });
    }

    let blocks = group_by_subject(x, time, y, subject);
    let m = blocks.len();
    log::debug!("REML fit: {n} observations, {m} subjects, {p} fixed effects");

    // Start from OLS residual variance, with a mild random-effects prior.
    let mut sigma2 = ols_variance(x, y, config)?;
    let mut g = ndarray::array![[0.5 * sigma2, 0.0], [0.0, 0.05 * sigma2]];

    let mut log_reml_prev = f64::NEG_INFINITY;
    let mut last_change = f64::INFINITY;

    for iteration in 1..=config.max_iter {
        // GLS pass under the current variance components.
        let mut cross = Array2::<f64>::zeros((p, p));
        let mut rhs = Array1::<f64>::zeros(p);
        let mut v_invs = Vec::with_capacity(m);
        let mut log_det_v = 0.0;

        for block in &blocks {
            let v = marginal_v(block, &g, sigma2);
            let chol = v
                .cholesky(UPLO::Lower)
                .map_err(FitError::LinearSystemSolveFailed)?;
            log_det_v += 2.0 * chol.diag().mapv(f64::ln).sum();
            let v_inv = v.inv().map_err(FitError::LinearSystemSolveFailed)?;
            cross = cross + block.x.t().dot(&v_inv).dot(&block.x);
            rhs = rhs + block.x.t().dot(&v_inv.dot(&block.y));
            v_invs.push(v_inv);
        }

        let beta = cross
            .solve(&rhs)
            .map_err(FitError::LinearSystemSolveFailed)?;
        let cross_inv = cross.inv().map_err(FitError::LinearSystemSolveFailed)?;
        let log_det_cross = cross
            .cholesky(UPLO::Lower)
            .map_err(FitError::LinearSystemSolveFailed)?
            .diag()
            .mapv(f64::ln)
            .sum()
            * 2.0;

        // REML log-likelihood and E-step accumulators.
        let mut quad = 0.0;
        let mut g_acc = Array2::<f64>::zeros((2, 2));
        let mut eps_acc = 0.0;

        for (block, v_inv) in blocks.iter().zip(&v_invs) {
            let r = &block.y - &block.x.dot(&beta);
            let v_inv_r = v_inv.dot(&r);
            quad += r.dot(&v_inv_r);

            // REML projection P = V⁻¹ − V⁻¹X (ΣXᵀV⁻¹X)⁻¹ XᵀV⁻¹.
            let w = v_inv.dot(&block.x);
            let p_mat = v_inv - &w.dot(&cross_inv).dot(&w.t());

            // E[b bᵀ | y] = b̂ b̂ᵀ + G − G Zᵀ P Z G.
            let b_hat = g.dot(&block.z.t()).dot(&v_inv_r);
            let shrink = g.dot(&block.z.t()).dot(&p_mat).dot(&block.z).dot(&g);
            for a in 0..2 {
                for b in 0..2 {
                    g_acc[[a, b]] += b_hat[a] * b_hat[b] + g[[a, b]] - shrink[[a, b]];
                }
            }

            // E[εᵀε | y] = ε̂ᵀε̂ + σ²·n_i − σ⁴·tr(P).
            let eps_hat = v_inv_r.mapv(|v| v * sigma2);
            let tr_p = p_mat.diag().sum();
            eps_acc += eps_hat.dot(&eps_hat) + sigma2 * block.y.len() as f64
                - sigma2 * sigma2 * tr_p;
        }

        let log_reml = -0.5 * (log_det_v + log_det_cross + quad);
        last_change = (log_reml - log_reml_prev).abs();
        if last_change < config.tol {
            log::debug!("REML converged after {iteration} iterations (log-lik {log_reml:.4})");
            let std_errors: Array1<f64> =
                (0..p).map(|j| cross_inv[[j, j]].max(0.0).sqrt()).collect();
            let p_values: Array1<f64> = (0..p)
                .map(|j| wald_p_value(beta[j], std_errors[j]))
                .collect();
            return Ok(LmmFit {
                coefficient_names: names.to_vec(),
                coefficients: beta,
                std_errors,
                p_values,
                random_effects_cov: g,
                sigma2,
                log_reml,
                iterations: iteration,
            });
        }
        log_reml_prev = log_reml;

        g = stabilize_g(g_acc.mapv(|v| v / m as f64), config.var_floor);
        sigma2 = (eps_acc / n as f64).max(config.var_floor);
    }

    Err(FitError::DidNotConverge {
        max_iterations: config.max_iter,
        last_change,
    })
}

/// Splits the stacked arrays into contiguous per-subject blocks with the
/// random-effects design `Z_i = [1, time]`.
fn group_by_subject(
    x: ArrayView2<'_, f64>,
    time: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    subject: &[usize],
) -> Vec<SubjectBlock> {
    let mut blocks = Vec::new();
    let mut start = 0;
    while start < subject.len() {
        let id = subject[start];
        let mut end = start + 1;
        while end < subject.len() && subject[end] == id {
            end += 1;
        }
        let rows = end - start;
        let mut z = Array2::zeros((rows, 2));
        for (k, row) in (start..end).enumerate() {
            z[[k, 0]] = 1.0;
            z[[k, 1]] = time[row];
        }
        blocks.push(SubjectBlock {
            x: x.slice(s![start..end, ..]).to_owned(),
            z,
            y: y.slice(s![start..end]).to_owned(),
        });
        start = end;
    }
    blocks
}

/// `V_i = Z_i G Z_iᵀ + σ² I`.
fn marginal_v(block: &SubjectBlock, g: &Array2<f64>, sigma2: f64) -> Array2<f64> {
    let mut v = block.z.dot(g).dot(&block.z.t());
    for i in 0..v.nrows() {
        v[[i, i]] += sigma2;
    }
    v
}

/// OLS residual variance used to seed the variance components.
fn ols_variance(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    config: &LmmConfig,
) -> Result<f64, FitError> {
    let xtx = x.t().dot(&x);
    let xty = x.t().dot(&y);
    let beta = xtx
        .solve(&xty)
        .map_err(FitError::LinearSystemSolveFailed)?;
    let residuals = &y - &x.dot(&beta);
    let rss = residuals.dot(&residuals);
    let df = (y.len() - x.ncols()).max(1);
    Ok((rss / df as f64).max(config.var_floor))
}

/// Symmetrizes the updated G, floors its diagonal and keeps it positive
/// definite by bounding the intercept/slope covariance.
fn stabilize_g(g: Array2<f64>, var_floor: f64) -> Array2<f64> {
    let v0 = g[[0, 0]].max(var_floor);
    let v1 = g[[1, 1]].max(var_floor);
    let mut c = 0.5 * (g[[0, 1]] + g[[1, 0]]);
    let bound = (v0 * v1).sqrt() * 0.999;
    c = c.clamp(-bound, bound);
    ndarray::array![[v0, c], [c, v1]]
}

/// Two-sided Wald p-value from a normal reference distribution.
fn wald_p_value(coefficient: f64, std_error: f64) -> f64 {
    if std_error <= 0.0 {
        return f64::NAN;
    }
    let z = (coefficient / std_error).abs();
    2.0 * (1.0 - normal_cdf(z))
}

/// Standard normal CDF.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function approximation (Abramowitz and Stegun 7.1.26).
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}
