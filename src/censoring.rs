//! # Informative Censoring Simulator
//!
//! Models rescue therapy as informative missingness: the probability that a
//! subject receives rescue depends (through a logistic link) on treatment
//! assignment and on the subject's final-visit response, which makes the
//! mechanism missing-not-at-random. Rescue alters only the final visit; all
//! earlier visits are always fully observed.

use crate::design::Design;
use crate::simulate::truncate_to_scale;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Multiplicative improvement applied to a rescued subject's final response.
pub const RESCUE_SHRINKAGE: f64 = 0.5;

/// Logistic model for the per-subject probability of rescue at the final
/// visit: `logit(π) = α + θ1·treatment + θ2·y_final`.
#[derive(Debug, Clone)]
pub struct CensoringModel {
    /// Intercept α.
    pub intercept: f64,
    /// Treatment coefficient θ1.
    pub coef_treatment: f64,
    /// Final-visit outcome coefficient θ2.
    pub coef_outcome: f64,
}

impl CensoringModel {
    /// Rescue probability for one subject. Finite inputs always land in
    /// (0, 1), so the Bernoulli draw below cannot fail.
    pub fn probability(&self, treatment: f64, final_response: f64) -> f64 {
        let eta = self.intercept + self.coef_treatment * treatment + self.coef_outcome * final_response;
        sigmoid(eta)
    }
}

/// The per-subject rescue indicators and the derived observed series.
#[derive(Debug, Clone)]
pub struct RescueOutcome {
    /// One indicator per subject (id order).
    pub rescued: Vec<bool>,
    /// One value per design row: equal to the true response everywhere
    /// except the final visit of a rescued subject.
    pub observed: Array1<f64>,
}

impl RescueOutcome {
    /// Fraction of subjects who received rescue therapy.
    pub fn rescue_rate(&self) -> f64 {
        if self.rescued.is_empty() {
            return 0.0;
        }
        self.rescued.iter().filter(|&&r| r).count() as f64 / self.rescued.len() as f64
    }
}

/// The standard logistic function.
pub fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// Draws one Bernoulli rescue indicator per subject (subjects in id order,
/// independent across subjects) and derives the observed response series.
///
/// A rescued subject's final-visit value is shrunk by [`RESCUE_SHRINKAGE`]
/// and re-truncated so the observed column stays on the integer scale.
pub fn simulate_rescue<R: Rng>(
    design: &Design,
    responses: ArrayView1<'_, f64>,
    model: &CensoringModel,
    rng: &mut R,
) -> RescueOutcome {
    let mut rescued = Vec::with_capacity(design.n_subjects);
    let mut observed = responses.to_owned();

    for id in 1..=design.n_subjects {
        let final_row = design.final_visit_row(id);
        let treatment = design.treatment()[final_row];
        let pi = model.probability(treatment, responses[final_row]);
        let hit = rng.gen_bool(pi);
        rescued.push(hit);
        if hit {
            observed[final_row] = truncate_to_scale(responses[final_row] * RESCUE_SHRINKAGE);
        }
    }

    RescueOutcome { rescued, observed }
}
