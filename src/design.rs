//! # Design Matrix Builder
//!
//! Constructs the fixed-effect covariate matrix for a two-arm longitudinal
//! trial: one row per (subject, visit) pair, ordered by subject then visit,
//! with the treatment arm occupying the first block of subject ids. Optional
//! extra covariates are drawn once per subject (Bernoulli or standard normal)
//! and broadcast across that subject's rows.
//!
//! All argument validation happens here, before any random draw, so a
//! malformed specification never consumes generator state.

use ndarray::{Array2, ArrayView1, ArrayView2, s};
use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

/// Validation failures for [`DesignSpec`]. These correspond to the
/// invalid-parameter class: they are raised before any data is generated.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("the trial must contain at least one subject (n_treatment + n_control = 0)")]
    NoSubjects,

    #[error("the visit schedule must contain at least one visit")]
    NoVisits,

    #[error(
        "binary covariate success probabilities must have length 1 (broadcast) or {expected}, got {found}"
    )]
    ProbabilityLengthMismatch { expected: usize, found: usize },

    #[error("binary covariate success probability {value} at index {index} is outside [0, 1]")]
    ProbabilityOutOfRange { index: usize, value: f64 },
}

/// Specification of the trial layout and the optional extra covariates.
///
/// Covariate counts are `usize`, so the negative counts the source
/// implementation merely warned about cannot be expressed at all.
#[derive(Debug, Clone)]
pub struct DesignSpec {
    /// Subjects in the treatment arm. These receive ids `1..=n_treatment`.
    pub n_treatment: usize,
    /// Subjects in the control arm, ids `n_treatment+1..=n_treatment+n_control`.
    pub n_control: usize,
    /// Number of repeated measurements per subject (K).
    pub visits: usize,
    /// Time value of the first visit.
    pub time_start: f64,
    /// Increment between consecutive visits.
    pub time_step: f64,
    /// Whether to include the treatment × time interaction column.
    pub interaction: bool,
    /// Number of extra per-subject binary covariates.
    pub n_binary: usize,
    /// Success probabilities for the binary covariates: length 1 broadcasts
    /// to every covariate, otherwise the length must equal `n_binary`.
    pub binary_probs: Vec<f64>,
    /// Number of extra per-subject standard-normal covariates.
    pub n_continuous: usize,
}

impl DesignSpec {
    /// A plain two-arm layout with no extra covariates.
    pub fn two_arm(n_treatment: usize, n_control: usize, visits: usize) -> Self {
        Self {
            n_treatment,
            n_control,
            visits,
            time_start: 0.0,
            time_step: 1.0,
            interaction: true,
            n_binary: 0,
            binary_probs: Vec::new(),
            n_continuous: 0,
        }
    }

    fn validate(&self) -> Result<(), DesignError> {
        if self.n_treatment + self.n_control == 0 {
            return Err(DesignError::NoSubjects);
        }
        if self.visits == 0 {
            return Err(DesignError::NoVisits);
        }
        if self.n_binary > 0 && self.binary_probs.len() != 1 && self.binary_probs.len() != self.n_binary
        {
            return Err(DesignError::ProbabilityLengthMismatch {
                expected: self.n_binary,
                found: self.binary_probs.len(),
            });
        }
        for (index, &value) in self.binary_probs.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(DesignError::ProbabilityOutOfRange { index, value });
            }
        }
        Ok(())
    }

    /// Success probability of binary covariate `j`, after broadcasting.
    fn binary_prob(&self, j: usize) -> f64 {
        if self.binary_probs.len() == 1 {
            self.binary_probs[0]
        } else {
            self.binary_probs[j]
        }
    }
}

/// A fully materialized design: the covariate matrix plus the row-to-subject
/// mapping. Generated once and never mutated.
#[derive(Debug, Clone)]
pub struct Design {
    /// Subject id (1-based) of each row.
    pub subject: Vec<usize>,
    /// One row per observation, columns in the fixed order given by `columns`.
    pub matrix: Array2<f64>,
    /// Column names: intercept, treatment, time, interaction (if requested),
    /// then binary covariates, then continuous covariates.
    pub columns: Vec<String>,
    /// Total number of subjects.
    pub n_subjects: usize,
    /// Measurements per subject (K).
    pub visits: usize,
}

impl Design {
    /// The treatment indicator column (constant within each subject block).
    pub fn treatment(&self) -> ArrayView1<'_, f64> {
        self.matrix.column(1)
    }

    /// The time column (the same arithmetic grid for every subject).
    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.matrix.column(2)
    }

    /// The shared visit-time grid.
    pub fn time_grid(&self) -> Vec<f64> {
        self.matrix.slice(s![..self.visits, 2]).to_vec()
    }

    /// The rows belonging to subject `id` (1-based).
    pub fn subject_rows(&self, id: usize) -> ArrayView2<'_, f64> {
        let start = (id - 1) * self.visits;
        self.matrix.slice(s![start..start + self.visits, ..])
    }

    /// Row index of subject `id`'s final visit.
    pub fn final_visit_row(&self, id: usize) -> usize {
        id * self.visits - 1
    }

    /// Whether `row` is a final-visit row.
    pub fn is_final_visit(&self, row: usize) -> bool {
        (row + 1) % self.visits == 0
    }

    /// The covariate matrix with a leading subject-id column, suitable for
    /// export as a flat table.
    pub fn table_with_subjects(&self) -> Array2<f64> {
        let (rows, cols) = self.matrix.dim();
        let mut out = Array2::zeros((rows, cols + 1));
        for r in 0..rows {
            out[[r, 0]] = self.subject[r] as f64;
        }
        out.slice_mut(s![.., 1..]).assign(&self.matrix);
        out
    }
}

/// Builds the design matrix, consuming one Bernoulli draw per (binary
/// covariate, subject) and one standard-normal draw per (continuous
/// covariate, subject), covariates in column order and subjects in id order.
pub fn build_design<R: Rng>(spec: &DesignSpec, rng: &mut R) -> Result<Design, DesignError> {
    spec.validate()?;

    let n_subjects = spec.n_treatment + spec.n_control;
    let n_rows = n_subjects * spec.visits;
    let n_cols = 3
        + usize::from(spec.interaction)
        + spec.n_binary
        + spec.n_continuous;

    let mut columns = vec![
        "intercept".to_string(),
        "treatment".to_string(),
        "time".to_string(),
    ];
    if spec.interaction {
        columns.push("treatment_time".to_string());
    }
    for j in 0..spec.n_binary {
        columns.push(format!("bin{}", j + 1));
    }
    for j in 0..spec.n_continuous {
        columns.push(format!("cont{}", j + 1));
    }

    // Per-subject covariate draws, consumed before any row is written so the
    // draw order is independent of the visit count.
    let mut binary_draws = Array2::zeros((n_subjects, spec.n_binary));
    for j in 0..spec.n_binary {
        let p = spec.binary_prob(j);
        for i in 0..n_subjects {
            binary_draws[[i, j]] = if rng.gen_bool(p) { 1.0 } else { 0.0 };
        }
    }
    let mut continuous_draws = Array2::zeros((n_subjects, spec.n_continuous));
    for j in 0..spec.n_continuous {
        for i in 0..n_subjects {
            continuous_draws[[i, j]] = rng.sample(StandardNormal);
        }
    }

    let mut subject = Vec::with_capacity(n_rows);
    let mut matrix = Array2::zeros((n_rows, n_cols));
    for i in 0..n_subjects {
        let trt = if i < spec.n_treatment { 1.0 } else { 0.0 };
        for v in 0..spec.visits {
            let row = i * spec.visits + v;
            let time = spec.time_start + spec.time_step * v as f64;
            subject.push(i + 1);
            matrix[[row, 0]] = 1.0;
            matrix[[row, 1]] = trt;
            matrix[[row, 2]] = time;
            let mut col = 3;
            if spec.interaction {
                matrix[[row, col]] = trt * time;
                col += 1;
            }
            for j in 0..spec.n_binary {
                matrix[[row, col + j]] = binary_draws[[i, j]];
            }
            col += spec.n_binary;
            for j in 0..spec.n_continuous {
                matrix[[row, col + j]] = continuous_draws[[i, j]];
            }
        }
    }

    Ok(Design {
        subject,
        matrix,
        columns,
        n_subjects,
        visits: spec.visits,
    })
}
