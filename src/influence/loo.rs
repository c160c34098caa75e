//! Leave-one-language-out robustness sweep.
//!
//! One refit per distinct language: drop it from the base variant, derive
//! features again on the remaining rows, fit, and record the focal
//! coefficient. A failed iteration is recorded and the sweep continues.

use crate::data::{Dataset, Variant};
use crate::error::{LcError, Result};
use crate::model::{fit, FitConfig, ModelSpec};
use crate::transform::derive_features;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Significance level for LOO records.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Focal estimate from one leave-one-out fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LooOutcome {
    Ok {
        estimate: f64,
        std_error: f64,
        p_value: f64,
        significant: bool,
    },
    Failed {
        reason: String,
    },
}

impl LooOutcome {
    pub fn p_value(&self) -> Option<f64> {
        match self {
            LooOutcome::Ok { p_value, .. } => Some(*p_value),
            LooOutcome::Failed { .. } => None,
        }
    }

    pub fn estimate(&self) -> Option<f64> {
        match self {
            LooOutcome::Ok { estimate, .. } => Some(*estimate),
            LooOutcome::Failed { .. } => None,
        }
    }

    pub fn is_significant(&self) -> bool {
        matches!(self, LooOutcome::Ok { significant: true, .. })
    }
}

/// One iteration of the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LooRecord {
    pub dropped: String,
    pub outcome: LooOutcome,
}

/// Aggregate view over a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LooSummary {
    pub n_iterations: usize,
    pub n_significant: usize,
    pub n_failed: usize,
    pub min_estimate: Option<f64>,
    pub max_estimate: Option<f64>,
    pub median_p_value: Option<f64>,
}

impl LooSummary {
    fn from_records(records: &[LooRecord]) -> Self {
        let estimates: Vec<f64> = records.iter().filter_map(|r| r.outcome.estimate()).collect();
        let mut p_values: Vec<f64> = records
            .iter()
            .filter_map(|r| r.outcome.p_value())
            .filter(|p| !p.is_nan())
            .collect();
        p_values.sort_by(f64::total_cmp);

        Self {
            n_iterations: records.len(),
            n_significant: records.iter().filter(|r| r.outcome.is_significant()).count(),
            n_failed: records
                .iter()
                .filter(|r| matches!(r.outcome, LooOutcome::Failed { .. }))
                .count(),
            min_estimate: estimates.iter().copied().reduce(f64::min),
            max_estimate: estimates.iter().copied().reduce(f64::max),
            median_p_value: median(&p_values),
        }
    }

    /// Share of successful iterations that stayed significant.
    pub fn significant_fraction(&self) -> f64 {
        let ok = self.n_iterations - self.n_failed;
        if ok == 0 {
            0.0
        } else {
            self.n_significant as f64 / ok as f64
        }
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        None
    } else if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// A full leave-one-out sweep for one specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooResult {
    pub spec_name: String,
    pub base_variant: Variant,
    pub alpha: f64,
    /// Sorted by ascending p-value, failures last, ties by language.
    pub records: Vec<LooRecord>,
    pub summary: LooSummary,
}

impl LooResult {
    /// Record for a dropped language.
    pub fn get(&self, language: &str) -> Option<&LooRecord> {
        self.records.iter().find(|r| r.dropped == language)
    }
}

/// Ascending p-value, then NaN p-values, then failures; ties by language.
fn sort_records(records: &mut [LooRecord]) {
    let key = |r: &LooRecord| match r.outcome.p_value() {
        Some(p) if !p.is_nan() => (0u8, p),
        Some(_) => (1, 0.0),
        None => (2, 0.0),
    };
    records.sort_by(|a, b| {
        let (ra, pa) = key(a);
        let (rb, pb) = key(b);
        ra.cmp(&rb)
            .then_with(|| pa.total_cmp(&pb))
            .then_with(|| a.dropped.cmp(&b.dropped))
    });
}

fn loo_iteration(
    spec: &ModelSpec,
    base: &Dataset,
    language: &str,
    config: &FitConfig,
    alpha: f64,
) -> Result<LooOutcome> {
    let variant = Variant::LeaveOneOut {
        dropped: language.to_string(),
    };
    let reduced = base.exclude_languages(&[language.to_string()], variant)?;
    let derived = derive_features(&reduced)?;
    let model = fit(spec, &derived, config)?;
    let focal = model.focal().ok_or_else(|| {
        LcError::DegenerateFit(format!("no focal coefficient '{}'", model.focal_coefficient))
    })?;
    Ok(LooOutcome::Ok {
        estimate: focal.estimate,
        std_error: focal.std_error,
        p_value: focal.p_value,
        significant: focal.p_value < alpha,
    })
}

/// Run the sweep over every distinct language of `base`.
///
/// `base` is a cleaned variant; its derived columns are ignored since each
/// iteration derives its own.
pub fn leave_one_out(
    spec: &ModelSpec,
    base: &Dataset,
    config: &FitConfig,
    alpha: f64,
) -> Result<LooResult> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(LcError::InvalidParameter(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )));
    }
    config.validate()?;

    let languages = base.distinct_languages();
    let by_language: BTreeMap<String, LooOutcome> = languages
        .par_iter()
        .map(|language| {
            let outcome = loo_iteration(spec, base, language, config, alpha).unwrap_or_else(|e| {
                debug!(model = %spec.name, dropped = %language, "LOO iteration failed: {}", e);
                LooOutcome::Failed {
                    reason: e.to_string(),
                }
            });
            (language.clone(), outcome)
        })
        .collect();

    let mut records: Vec<LooRecord> = by_language
        .into_iter()
        .map(|(dropped, outcome)| LooRecord { dropped, outcome })
        .collect();
    sort_records(&mut records);

    let summary = LooSummary::from_records(&records);
    info!(
        model = %spec.name,
        iterations = summary.n_iterations,
        significant = summary.n_significant,
        failed = summary.n_failed,
        "leave-one-out sweep complete"
    );
    Ok(LooResult {
        spec_name: spec.name.clone(),
        base_variant: base.variant().clone(),
        alpha,
        records,
        summary,
    })
}
