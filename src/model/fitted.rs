//! Fitted model values and fitting configuration.

use crate::data::Variant;
use crate::error::{LcError, Result};
use crate::model::Family;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Numerical settings shared by all fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Maximum optimizer iterations (REML objective evaluations or IRLS steps).
    pub max_iter: usize,
    /// Convergence tolerance.
    pub tol: f64,
    /// Upper bound of the search interval for θ = τ/σ.
    pub theta_upper: f64,
    /// θ below this is reported as a singular random effect.
    pub singular_tol: f64,
    /// Optional wall-clock budget per fit, in milliseconds.
    pub max_duration_ms: Option<u64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-8,
            theta_upper: 20.0,
            singular_tol: 1e-4,
            max_duration_ms: None,
        }
    }
}

impl FitConfig {
    /// Per-fit time budget, if any.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }

    /// Reject settings the optimizers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(LcError::InvalidParameter("max_iter must be positive".to_string()));
        }
        if !(self.tol > 0.0) {
            return Err(LcError::InvalidParameter("tol must be positive".to_string()));
        }
        if !(self.theta_upper > 0.0) || !self.theta_upper.is_finite() {
            return Err(LcError::InvalidParameter(
                "theta_upper must be positive and finite".to_string(),
            ));
        }
        if self.singular_tol < 0.0 {
            return Err(LcError::InvalidParameter(
                "singular_tol must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Non-fatal problems attached to a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// Random-intercept variance estimated on the boundary (zero).
    SingularRandomEffect { tau2: f64 },
    /// Optimizer stopped at the iteration limit.
    NotConverged { iterations: usize },
    /// Optimizer stopped when the time budget ran out.
    TimedOut { elapsed_ms: u64 },
    /// Fitted probabilities numerically 0 or 1 (complete or quasi-separation).
    Separation { n_boundary: usize },
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::SingularRandomEffect { tau2 } => {
                write!(f, "boundary (singular) fit: random intercept variance {:.3e}", tau2)
            }
            FitWarning::NotConverged { iterations } => {
                write!(f, "did not converge after {} iterations", iterations)
            }
            FitWarning::TimedOut { elapsed_ms } => {
                write!(f, "stopped after {} ms time budget", elapsed_ms)
            }
            FitWarning::Separation { n_boundary } => {
                write!(f, "{} fitted probabilities numerically 0 or 1", n_boundary)
            }
        }
    }
}

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// t statistic for LMMs, z statistic for GLMs.
    pub statistic: f64,
    /// Residual degrees of freedom for t tests; `None` for z tests.
    pub df: Option<f64>,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Random-intercept and residual variances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceComponents {
    /// Random-intercept variance τ².
    pub tau2: f64,
    /// Residual variance σ².
    pub sigma2: f64,
}

impl VarianceComponents {
    /// Intraclass correlation τ² / (τ² + σ²).
    pub fn icc(&self) -> f64 {
        let total = self.tau2 + self.sigma2;
        if total > 0.0 {
            self.tau2 / total
        } else {
            0.0
        }
    }
}

/// Predicted intercept deviation (BLUP) for one grouping level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomIntercept {
    pub level: String,
    pub estimate: f64,
}

/// A fitted model. Never modified after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub spec_name: String,
    pub family: Family,
    pub formula: String,
    pub variant: Variant,
    pub n_obs: usize,
    pub coefficients: Vec<CoefficientRow>,
    /// Resolved name of the focal coefficient.
    pub focal_coefficient: String,
    /// Reference level of each categorical predictor.
    #[serde(default)]
    pub reference_levels: BTreeMap<String, String>,
    pub variance_components: Option<VarianceComponents>,
    pub random_intercepts: Vec<RandomIntercept>,
    pub r2_marginal: f64,
    pub r2_conditional: f64,
    /// REML criterion for LMMs, log-likelihood for GLMs.
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<FitWarning>,
    pub observation_ids: Vec<String>,
    #[serde(skip)]
    pub(crate) fitted: Vec<f64>,
    #[serde(skip)]
    pub(crate) residuals: Vec<f64>,
}

impl FittedModel {
    /// Coefficient row by exact name.
    pub fn coefficient(&self, name: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// The focal coefficient row.
    pub fn focal(&self) -> Option<&CoefficientRow> {
        self.coefficient(&self.focal_coefficient)
    }

    /// Fitted values. Conditional on the random intercepts for LMMs,
    /// probabilities for GLMs.
    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    /// Residuals. Conditional residuals for LMMs, deviance residuals for GLMs.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Predicted random intercepts, one per grouping level.
    pub fn random_intercepts(&self) -> &[RandomIntercept] {
        &self.random_intercepts
    }

    /// Whether any warning was attached.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Whether the random-intercept variance collapsed to zero.
    pub fn is_singular(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, FitWarning::SingularRandomEffect { .. }))
    }

    /// Number of fixed-effect coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }
}

/// Resolve a focal coefficient name against a coefficient list.
///
/// An exact match wins; otherwise the first coefficient whose name starts
/// with `focal` (a dummy-coded level of that predictor).
pub(crate) fn resolve_focal(focal: &str, names: &[String]) -> Option<String> {
    if let Some(n) = names.iter().find(|n| n.as_str() == focal) {
        return Some(n.clone());
    }
    names
        .iter()
        .find(|n| n.as_str() != "(Intercept)" && n.starts_with(focal))
        .cloned()
}
