//! Assumption report for a fitted model.

use crate::diagnostics::normality::{shapiro_wilk, ShapiroWilk, SW_MAX_N, SW_MIN_N};
use crate::data::Variant;
use crate::model::{Family, FittedModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One point of the residual-vs-fitted plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualPoint {
    pub language: String,
    pub fitted: f64,
    pub residual: f64,
}

/// A normality test, or why it was not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalityCheck {
    pub result: Option<ShapiroWilk>,
    pub skipped: Option<String>,
}

impl NormalityCheck {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            result: None,
            skipped: Some(reason.into()),
        }
    }

    fn run(values: &[f64]) -> Self {
        let n = values.len();
        if n < SW_MIN_N {
            return Self::skipped(format!("n = {} is below {}", n, SW_MIN_N));
        }
        if n > SW_MAX_N {
            return Self::skipped(format!("n = {} is above {}", n, SW_MAX_N));
        }
        match shapiro_wilk(values) {
            Ok(sw) => Self {
                result: Some(sw),
                skipped: None,
            },
            Err(e) => Self::skipped(e.to_string()),
        }
    }

    pub fn p_value(&self) -> Option<f64> {
        self.result.map(|r| r.p_value)
    }
}

/// Residual and random-effect checks for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssumptionReport {
    pub spec_name: String,
    pub variant: Variant,
    pub family: Family,
    pub residual_vs_fitted: Vec<ResidualPoint>,
    pub residual_normality: NormalityCheck,
    pub random_intercept_normality: NormalityCheck,
}

impl AssumptionReport {
    /// Whether any test that ran rejects normality at `alpha`.
    pub fn any_rejected(&self, alpha: f64) -> bool {
        [&self.residual_normality, &self.random_intercept_normality]
            .iter()
            .filter_map(|c| c.result)
            .any(|r| r.rejects(alpha))
    }
}

/// Check residual normality and, for LMMs, normality of the predicted
/// random intercepts. Does not modify the model.
pub fn check_assumptions(model: &FittedModel) -> AssumptionReport {
    let residual_vs_fitted: Vec<ResidualPoint> = model
        .observation_ids
        .iter()
        .zip(model.fitted())
        .zip(model.residuals())
        .map(|((language, &fitted), &residual)| ResidualPoint {
            language: language.clone(),
            fitted,
            residual,
        })
        .collect();

    let residual_normality = NormalityCheck::run(model.residuals());

    let random_intercept_normality = match model.family {
        Family::BinomialGlm => NormalityCheck::skipped("model has no random effects"),
        Family::Lmm => {
            let estimates: Vec<f64> = model.random_intercepts().iter().map(|r| r.estimate).collect();
            NormalityCheck::run(&estimates)
        }
    };

    debug!(
        model = %model.spec_name,
        residual_p = ?residual_normality.p_value(),
        intercept_p = ?random_intercept_normality.p_value(),
        "assumptions checked"
    );

    AssumptionReport {
        spec_name: model.spec_name.clone(),
        variant: model.variant.clone(),
        family: model.family,
        residual_vs_fitted,
        residual_normality,
        random_intercept_normality,
    }
}
