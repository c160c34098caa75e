//! Cook's distance for fitted models.
//!
//! - GLM: `D_i = r_Pi² h_i / (p (1 − h_i)²)` with Pearson residuals and
//!   leverages from the final IRLS weights.
//! - LMM: case deletion, `D_i = (β − β₍ᵢ₎)ᵀ Cov(β)⁻¹ (β − β₍ᵢ₎) / p`. With
//!   [`InfluenceMethod::FixedVariance`] the variance components stay at the
//!   full-fit values; [`InfluenceMethod::Refit`] re-runs REML for every
//!   deletion.

use crate::data::{
    response_vector, Dataset, DesignMatrix, RandomDesignMatrix, RandomEffect, Variant,
};
use crate::error::{LcError, Result};
use crate::influence::outlier_threshold;
use crate::model::lmm::gls;
use crate::model::{fit_lmm, Family, FitConfig, FittedModel, ModelSpec};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How LMM deletion estimates are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfluenceMethod {
    /// Hold τ and σ at the full-fit values.
    #[default]
    FixedVariance,
    /// Refit the full model without each observation.
    Refit,
}

/// Influence score for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceRow {
    pub language: String,
    /// NaN when the deletion fit failed.
    pub cooks_distance: f64,
    /// Score above the table's `4/n` threshold.
    pub flagged: bool,
}

/// Cook's distances for every observation of one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluenceTable {
    pub spec_name: String,
    pub variant: Variant,
    pub method: InfluenceMethod,
    pub n_obs: usize,
    /// `4 / n_obs`.
    pub threshold: f64,
    pub rows: Vec<InfluenceRow>,
}

impl InfluenceTable {
    /// Build a table from `(language, score)` pairs, flagging against `4/n`.
    pub fn new(
        spec_name: &str,
        variant: Variant,
        method: InfluenceMethod,
        scores: Vec<(String, f64)>,
    ) -> Self {
        let n_obs = scores.len();
        let threshold = outlier_threshold(n_obs);
        let rows = scores
            .into_iter()
            .map(|(language, cooks_distance)| InfluenceRow {
                flagged: cooks_distance > threshold,
                language,
                cooks_distance,
            })
            .collect();
        Self {
            spec_name: spec_name.to_string(),
            variant,
            method,
            n_obs,
            threshold,
            rows,
        }
    }

    /// Score for a language.
    pub fn score(&self, language: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.language == language)
            .map(|r| r.cooks_distance)
    }

    /// Scores in observation order.
    pub fn scores(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.cooks_distance).collect()
    }

    /// Languages above the threshold, in observation order.
    pub fn flagged_languages(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.flagged)
            .map(|r| r.language.as_str())
            .collect()
    }

    /// The most influential observation, ignoring NaN.
    pub fn most_influential(&self) -> Option<&InfluenceRow> {
        self.rows
            .iter()
            .filter(|r| !r.cooks_distance.is_nan())
            .max_by(|a, b| {
                a.cooks_distance
                    .partial_cmp(&b.cooks_distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Compute one Cook's distance per observation of a fitted model.
///
/// `dataset` must be the variant the model was fit on.
pub fn cooks_distance(
    model: &FittedModel,
    spec: &ModelSpec,
    dataset: &Dataset,
    config: &FitConfig,
    method: InfluenceMethod,
) -> Result<InfluenceTable> {
    if model.spec_name != spec.name || dataset.variant() != &model.variant {
        return Err(LcError::InvalidParameter(format!(
            "Model '{}' on {} does not match spec '{}' on {}",
            model.spec_name,
            model.variant,
            spec.name,
            dataset.variant()
        )));
    }
    if dataset.languages() != model.observation_ids.as_slice() {
        return Err(LcError::InvalidParameter(format!(
            "Dataset rows do not match the {} observations of '{}'",
            model.n_obs, model.spec_name
        )));
    }

    let design = DesignMatrix::from_formula(dataset, &spec.fixed_formula()?)?;
    let y = response_vector(dataset, &spec.response)?;
    let beta = DVector::from_iterator(
        model.coefficients.len(),
        model.coefficients.iter().map(|c| c.estimate),
    );

    let scores = match spec.family {
        Family::BinomialGlm => glm_cooks(&design, &y, model.fitted())?,
        Family::Lmm => {
            let group = spec.random_intercept.as_deref().ok_or_else(|| {
                LcError::InvalidParameter(format!("LMM '{}' has no random intercept", spec.name))
            })?;
            let random =
                RandomDesignMatrix::from_random_effect(dataset, &RandomEffect::intercept(group))?;
            let vc = model.variance_components.ok_or_else(|| {
                LcError::InvalidParameter(format!("Model '{}' has no variance components", spec.name))
            })?;
            lmm_cooks(&design, &random, &y, &beta, vc.tau2, vc.sigma2, config, method)?
        }
    };

    let n_failed = scores.iter().filter(|s| s.is_nan()).count();
    if n_failed > 0 {
        warn!(model = %spec.name, variant = %dataset.variant(), n_failed, "deletion fits failed, scores set to NaN");
    }

    let table = InfluenceTable::new(
        &spec.name,
        dataset.variant().clone(),
        method,
        dataset.languages().iter().cloned().zip(scores).collect(),
    );
    debug!(
        model = %spec.name,
        threshold = table.threshold,
        flagged = table.flagged_languages().len(),
        "influence computed"
    );
    Ok(table)
}

fn glm_cooks(design: &DesignMatrix, y: &[f64], mu: &[f64]) -> Result<Vec<f64>> {
    let x = design.matrix();
    let (n, p) = (x.nrows(), x.ncols());
    let w: Vec<f64> = mu.iter().map(|m| (m * (1.0 - m)).max(1e-12)).collect();

    let mut xw = x.clone();
    for i in 0..n {
        let ws = w[i].sqrt();
        for j in 0..p {
            xw[(i, j)] *= ws;
        }
    }
    let info_inv = (xw.transpose() * &xw)
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| LcError::Numerical("Fisher information is singular".to_string()))?;

    Ok((0..n)
        .map(|i| {
            let row = xw.row(i);
            let h = (row * &info_inv * row.transpose())[(0, 0)];
            let r_p = (y[i] - mu[i]) / w[i].sqrt();
            r_p * r_p * h / (p as f64 * (1.0 - h).powi(2))
        })
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn lmm_cooks(
    design: &DesignMatrix,
    random: &RandomDesignMatrix,
    y: &[f64],
    beta: &DVector<f64>,
    tau2: f64,
    sigma2: f64,
    config: &FitConfig,
    method: InfluenceMethod,
) -> Result<Vec<f64>> {
    let x = design.matrix();
    let p = x.ncols();
    let n = y.len();
    if !(sigma2 > 0.0) {
        return Err(LcError::Numerical("residual variance is zero".to_string()));
    }
    let theta = (tau2 / sigma2).sqrt();
    let y_vec = DVector::from_column_slice(y);
    let zzt = random.matrix() * random.matrix().transpose();

    // Cov(β)⁻¹ = X'V⁻¹X = X'H⁻¹X / σ²
    let full = gls(&y_vec, x, &zzt, theta)?;
    let precision: DMatrix<f64> = &full.xthx / sigma2;

    let distance = |beta_i: &DVector<f64>| -> f64 {
        let d = beta - beta_i;
        (d.transpose() * &precision * &d)[(0, 0)] / p as f64
    };

    let scores = match method {
        InfluenceMethod::FixedVariance => (0..n)
            .map(|i| {
                let y_i = y_vec.clone().remove_row(i);
                let x_i = x.clone().remove_row(i);
                let zzt_i = zzt.clone().remove_row(i).remove_column(i);
                match gls(&y_i, &x_i, &zzt_i, theta) {
                    Ok(state) => distance(&state.beta),
                    Err(_) => f64::NAN,
                }
            })
            .collect(),
        InfluenceMethod::Refit => (0..n)
            .into_par_iter()
            .map(|i| {
                let y_i: Vec<f64> = y
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != i)
                    .map(|(_, v)| *v)
                    .collect();
                match fit_lmm(&y_i, &design.without_row(i), &random.without_row(i), config) {
                    Ok(f) => distance(&DVector::from_vec(f.beta)),
                    Err(_) => f64::NAN,
                }
            })
            .collect(),
    };
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fit, test_support};
    use crate::transform::derive_features;

    fn derived() -> Dataset {
        derive_features(&test_support::languages()).unwrap()
    }

    #[test]
    fn test_lmm_cooks_fixed_variance() {
        let ds = derived();
        let spec = ModelSpec::lmm("m", "scaled_case_marking_complexity", &["scaled_altitude"], "subfamily");
        let model = fit(&spec, &ds, &FitConfig::default()).unwrap();
        let table =
            cooks_distance(&model, &spec, &ds, &FitConfig::default(), InfluenceMethod::FixedVariance)
                .unwrap();
        assert_eq!(table.rows.len(), 12);
        assert_eq!(table.n_obs, 12);
        assert!((table.threshold - 4.0 / 12.0).abs() < 1e-12);
        assert!(table.scores().iter().all(|s| s.is_finite() && *s >= 0.0));
        let top = table.most_influential().unwrap();
        assert_eq!(table.score(&top.language), Some(top.cooks_distance));
        assert_eq!(table.score("Klingon"), None);
    }

    #[test]
    fn test_lmm_cooks_refit() {
        let ds = derived();
        let spec = ModelSpec::lmm("m", "scaled_form_complexity", &["scaled_stdev_slope"], "subfamily");
        let model = fit(&spec, &ds, &FitConfig::default()).unwrap();
        let table =
            cooks_distance(&model, &spec, &ds, &FitConfig::default(), InfluenceMethod::Refit).unwrap();
        assert_eq!(table.rows.len(), 12);
        assert_eq!(table.method, InfluenceMethod::Refit);
        assert!(table.scores().iter().all(|s| s.is_nan() || *s >= 0.0));
    }

    #[test]
    fn test_glm_cooks_matches_leverage_formula() {
        let ds = derived();
        let spec = ModelSpec::glm("g", "hill_binary", &["scaled_altitude"]);
        let model = fit(&spec, &ds, &FitConfig::default()).unwrap();
        let table =
            cooks_distance(&model, &spec, &ds, &FitConfig::default(), InfluenceMethod::FixedVariance)
                .unwrap();
        let scores = table.scores();
        assert!(scores.iter().all(|s| s.is_finite() && *s >= 0.0));
        // Leverages sum to p, so the weighted scores cannot all vanish
        assert!(scores.iter().sum::<f64>() > 0.0);
    }

    #[test]
    fn test_mismatched_dataset_rejected() {
        let ds = derived();
        let spec = ModelSpec::glm("g", "hill_binary", &["scaled_altitude"]);
        let model = fit(&spec, &ds, &FitConfig::default()).unwrap();
        let other = ds
            .exclude_languages(&["Limbu".to_string()], Variant::Sensitivity { excluded: vec!["Limbu".into()] })
            .unwrap();
        let other = derive_features(&other).unwrap();
        assert!(cooks_distance(&model, &spec, &other, &FitConfig::default(), InfluenceMethod::FixedVariance).is_err());
    }
}
