//! Model registry: specifications, fitting and the standard catalog.
//!
//! Two families are supported:
//!
//! - **LMM**: Gaussian linear mixed model with one random intercept (REML)
//! - **Binomial GLM**: logistic regression (IRLS)

pub mod catalog;
mod fitted;
pub mod glm;
pub mod lmm;
mod spec;

pub use catalog::{fit_catalog, CatalogEntry, CatalogRun, ModelCatalog};
pub use fitted::{
    CoefficientRow, FitConfig, FitWarning, FittedModel, RandomIntercept, VarianceComponents,
};
pub use glm::{fit_glm, GlmFit};
pub use lmm::{fit_lmm, LmmFit};
pub use spec::{Family, ModelSpec, VariantSelector};

use crate::data::{response_vector, Dataset, DesignMatrix, RandomDesignMatrix, RandomEffect};
use crate::error::{LcError, Result};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Singular-value ratio below which a design is treated as rank deficient.
const RANK_TOL: f64 = 1e-10;

/// Fit one specification against one dataset variant.
///
/// The dataset must already carry any derived columns the specification
/// references. Fitting has no random state: identical inputs give identical
/// estimates.
pub fn fit(spec: &ModelSpec, dataset: &Dataset, config: &FitConfig) -> Result<FittedModel> {
    let formula = spec.fixed_formula()?;
    let design = DesignMatrix::from_formula(dataset, &formula)?;
    let y = response_vector(dataset, &spec.response)?;
    check_full_rank(&design)?;

    let focal_coefficient = fitted::resolve_focal(&spec.focal_coefficient, design.coefficient_names())
        .ok_or_else(|| {
            LcError::DegenerateFit(format!(
                "focal coefficient '{}' is not estimable on variant {} (coefficients: {:?})",
                spec.focal_coefficient,
                dataset.variant(),
                design.coefficient_names()
            ))
        })?;

    let model = match spec.family {
        Family::Lmm => {
            let group = spec.random_intercept.as_deref().ok_or_else(|| {
                LcError::InvalidParameter(format!("LMM '{}' has no random intercept", spec.name))
            })?;
            let random =
                RandomDesignMatrix::from_random_effect(dataset, &RandomEffect::intercept(group))?;
            let lmm = fit_lmm(&y, &design, &random, config)?;
            from_lmm(spec, dataset, &design, &random, lmm, focal_coefficient)?
        }
        Family::BinomialGlm => {
            if spec.random_intercept.is_some() {
                return Err(LcError::InvalidParameter(format!(
                    "Binomial model '{}' cannot take a random intercept",
                    spec.name
                )));
            }
            let glm = fit_glm(&y, &design, config)?;
            from_glm(spec, dataset, &design, glm, focal_coefficient)?
        }
    };

    for w in &model.warnings {
        warn!(model = %spec.name, variant = %dataset.variant(), "{}", w);
    }
    debug!(
        model = %spec.name,
        variant = %dataset.variant(),
        n = model.n_obs,
        r2_marginal = model.r2_marginal,
        r2_conditional = model.r2_conditional,
        "fitted"
    );

    Ok(model)
}

/// Reject designs with a constant or collinear predictor.
pub(crate) fn check_full_rank(design: &DesignMatrix) -> Result<()> {
    let sv = design.matrix().clone().svd(false, false).singular_values;
    let max = sv.iter().copied().fold(0.0f64, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    if sv.is_empty() || max <= 0.0 || min / max < RANK_TOL {
        return Err(LcError::DegenerateFit(format!(
            "design matrix is rank deficient (constant or collinear predictor among {:?})",
            design.coefficient_names()
        )));
    }
    Ok(())
}

/// Sample variance (n − 1 denominator).
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

fn from_lmm(
    spec: &ModelSpec,
    dataset: &Dataset,
    design: &DesignMatrix,
    random: &RandomDesignMatrix,
    lmm: LmmFit,
    focal_coefficient: String,
) -> Result<FittedModel> {
    let t_dist = StudentsT::new(0.0, 1.0, lmm.df_residual)
        .map_err(|e| LcError::Numerical(format!("t distribution: {}", e)))?;
    let coefficients = coefficient_rows(design, &lmm.beta, &lmm.std_errors, |stat| {
        (2.0 * (1.0 - t_dist.cdf(stat.abs())), Some(lmm.df_residual))
    });

    // Nakagawa & Schielzeth R²
    let var_f = sample_variance(&lmm.fixed_predictor);
    let total = var_f + lmm.tau2 + lmm.sigma2;
    let (r2_marginal, r2_conditional) = if total > 0.0 {
        (var_f / total, (var_f + lmm.tau2) / total)
    } else {
        (0.0, 0.0)
    };

    let random_intercepts = random
        .group_ids
        .iter()
        .zip(&lmm.random_effects)
        .map(|(level, &estimate)| RandomIntercept {
            level: level.clone(),
            estimate,
        })
        .collect();

    Ok(FittedModel {
        spec_name: spec.name.clone(),
        family: Family::Lmm,
        formula: spec.formula(),
        variant: dataset.variant().clone(),
        n_obs: design.n_rows(),
        coefficients,
        focal_coefficient,
        reference_levels: reference_levels(spec, design),
        variance_components: Some(VarianceComponents {
            tau2: lmm.tau2,
            sigma2: lmm.sigma2,
        }),
        random_intercepts,
        r2_marginal,
        r2_conditional,
        log_likelihood: lmm.log_reml,
        iterations: lmm.iterations,
        converged: lmm.converged,
        warnings: lmm.warnings,
        observation_ids: design.row_ids().to_vec(),
        fitted: lmm.fitted,
        residuals: lmm.residuals,
    })
}

fn from_glm(
    spec: &ModelSpec,
    dataset: &Dataset,
    design: &DesignMatrix,
    glm: GlmFit,
    focal_coefficient: String,
) -> Result<FittedModel> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| LcError::Numerical(format!("normal distribution: {}", e)))?;
    let coefficients = coefficient_rows(design, &glm.beta, &glm.std_errors, |stat| {
        (2.0 * (1.0 - normal.cdf(stat.abs())), None)
    });

    // Latent-scale R² with logit residual variance π²/3; no random effects so m = c
    let var_f = sample_variance(&glm.linear_predictor);
    let r2 = var_f / (var_f + std::f64::consts::PI.powi(2) / 3.0);

    Ok(FittedModel {
        spec_name: spec.name.clone(),
        family: Family::BinomialGlm,
        formula: spec.formula(),
        variant: dataset.variant().clone(),
        n_obs: design.n_rows(),
        coefficients,
        focal_coefficient,
        reference_levels: reference_levels(spec, design),
        variance_components: None,
        random_intercepts: Vec::new(),
        r2_marginal: r2,
        r2_conditional: r2,
        log_likelihood: glm.log_likelihood,
        iterations: glm.iterations,
        converged: glm.converged,
        warnings: glm.warnings,
        observation_ids: design.row_ids().to_vec(),
        fitted: glm.fitted,
        residuals: glm.residuals,
    })
}

fn reference_levels(spec: &ModelSpec, design: &DesignMatrix) -> BTreeMap<String, String> {
    spec.predictors
        .iter()
        .filter_map(|v| design.reference_level(v).map(|r| (v.clone(), r.to_string())))
        .collect()
}

fn coefficient_rows<F>(
    design: &DesignMatrix,
    beta: &[f64],
    std_errors: &[f64],
    test: F,
) -> Vec<CoefficientRow>
where
    F: Fn(f64) -> (f64, Option<f64>),
{
    design
        .coefficient_names()
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let estimate = beta[j];
            let std_error = std_errors[j];
            let statistic = if std_error > 0.0 && std_error.is_finite() {
                estimate / std_error
            } else {
                f64::NAN
            };
            let (p_value, df) = if statistic.is_nan() {
                (f64::NAN, None)
            } else {
                test(statistic)
            };
            CoefficientRow {
                name: name.clone(),
                estimate,
                std_error,
                statistic,
                df,
                p_value,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::data::{Dataset, Value};

    /// Twelve languages in five subfamilies with every source column.
    pub fn languages() -> Dataset {
        let langs = [
            "Limbu", "Yakkha", "Bantawa", "Newar", "Dolakha", "Tamang", "Gurung", "Thakali",
            "Sherpa", "Kham", "Magar", "Chepang",
        ];
        let sub = [
            "Kiranti", "Kiranti", "Kiranti", "Newaric", "Newaric", "Tamangic", "Tamangic",
            "Tamangic", "Bodish", "Magaric", "Magaric", "Magaric",
        ];
        let hv = [
            "Hill", "Hill", "Valley", "Valley", "Split", "Hill", "Hill", "Valley", "Hill",
            "Split", "Valley", "Hill",
        ];
        let l2 = ["Yes", "No", "No", "Yes", "Yes", "No", "Yes", "No", "No", "Yes", "No", "Yes"];
        let agri = [
            "Intensive/irrigated", "Extensive", "Extensive", "Intensive/irrigated",
            "Intensive/irrigated", "Extensive", "Extensive", "Intensive/irrigated", "Extensive",
            "Extensive", "Intensive/irrigated", "Extensive",
        ];
        let pol = [
            "Chiefdom", "Band", "Band", "State", "State", "Chiefdom", "Chiefdom", "State",
            "Band", "Chiefdom", "State", "Band",
        ];
        let altitude = [
            1800.0, 1500.0, 900.0, 1300.0, 1650.0, 2100.0, 2300.0, 2700.0, 3500.0, 2000.0,
            800.0, 1200.0,
        ];
        let slope = [9.5, 3.0, 4.2, 2.5, 6.6, 10.2, 11.0, 7.7, 12.4, 9.1, 3.8, 8.8];
        let population = [
            350000.0, 14000.0, 130000.0, 850000.0, 1500.0, 1200000.0, 330000.0, 13000.0,
            115000.0, 27000.0, 790000.0, 52000.0,
        ];
        let case = [14.0, 12.0, 9.0, 6.0, 8.0, 7.0, 9.0, 5.0, 11.0, 10.0, 6.0, 8.0];
        let form = [62.0, 55.0, 41.0, 23.0, 30.0, 28.0, 37.0, 21.0, 45.0, 40.0, 26.0, 33.0];
        let cell = [38.0, 33.0, 27.0, 14.0, 19.0, 17.0, 22.0, 13.0, 29.0, 25.0, 16.0, 20.0];

        let cat = |v: &[&str]| v.iter().map(|s| Value::Categorical(s.to_string())).collect();
        let num = |v: &[f64]| v.iter().map(|&x| Value::Continuous(x)).collect();
        Dataset::from_columns(
            langs.iter().map(|s| s.to_string()).collect(),
            vec![
                ("subfamily".into(), cat(&sub)),
                ("hill_valley".into(), cat(&hv)),
                ("L2".into(), cat(&l2)),
                ("agricultural_intensity".into(), cat(&agri)),
                ("political_organization".into(), cat(&pol)),
                ("altitude".into(), num(&altitude)),
                ("stdev_of_slope".into(), num(&slope)),
                ("population".into(), num(&population)),
                ("case_marking_complexity".into(), num(&case)),
                ("form_complexity".into(), num(&form)),
                ("cell_complexity".into(), num(&cell)),
            ],
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::transform::derive_features;
    use approx::assert_relative_eq;

    fn derived() -> Dataset {
        derive_features(&test_support::languages()).unwrap()
    }

    #[test]
    fn test_fit_lmm_categorical_focal() {
        let spec = ModelSpec::lmm("m", "scaled_case_marking_complexity", &["hill_valley"], "subfamily")
            .with_focal("hill_valleyValley");
        let model = fit(&spec, &derived(), &FitConfig::default()).unwrap();
        assert_eq!(model.n_obs, 12);
        assert_eq!(model.coefficients.len(), 3);
        assert_eq!(model.focal().unwrap().name, "hill_valleyValley");
        assert_eq!(
            model.reference_levels.get("hill_valley").map(String::as_str),
            Some("Hill")
        );
        assert_eq!(model.focal().unwrap().df, Some(9.0));
        assert_eq!(model.random_intercepts().len(), 5);
        assert!(model.r2_marginal >= 0.0 && model.r2_marginal <= model.r2_conditional);
        assert!(model.r2_conditional <= 1.0);
        assert_eq!(model.residuals().len(), 12);
        for row in &model.coefficients {
            assert!(row.p_value >= 0.0 && row.p_value <= 1.0);
        }
    }

    #[test]
    fn test_fit_glm() {
        let spec = ModelSpec::glm("g", "hill_binary", &["scaled_altitude", "scaled_stdev_slope"]);
        let model = fit(&spec, &derived(), &FitConfig::default()).unwrap();
        assert_eq!(model.family, Family::BinomialGlm);
        assert!(model.variance_components.is_none());
        assert_eq!(model.r2_marginal, model.r2_conditional);
        assert!(model.focal().unwrap().df.is_none());
        assert!(model.fitted().iter().all(|&m| m > 0.0 && m < 1.0));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let spec = ModelSpec::lmm("m", "scaled_form_complexity", &["scaled_altitude"], "subfamily");
        let ds = derived();
        let a = fit(&spec, &ds, &FitConfig::default()).unwrap();
        let b = fit(&spec, &ds, &FitConfig::default()).unwrap();
        assert_eq!(a.coefficients, b.coefficients);
        assert_eq!(a.random_intercepts, b.random_intercepts);
    }

    #[test]
    fn test_single_group_is_degenerate() {
        let ds = derived();
        let ds = ds
            .with_derived_column(
                "subfamily",
                (0..ds.n_rows()).map(|_| Value::Categorical("Kiranti".into())).collect(),
            )
            .unwrap();
        let spec = ModelSpec::lmm("m", "scaled_cell_complexity", &["scaled_altitude"], "subfamily");
        let r = fit(&spec, &ds, &FitConfig::default());
        assert!(matches!(r, Err(LcError::DegenerateFit(_))));
    }

    #[test]
    fn test_constant_predictor_is_degenerate() {
        let ds = derived();
        let ds = ds
            .with_derived_column("flat", (0..ds.n_rows()).map(|_| Value::Continuous(2.0)).collect())
            .unwrap();
        let spec = ModelSpec::lmm("m", "scaled_cell_complexity", &["flat"], "subfamily");
        assert!(matches!(
            fit(&spec, &ds, &FitConfig::default()),
            Err(LcError::DegenerateFit(_))
        ));
    }

    #[test]
    fn test_missing_column() {
        let spec = ModelSpec::lmm("m", "scaled_cell_complexity", &["scaled_altitude"], "subfamily");
        let r = fit(&spec, &test_support::languages(), &FitConfig::default());
        assert!(matches!(r, Err(LcError::SchemaResolution { .. })));
    }

    #[test]
    fn test_sample_variance() {
        assert_relative_eq!(sample_variance(&[10.0, 20.0, 30.0]), 100.0);
        assert_eq!(sample_variance(&[1.0]), 0.0);
    }
}
