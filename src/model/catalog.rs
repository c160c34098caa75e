//! The declared catalog of models and batch fitting over a variant.

use crate::correct::correct_bh;
use crate::data::{Dataset, Variant, GROUP_COLUMN};
use crate::error::{LcError, Result};
use crate::model::{fit, Family, FitConfig, FittedModel, ModelSpec, VariantSelector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Scaled complexity responses for the mixed models.
pub const COMPLEXITY_RESPONSES: &[&str] = &[
    "scaled_case_marking_complexity",
    "scaled_form_complexity",
    "scaled_cell_complexity",
];

/// Single predictors crossed with every complexity response.
pub const LMM_PREDICTORS: &[&str] = &[
    "hill_valley",
    "L2",
    "scaled_population",
    "agriculture_binary",
    "political_organization_binary",
    "scaled_altitude",
    "scaled_stdev_slope",
];

/// Binary terrain responses for the logistic models.
pub const GLM_RESPONSES: &[&str] = &["hill_binary", "hill_valley_binary"];

/// Predictor sets for the logistic models.
pub const GLM_PREDICTOR_SETS: &[&[&str]] = &[
    &["scaled_altitude"],
    &["scaled_stdev_slope"],
    &["scaled_altitude", "scaled_stdev_slope"],
];

/// Focal coefficient for the three-level terrain predictor.
pub const HILL_VALLEY_FOCAL: &str = "hill_valleyValley";

/// A named, ordered set of model specifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    specs: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Build a catalog, rejecting duplicate names.
    pub fn new(specs: Vec<ModelSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for s in &specs {
            if !seen.insert(s.name.as_str()) {
                return Err(LcError::InvalidParameter(format!(
                    "Duplicate model name '{}'",
                    s.name
                )));
            }
        }
        Ok(Self { specs })
    }

    /// The standard analysis: every complexity response against every
    /// single predictor with a subfamily random intercept, plus the terrain
    /// logistic models. All are declared for the full and sensitivity variants.
    pub fn standard() -> Self {
        let mut specs = Vec::new();
        for response in COMPLEXITY_RESPONSES {
            for predictor in LMM_PREDICTORS {
                let name = format!("{}~{}", response.trim_start_matches("scaled_"), predictor);
                let mut spec = ModelSpec::lmm(&name, response, &[predictor], GROUP_COLUMN);
                if *predictor == "hill_valley" {
                    spec = spec.with_focal(HILL_VALLEY_FOCAL);
                }
                specs.push(spec.with_variant(VariantSelector::Both));
            }
        }
        for response in GLM_RESPONSES {
            for predictors in GLM_PREDICTOR_SETS {
                let name = format!("{}~{}", response, predictors.join("+"));
                specs.push(ModelSpec::glm(&name, response, predictors).with_variant(VariantSelector::Both));
            }
        }
        Self { specs }
    }

    /// All specifications, in declaration order.
    pub fn specs(&self) -> &[ModelSpec] {
        &self.specs
    }

    /// Look up a specification by name.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specifications declared for a variant.
    pub fn for_variant(&self, variant: &Variant) -> Vec<&ModelSpec> {
        self.specs.iter().filter(|s| s.variant.matches(variant)).collect()
    }

    /// Mixed-model specifications.
    pub fn lmm_specs(&self) -> Vec<&ModelSpec> {
        self.specs.iter().filter(|s| s.family == Family::Lmm).collect()
    }
}

/// Outcome of fitting one catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CatalogEntry {
    Fitted {
        model: FittedModel,
        /// BH-adjusted focal p-value across the run.
        q_value: Option<f64>,
    },
    Failed {
        spec_name: String,
        reason: String,
    },
}

impl CatalogEntry {
    pub fn spec_name(&self) -> &str {
        match self {
            CatalogEntry::Fitted { model, .. } => &model.spec_name,
            CatalogEntry::Failed { spec_name, .. } => spec_name,
        }
    }

    pub fn model(&self) -> Option<&FittedModel> {
        match self {
            CatalogEntry::Fitted { model, .. } => Some(model),
            CatalogEntry::Failed { .. } => None,
        }
    }
}

/// Every catalog fit for one dataset variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRun {
    pub variant: Variant,
    pub n_obs: usize,
    pub entries: Vec<CatalogEntry>,
}

impl CatalogRun {
    /// Successfully fitted models.
    pub fn models(&self) -> impl Iterator<Item = &FittedModel> {
        self.entries.iter().filter_map(|e| e.model())
    }

    /// Fitted model by spec name.
    pub fn get(&self, name: &str) -> Option<&FittedModel> {
        self.models().find(|m| m.spec_name == name)
    }

    pub fn n_fitted(&self) -> usize {
        self.models().count()
    }

    pub fn n_failed(&self) -> usize {
        self.entries.len() - self.n_fitted()
    }
}

/// Fit every specification declared for the dataset's variant.
///
/// Fits run in parallel; a failure is recorded on its entry and the rest of
/// the run continues. Focal p-values are BH-adjusted across the successful
/// fits.
pub fn fit_catalog(catalog: &ModelCatalog, dataset: &Dataset, config: &FitConfig) -> CatalogRun {
    let specs = catalog.for_variant(dataset.variant());

    let mut entries: Vec<CatalogEntry> = specs
        .par_iter()
        .map(|spec| match fit(spec, dataset, config) {
            Ok(model) => CatalogEntry::Fitted {
                model,
                q_value: None,
            },
            Err(e) => {
                warn!(model = %spec.name, variant = %dataset.variant(), "fit failed: {}", e);
                CatalogEntry::Failed {
                    spec_name: spec.name.clone(),
                    reason: e.to_string(),
                }
            }
        })
        .collect();

    adjust_catalog_pvalues(&mut entries);

    let run = CatalogRun {
        variant: dataset.variant().clone(),
        n_obs: dataset.n_rows(),
        entries,
    };
    info!(
        variant = %run.variant,
        n = run.n_obs,
        fitted = run.n_fitted(),
        failed = run.n_failed(),
        "catalog fitted"
    );
    run
}

/// Fill in BH q-values for the focal coefficients of fitted entries.
pub fn adjust_catalog_pvalues(entries: &mut [CatalogEntry]) {
    let (labels, p_values): (Vec<String>, Vec<f64>) = entries
        .iter()
        .filter_map(|e| e.model())
        .map(|m| {
            let p = m.focal().map(|c| c.p_value).unwrap_or(f64::NAN);
            (m.spec_name.clone(), p)
        })
        .unzip();
    let bh = correct_bh(&p_values, &labels);

    for entry in entries.iter_mut() {
        if let CatalogEntry::Fitted { model, q_value } = entry {
            *q_value = bh.get_qvalue(&model.spec_name).filter(|q| !q.is_nan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support;
    use crate::transform::derive_features;

    #[test]
    fn test_standard_catalog_shape() {
        let catalog = ModelCatalog::standard();
        assert_eq!(catalog.len(), 3 * 7 + 2 * 3);
        assert_eq!(catalog.lmm_specs().len(), 21);
        assert!(catalog.get("case_marking_complexity~L2").is_some());
        assert!(catalog.get("hill_binary~scaled_altitude+scaled_stdev_slope").is_some());
        assert_eq!(
            catalog.get("form_complexity~hill_valley").unwrap().focal_coefficient,
            HILL_VALLEY_FOCAL
        );
        // Names are unique
        assert!(ModelCatalog::new(catalog.specs().to_vec()).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let s = ModelSpec::glm("g", "hill_binary", &["scaled_altitude"]);
        assert!(ModelCatalog::new(vec![s.clone(), s]).is_err());
    }

    #[test]
    fn test_for_variant() {
        let full_only = ModelSpec::glm("a", "hill_binary", &["scaled_altitude"])
            .with_variant(VariantSelector::Full);
        let both = ModelSpec::glm("b", "hill_binary", &["scaled_stdev_slope"]);
        let catalog = ModelCatalog::new(vec![full_only, both]).unwrap();
        let sens = Variant::Sensitivity { excluded: vec!["Limbu".into()] };
        assert_eq!(catalog.for_variant(&Variant::Full).len(), 2);
        assert_eq!(catalog.for_variant(&sens).len(), 1);
    }

    #[test]
    fn test_fit_catalog_records_failures() {
        let ds = derive_features(&test_support::languages()).unwrap();
        let good = ModelSpec::lmm("good", "scaled_cell_complexity", &["scaled_altitude"], "subfamily");
        let bad = ModelSpec::lmm("bad", "scaled_cell_complexity", &["not_a_column"], "subfamily");
        let catalog = ModelCatalog::new(vec![good, bad]).unwrap();
        let run = fit_catalog(&catalog, &ds, &FitConfig::default());
        assert_eq!(run.entries.len(), 2);
        assert_eq!(run.n_fitted(), 1);
        assert_eq!(run.n_failed(), 1);
        // Declaration order is kept
        assert_eq!(run.entries[0].spec_name(), "good");
        match &run.entries[0] {
            CatalogEntry::Fitted { q_value, model } => {
                assert_eq!(*q_value, model.focal().map(|c| c.p_value));
            }
            other => panic!("expected a fitted entry, got {:?}", other),
        }
        assert!(matches!(run.entries[1], CatalogEntry::Failed { .. }));
    }

    #[test]
    fn test_standard_catalog_on_languages() {
        let ds = derive_features(&test_support::languages()).unwrap();
        let run = fit_catalog(&ModelCatalog::standard(), &ds, &FitConfig::default());
        assert_eq!(run.entries.len(), 27);
        assert_eq!(run.n_failed(), 0);
        for m in run.models() {
            assert!(m.focal().is_some(), "{} has no focal row", m.spec_name);
        }
    }
}
