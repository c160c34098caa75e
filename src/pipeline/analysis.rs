//! Config-driven analysis runner.
//!
//! Stages run in a fixed order, each producing a new value:
//!
//! 1. normalize headers and require the analysis columns
//! 2. clean missing data and type the `Full` variant
//! 3. derive features and fit the catalog on `Full`
//! 4. Cook's distance for every fitted model, `4/n` flags
//! 5. build the `Sensitivity` variant from the cleaned base, derive again, refit
//! 6. leave-one-out sweeps and assumption checks

use crate::data::{clean, normalize_table, require_columns, CleaningReport, Dataset, Table, REQUIRED_COLUMNS};
use crate::diagnostics::{check_assumptions, AssumptionReport};
use crate::error::{LcError, Result};
use crate::influence::{
    build_sensitivity_variant, cooks_distance, leave_one_out, InfluenceMethod, InfluenceTable,
    LooResult, SensitivityRule, DEFAULT_ALPHA,
};
use crate::model::{fit_catalog, CatalogRun, FitConfig, ModelCatalog, ModelSpec};
use crate::report;
use crate::transform::derive_features;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Analysis configuration, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub name: String,
    pub description: Option<String>,
    /// Which languages the sensitivity variant drops.
    pub sensitivity: SensitivityRule,
    pub fit: FitConfig,
    pub influence_method: InfluenceMethod,
    /// Catalog models to sweep. Empty means every LMM.
    pub loo_specs: Vec<String>,
    pub alpha: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "language-complexity".to_string(),
            description: Some(
                "Morphological complexity against sociocultural and ecological predictors"
                    .to_string(),
            ),
            sensitivity: SensitivityRule::default(),
            fit: FitConfig::default(),
            influence_method: InfluenceMethod::default(),
            loo_specs: Vec::new(),
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(LcError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(LcError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        self.fit.validate()
    }
}

/// Everything one analysis run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub name: String,
    pub config: AnalysisConfig,
    pub cleaning: CleaningReport,
    pub full: CatalogRun,
    pub influence: Vec<InfluenceTable>,
    pub sensitivity_excluded: Vec<String>,
    /// Flagged languages the sensitivity rule kept.
    pub flagged_kept: Vec<String>,
    pub sensitivity: CatalogRun,
    pub loo: Vec<LooResult>,
    pub assumptions: Vec<AssumptionReport>,
    /// Derived `Full` variant.
    #[serde(skip)]
    pub full_dataset: Dataset,
    /// Derived `Sensitivity` variant.
    #[serde(skip)]
    pub sensitivity_dataset: Dataset,
}

impl AnalysisReport {
    /// Write every output under `dir`, creating it if needed.
    pub fn write_outputs<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.full_dataset.to_table().to_tsv(dir.join("dataset_full.tsv"))?;
        self.sensitivity_dataset
            .to_table()
            .to_tsv(dir.join("dataset_sensitivity.tsv"))?;
        report::write_coefficients_tsv(dir.join("coefficients.tsv"), &[&self.full, &self.sensitivity])?;
        report::write_influence_tsv(dir.join("influence.tsv"), &self.influence)?;
        report::write_loo_tsv(dir.join("loo.tsv"), &self.loo)?;
        report::write_assumptions_tsv(dir.join("assumptions.tsv"), &self.assumptions)?;
        report::write_json(dir.join("report.json"), self)?;
        info!(dir = %dir.display(), "outputs written");
        Ok(())
    }
}

/// Normalize, check and clean a raw table into the `Full` variant.
pub fn prepare_dataset(raw: &Table) -> Result<(Dataset, CleaningReport)> {
    let normalized = normalize_table(raw);
    require_columns(&normalized, REQUIRED_COLUMNS)?;
    let (cleaned, report) = clean(&normalized)?;
    require_columns(&cleaned, REQUIRED_COLUMNS)?;
    let dataset = Dataset::from_table(&cleaned)?;
    Ok((dataset, report))
}

/// A configured analysis over a model catalog.
#[derive(Debug, Clone)]
pub struct Analysis {
    config: AnalysisConfig,
    catalog: ModelCatalog,
}

impl Analysis {
    /// The standard catalog with the given configuration.
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            catalog: ModelCatalog::standard(),
        }
    }

    /// Replace the model catalog.
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Run on a TSV file.
    pub fn run_tsv<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisReport> {
        self.run(&Table::from_tsv(path)?)
    }

    /// Run every stage on a raw table.
    pub fn run(&self, raw: &Table) -> Result<AnalysisReport> {
        self.config.validate()?;
        let (base, cleaning) = prepare_dataset(raw)?;
        info!(n = base.n_rows(), "full variant ready");

        let full_dataset = derive_features(&base)?;
        let full = fit_catalog(&self.catalog, &full_dataset, &self.config.fit);

        let influence = self.influence_tables(&full, &full_dataset);

        let outcome = build_sensitivity_variant(&base, &self.config.sensitivity, &influence)?;
        let sensitivity_dataset = derive_features(&outcome.dataset).map_err(|e| {
            LcError::Pipeline(format!(
                "features cannot be derived on {}: {}",
                outcome.dataset.variant(),
                e
            ))
        })?;
        let sensitivity = fit_catalog(&self.catalog, &sensitivity_dataset, &self.config.fit);

        let loo = self.loo_sweeps(&base)?;

        let assumptions: Vec<AssumptionReport> = full
            .models()
            .chain(sensitivity.models())
            .map(check_assumptions)
            .collect();

        info!(
            full_fitted = full.n_fitted(),
            sensitivity_fitted = sensitivity.n_fitted(),
            loo_sweeps = loo.len(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            name: self.config.name.clone(),
            config: self.config.clone(),
            cleaning,
            full,
            influence,
            sensitivity_excluded: outcome.excluded,
            flagged_kept: outcome.flagged_kept,
            sensitivity,
            loo,
            assumptions,
            full_dataset,
            sensitivity_dataset,
        })
    }

    fn influence_tables(&self, run: &CatalogRun, dataset: &Dataset) -> Vec<InfluenceTable> {
        run.models()
            .filter_map(|model| {
                let spec = self.catalog.get(&model.spec_name)?;
                match cooks_distance(model, spec, dataset, &self.config.fit, self.config.influence_method) {
                    Ok(table) => Some(table),
                    Err(e) => {
                        warn!(model = %model.spec_name, "influence failed: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    fn loo_specs(&self) -> Result<Vec<&ModelSpec>> {
        if self.config.loo_specs.is_empty() {
            return Ok(self.catalog.lmm_specs());
        }
        self.config
            .loo_specs
            .iter()
            .map(|name| {
                self.catalog.get(name).ok_or_else(|| {
                    LcError::InvalidParameter(format!("Unknown model '{}' in loo_specs", name))
                })
            })
            .collect()
    }

    fn loo_sweeps(&self, base: &Dataset) -> Result<Vec<LooResult>> {
        self.loo_specs()?
            .into_iter()
            .map(|spec| leave_one_out(spec, base, &self.config.fit, self.config.alpha))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_yaml_roundtrip() {
        let config = AnalysisConfig::default();
        let yaml = config.to_yaml().unwrap();
        let back = AnalysisConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.sensitivity, SensitivityRule::Explicit { languages: vec!["Limbu".into()] });
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "name: quick\nsensitivity:\n  rule: all_flagged\nfit:\n  max_iter: 50\nloo_specs: [\"form_complexity~L2\"]\n";
        let config = AnalysisConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "quick");
        assert_eq!(config.sensitivity, SensitivityRule::AllFlagged);
        assert_eq!(config.fit.max_iter, 50);
        assert_eq!(config.fit.tol, FitConfig::default().tol);
        assert_eq!(config.alpha, DEFAULT_ALPHA);
        assert_eq!(config.influence_method, InfluenceMethod::FixedVariance);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        assert!(AnalysisConfig::from_yaml("alpha: 0.0").is_err());
    }

    #[test]
    fn test_unknown_loo_spec() {
        let config = AnalysisConfig {
            loo_specs: vec!["nope".into()],
            ..AnalysisConfig::default()
        };
        let analysis = Analysis::new(config);
        assert!(analysis.loo_specs().is_err());
    }

    #[test]
    fn test_prepare_reports_missing_columns() {
        let raw = Table::new(
            vec!["Language".into(), "Subfamily".into()],
            vec![vec![Some("Limbu".into()), Some("Kiranti".into())]],
        )
        .unwrap();
        match prepare_dataset(&raw) {
            Err(LcError::SchemaResolution { columns }) => {
                assert!(columns.contains(&"hill_valley".to_string()));
                assert!(!columns.contains(&"language".to_string()));
            }
            other => panic!("expected SchemaResolution, got {:?}", other.map(|_| ())),
        }
    }
}
