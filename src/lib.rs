//! Language complexity analysis
//!
//! Tests whether the morphological complexity of a language (case marking,
//! word forms, paradigm cells) tracks sociocultural and ecological variables
//! once shared ancestry is controlled with a subfamily random intercept.
//!
//! # Overview
//!
//! - **data**: TSV tables, header normalization, cleaning, typed datasets
//! - **transform**: binary indicators and per-variant z-scaling
//! - **model**: LMM (REML) and logistic GLM fits, the standard catalog
//! - **correct**: Benjamini-Hochberg adjustment
//! - **influence**: Cook's distance, `4/n` flags, sensitivity variants, leave-one-out
//! - **diagnostics**: Shapiro–Wilk checks on residuals and random intercepts
//! - **report**: TSV and JSON export
//! - **pipeline**: config-driven end-to-end run
//!
//! # Example
//!
//! ```no_run
//! use lingcomplex::prelude::*;
//!
//! let report = Analysis::new(AnalysisConfig::default())
//!     .run_tsv("languages.tsv")
//!     .unwrap();
//! report.write_outputs("out").unwrap();
//! ```

pub mod correct;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod influence;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod transform;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::correct_bh;
    pub use crate::data::{
        clean, normalize_table, CleaningReport, Dataset, DesignMatrix, Formula, Table, Value,
        Variant,
    };
    pub use crate::diagnostics::{check_assumptions, shapiro_wilk, AssumptionReport, ShapiroWilk};
    pub use crate::error::{LcError, Result};
    pub use crate::influence::{
        build_sensitivity_variant, cooks_distance, flag_outliers, leave_one_out, InfluenceMethod,
        InfluenceTable, LooResult, SensitivityRule,
    };
    pub use crate::model::{
        fit, fit_catalog, CatalogRun, Family, FitConfig, FitWarning, FittedModel, ModelCatalog,
        ModelSpec,
    };
    pub use crate::pipeline::{prepare_dataset, Analysis, AnalysisConfig, AnalysisReport};
    pub use crate::transform::derive_features;
}
