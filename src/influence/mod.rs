//! Influence diagnostics and robustness checks.
//!
//! - **cooks**: per-observation Cook's distance for fitted models
//! - **outliers**: the `4/n` flagging rule
//! - **sensitivity**: declared rules that turn flags into an exclusion list
//! - **loo**: leave-one-language-out refit sweeps

pub mod cooks;
pub mod loo;
pub mod outliers;
pub mod sensitivity;

pub use cooks::{cooks_distance, InfluenceMethod, InfluenceRow, InfluenceTable};
pub use loo::{leave_one_out, LooOutcome, LooRecord, LooResult, LooSummary, DEFAULT_ALPHA};
pub use outliers::{flag_outliers, outlier_threshold};
pub use sensitivity::{build_sensitivity_variant, SensitivityOutcome, SensitivityRule};
