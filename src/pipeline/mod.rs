//! End-to-end analysis: cleaning, catalog fits, influence, sensitivity
//! refits, leave-one-out sweeps and assumption checks.

mod analysis;

pub use analysis::{prepare_dataset, Analysis, AnalysisConfig, AnalysisReport};
