//! Model assumption checks.
//!
//! - **normality**: Shapiro–Wilk test (Royston's approximation)
//! - **assumptions**: residual and random-intercept checks for a fitted model

pub mod assumptions;
pub mod normality;

pub use assumptions::{check_assumptions, AssumptionReport, NormalityCheck, ResidualPoint};
pub use normality::{shapiro_wilk, ShapiroWilk, SW_MAX_N, SW_MIN_N};
