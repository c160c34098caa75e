//! Data structures: raw tables, schema normalization, cleaning and typed datasets.

pub mod clean;
mod dataset;
mod design_matrix;
mod formula;
mod random_effects;
pub mod schema;
mod table;

pub use clean::{clean, CleaningReport};
pub use dataset::{
    ColumnType, Dataset, Value, Variant, CATEGORICAL_COLUMNS, GROUP_COLUMN, KEY_COLUMN,
};
pub use design_matrix::{response_vector, DesignMatrix};
pub(crate) use formula::split_response;
pub use formula::{Formula, Term};
pub use random_effects::{MixedFormula, RandomDesignMatrix, RandomEffect};
pub use schema::{normalize_header, normalize_table, require_columns, REQUIRED_COLUMNS};
pub use table::Table;
