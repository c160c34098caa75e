//! Error types for the lingcomplex library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum LcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Required column(s) not found after normalization: {}", columns.join(", "))]
    SchemaResolution { columns: Vec<String> },

    #[error("Cleaning left no usable data: {0}")]
    MissingDataExhaustion(String),

    #[error("Cannot z-scale column '{column}': zero variance")]
    DegenerateScaling { column: String },

    #[error("Model cannot be fit: {0}")]
    DegenerateFit(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LcError {
    /// Shorthand for a single missing column.
    pub fn missing_column(column: &str) -> Self {
        LcError::SchemaResolution {
            columns: vec![column.to_string()],
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, LcError>;
