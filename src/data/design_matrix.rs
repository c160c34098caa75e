//! Design matrix construction from a dataset and formula.

use crate::data::{ColumnType, Dataset, Formula, Term};
use crate::error::{LcError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// A design matrix for linear modeling.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (observations × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Language identifiers (rows).
    row_ids: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        row_ids: Vec<String>,
    ) -> Self {
        Self {
            matrix,
            coefficient_names,
            row_ids,
            reference_levels: HashMap::new(),
        }
    }

    /// Build a design matrix from a dataset and formula.
    ///
    /// Categorical predictors are dummy coded against their alphabetically
    /// first level. Missing values are an error, never imputed.
    pub fn from_formula(dataset: &Dataset, formula: &Formula) -> Result<Self> {
        let row_ids = dataset.languages().to_vec();
        let n = row_ids.len();

        let missing: Vec<String> = formula
            .variables()
            .into_iter()
            .filter(|v| !dataset.has_column(v))
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(LcError::SchemaResolution { columns: missing });
        }

        let mut reference_levels = HashMap::new();
        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if formula.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; n]);
        }

        for term in &formula.terms {
            let var_name = match term {
                Term::Intercept => continue,
                Term::Main(v) => v,
            };
            match dataset.column_type(var_name) {
                Some(ColumnType::Continuous) => {
                    coefficient_names.push(var_name.clone());
                    columns.push(dataset.continuous(var_name)?);
                }
                Some(ColumnType::Categorical) | None => {
                    let values = dataset.categorical(var_name)?;
                    let levels = dataset.levels(var_name)?;
                    if let Some(first) = levels.first() {
                        reference_levels.insert(var_name.clone(), first.clone());
                    }
                    for (k, level) in levels.iter().enumerate() {
                        if formula.intercept && k == 0 {
                            continue;
                        }
                        coefficient_names.push(format!("{}{}", var_name, level));
                        columns.push(
                            values
                                .iter()
                                .map(|v| if v == level { 1.0 } else { 0.0 })
                                .collect(),
                        );
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            row_ids,
            reference_levels,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Row identifiers.
    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    /// Number of observations (rows).
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Copy without the given row.
    pub fn without_row(&self, row: usize) -> Self {
        Self {
            matrix: self.matrix.clone().remove_row(row),
            coefficient_names: self.coefficient_names.clone(),
            row_ids: self
                .row_ids
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != row)
                .map(|(_, id)| id.clone())
                .collect(),
            reference_levels: self.reference_levels.clone(),
        }
    }
}

/// Extract a numeric response column, rejecting categorical responses.
pub fn response_vector(dataset: &Dataset, column: &str) -> Result<Vec<f64>> {
    match dataset.column_type(column) {
        Some(ColumnType::Continuous) => dataset.continuous(column),
        Some(ColumnType::Categorical) => Err(LcError::InvalidVariableType {
            column: column.to_string(),
            reason: "response must be numeric".to_string(),
        }),
        None => Err(LcError::missing_column(column)),
    }
}
