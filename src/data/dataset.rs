//! Typed, immutable dataset variants keyed by language.

use crate::data::Table;
use crate::error::{LcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Identifier column; one row per language.
pub const KEY_COLUMN: &str = "language";

/// Grouping factor for the random intercept.
pub const GROUP_COLUMN: &str = "subfamily";

/// Columns always read as categorical, even when every value looks numeric.
pub const CATEGORICAL_COLUMNS: &[&str] = &[
    "language",
    "subfamily",
    "family",
    "hill_valley",
    "L2",
    "agricultural_intensity",
    "political_organization",
];

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Categorical value with a string level.
    Categorical(String),
    /// Continuous numeric value.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Value {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Value::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Value::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    /// Text form used for export and grouping.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Categorical(s) => Some(s.clone()),
            Value::Continuous(v) => Some(v.to_string()),
            Value::Missing => None,
        }
    }
}

/// Column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Categorical,
    Continuous,
}

/// Which snapshot of the observations a dataset represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// All rows surviving cleaning.
    Full,
    /// Full minus a declared set of influential languages.
    Sensitivity { excluded: Vec<String> },
    /// Base variant minus one language, used by the robustness sweep.
    LeaveOneOut { dropped: String },
}

impl Variant {
    /// Short label for logs and file names.
    pub fn label(&self) -> String {
        match self {
            Variant::Full => "full".to_string(),
            Variant::Sensitivity { .. } => "sensitivity".to_string(),
            Variant::LeaveOneOut { dropped } => format!("loo_{}", dropped),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Full => write!(f, "full"),
            Variant::Sensitivity { excluded } => write!(f, "sensitivity (-{})", excluded.join(", -")),
            Variant::LeaveOneOut { dropped } => write!(f, "leave-one-out (-{})", dropped),
        }
    }
}

/// Observations for one dataset variant.
///
/// Never mutated in place: derivations and exclusions return a new value.
#[derive(Debug, Clone)]
pub struct Dataset {
    languages: Vec<String>,
    column_names: Vec<String>,
    data: HashMap<String, Vec<Value>>,
    column_types: HashMap<String, ColumnType>,
    derived: Vec<String>,
    variant: Variant,
}

impl Dataset {
    /// Build the `Full` variant from a cleaned, normalized table.
    ///
    /// Columns are continuous if every present value parses as a number,
    /// except those in [`CATEGORICAL_COLUMNS`].
    pub fn from_table(table: &Table) -> Result<Self> {
        let key_idx = table
            .column_index(KEY_COLUMN)
            .ok_or_else(|| LcError::missing_column(KEY_COLUMN))?;

        let mut languages = Vec::with_capacity(table.n_rows());
        let mut seen = HashSet::new();
        for row in table.rows() {
            let lang = row[key_idx].clone().ok_or_else(|| LcError::InvalidVariableType {
                column: KEY_COLUMN.to_string(),
                reason: "language identifier is missing".to_string(),
            })?;
            if !seen.insert(lang.clone()) {
                return Err(LcError::InvalidParameter(format!(
                    "Duplicate language '{}'",
                    lang
                )));
            }
            languages.push(lang);
        }

        let mut data = HashMap::new();
        let mut column_types = HashMap::new();
        for (j, name) in table.columns().iter().enumerate() {
            let cells: Vec<Option<&str>> = table.rows().iter().map(|r| r[j].as_deref()).collect();
            let numeric = !CATEGORICAL_COLUMNS.contains(&name.as_str())
                && cells
                    .iter()
                    .all(|c| c.map(|v| v.parse::<f64>().is_ok()).unwrap_or(true));
            let col_type = if numeric {
                ColumnType::Continuous
            } else {
                ColumnType::Categorical
            };
            let values = cells
                .iter()
                .map(|c| match (c, col_type) {
                    (None, _) => Value::Missing,
                    (Some(v), ColumnType::Continuous) => v
                        .parse::<f64>()
                        .map(Value::Continuous)
                        .unwrap_or(Value::Missing),
                    (Some(v), ColumnType::Categorical) => Value::Categorical(v.to_string()),
                })
                .collect();
            data.insert(name.clone(), values);
            column_types.insert(name.clone(), col_type);
        }

        Ok(Self {
            languages,
            column_names: table.columns().to_vec(),
            data,
            column_types,
            derived: Vec::new(),
            variant: Variant::Full,
        })
    }

    /// Build a dataset directly from columns. Used by tests and the CLI.
    pub fn from_columns(
        languages: Vec<String>,
        columns: Vec<(String, Vec<Value>)>,
    ) -> Result<Self> {
        let n = languages.len();
        let mut ds = Self {
            data: HashMap::from([(
                KEY_COLUMN.to_string(),
                languages.iter().cloned().map(Value::Categorical).collect(),
            )]),
            column_types: HashMap::from([(KEY_COLUMN.to_string(), ColumnType::Categorical)]),
            column_names: vec![KEY_COLUMN.to_string()],
            languages,
            derived: Vec::new(),
            variant: Variant::Full,
        };
        for (name, values) in columns {
            if values.len() != n {
                return Err(LcError::InvalidParameter(format!(
                    "Column '{}' has {} values for {} languages",
                    name,
                    values.len(),
                    n
                )));
            }
            ds = ds.with_column_inner(&name, values, false);
        }
        Ok(ds)
    }

    fn with_column_inner(mut self, name: &str, values: Vec<Value>, derived: bool) -> Self {
        let col_type = if values
            .iter()
            .all(|v| matches!(v, Value::Continuous(_) | Value::Missing))
            && values.iter().any(|v| !v.is_missing())
        {
            ColumnType::Continuous
        } else {
            ColumnType::Categorical
        };
        if !self.column_names.iter().any(|c| c == name) {
            self.column_names.push(name.to_string());
        }
        if derived && !self.derived.iter().any(|c| c == name) {
            self.derived.push(name.to_string());
        }
        self.column_types.insert(name.to_string(), col_type);
        self.data.insert(name.to_string(), values);
        self
    }

    /// Return a new dataset with a derived column added (or replaced).
    pub fn with_derived_column(&self, name: &str, values: Vec<Value>) -> Result<Self> {
        if values.len() != self.n_rows() {
            return Err(LcError::InvalidParameter(format!(
                "Derived column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        Ok(self.clone().with_column_inner(name, values, true))
    }

    /// New variant without the given languages. Derived columns are dropped
    /// so they must be recomputed on the new rows.
    pub fn exclude_languages(&self, excluded: &[String], variant: Variant) -> Result<Self> {
        let unknown: Vec<&String> = excluded
            .iter()
            .filter(|l| !self.languages.contains(l))
            .collect();
        if !unknown.is_empty() {
            return Err(LcError::InvalidParameter(format!(
                "Cannot exclude unknown language(s): {:?}",
                unknown
            )));
        }

        let keep: Vec<usize> = (0..self.n_rows())
            .filter(|&i| !excluded.contains(&self.languages[i]))
            .collect();

        let column_names: Vec<String> = self
            .column_names
            .iter()
            .filter(|c| !self.derived.contains(c))
            .cloned()
            .collect();
        let data = column_names
            .iter()
            .map(|c| {
                let col = &self.data[c];
                (c.clone(), keep.iter().map(|&i| col[i].clone()).collect())
            })
            .collect();
        let column_types = column_names
            .iter()
            .map(|c| (c.clone(), self.column_types[c]))
            .collect();

        Ok(Self {
            languages: keep.iter().map(|&i| self.languages[i].clone()).collect(),
            column_names,
            data,
            column_types,
            derived: Vec::new(),
            variant,
        })
    }

    /// Language identifiers in row order.
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Distinct languages, sorted.
    pub fn distinct_languages(&self) -> Vec<String> {
        self.languages
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Names of columns produced by feature derivation.
    pub fn derived_columns(&self) -> &[String] {
        &self.derived
    }

    /// Which variant this is.
    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Number of rows (languages).
    pub fn n_rows(&self) -> usize {
        self.languages.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.data.contains_key(column)
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.column_types.get(column).copied()
    }

    /// All values for a column.
    pub fn column(&self, column: &str) -> Result<&[Value]> {
        self.data
            .get(column)
            .map(|v| v.as_slice())
            .ok_or_else(|| LcError::missing_column(column))
    }

    /// A column as numbers; any missing or categorical value is an error.
    pub fn continuous(&self, column: &str) -> Result<Vec<f64>> {
        self.column(column)?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_continuous().ok_or_else(|| LcError::InvalidVariableType {
                    column: column.to_string(),
                    reason: format!(
                        "expected a number for '{}', found {:?}",
                        self.languages[i], v
                    ),
                })
            })
            .collect()
    }

    /// A column as text levels; missing values are an error.
    pub fn categorical(&self, column: &str) -> Result<Vec<String>> {
        self.column(column)?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.to_text().ok_or_else(|| LcError::InvalidVariableType {
                    column: column.to_string(),
                    reason: format!("missing value for '{}'", self.languages[i]),
                })
            })
            .collect()
    }

    /// Sorted unique levels of a categorical column.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let set: BTreeSet<String> = self
            .column(column)?
            .iter()
            .filter_map(|v| v.to_text())
            .collect();
        Ok(set.into_iter().collect())
    }

    /// Number of missing cells across the given columns (all when empty).
    pub fn n_missing(&self, columns: &[&str]) -> usize {
        let names: Vec<&str> = if columns.is_empty() {
            self.column_names.iter().map(|s| s.as_str()).collect()
        } else {
            columns.to_vec()
        };
        names
            .iter()
            .filter_map(|c| self.data.get(*c))
            .map(|col| col.iter().filter(|v| v.is_missing()).count())
            .sum()
    }

    /// Export back to a string table for the reporting side.
    pub fn to_table(&self) -> Table {
        let rows = (0..self.n_rows())
            .map(|i| {
                self.column_names
                    .iter()
                    .map(|c| self.data[c][i].to_text())
                    .collect()
            })
            .collect();
        Table::from_parts(self.column_names.clone(), rows)
    }
}
