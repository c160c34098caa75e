//! Raw rectangular string table read from a tab-separated file.

use crate::error::{LcError, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Cell text that means "not applicable" in the upstream sheet.
pub const NA_TEXT: &str = "N/A";

/// A header row plus string cells. `None` is the canonical missing marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Build a table, padding or rejecting rows to match the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        let width = columns.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(LcError::InvalidParameter(format!(
                    "Row {} has {} cells, header has {}",
                    i + 1,
                    row.len(),
                    width
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build from parts whose widths are already known to match.
    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    /// Load a TSV file. Empty cells and the literal `NA` become missing;
    /// short rows are padded with missing cells.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Parse TSV text from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        if columns.is_empty() {
            return Err(LcError::MissingDataExhaustion(
                "Input has no header row".to_string(),
            ));
        }
        let width = columns.len();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let mut row: Vec<Option<String>> = record
                .iter()
                .take(width)
                .map(|f| {
                    let v = f.trim();
                    if v.is_empty() || v == "NA" {
                        None
                    } else {
                        Some(v.to_string())
                    }
                })
                .collect();
            row.resize(width, None);
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Column headers.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows.
    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cells of one column.
    pub fn column(&self, name: &str) -> Result<Vec<Option<&str>>> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| LcError::missing_column(name))?;
        Ok(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    /// Count of missing cells across the table.
    pub fn n_missing(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.iter().filter(|c| c.is_none()).count())
            .sum()
    }

    /// Keep only the columns at the given indices, in order.
    pub fn select_columns(&self, keep: &[usize]) -> Self {
        Self {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| keep.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        }
    }

    /// Keep only rows matching the predicate.
    pub fn filter_rows<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&[Option<String>]) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Apply a function to every cell.
    pub fn map_cells<F>(&self, mut f: F) -> Self
    where
        F: FnMut(Option<&str>) -> Option<String>,
    {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| r.iter().map(|c| f(c.as_deref())).collect())
                .collect(),
        }
    }

    /// Write as TSV, missing cells as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("NA")).collect();
            writeln!(writer, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}
