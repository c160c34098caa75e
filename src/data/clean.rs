//! Missing-data cleaning for the normalized table.

use crate::data::table::NA_TEXT;
use crate::data::Table;
use crate::error::{LcError, Result};
use serde::{Deserialize, Serialize};

/// What a cleaning pass removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    /// Columns dropped because they contained a missing cell.
    pub dropped_columns: Vec<String>,
    /// Number of `N/A` cells rewritten to missing.
    pub na_rewritten: usize,
    /// Number of rows dropped for remaining missing cells.
    pub dropped_rows: usize,
    /// Shape of the output table.
    pub n_rows: usize,
    pub n_columns: usize,
}

impl CleaningReport {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.dropped_columns.is_empty() && self.na_rewritten == 0 && self.dropped_rows == 0
    }
}

/// Drop every column that contains any missing cell.
pub fn drop_incomplete_columns(table: &Table) -> (Table, Vec<String>) {
    let mut keep = Vec::new();
    let mut dropped = Vec::new();
    for (j, name) in table.columns().iter().enumerate() {
        if table.rows().iter().all(|r| r[j].is_some()) {
            keep.push(j);
        } else {
            dropped.push(name.clone());
        }
    }
    (table.select_columns(&keep), dropped)
}

/// Rewrite textual `N/A` cells to the missing marker.
pub fn rewrite_na_sentinels(table: &Table) -> (Table, usize) {
    let mut n = 0;
    let out = table.map_cells(|cell| match cell {
        Some(v) if v.trim() == NA_TEXT => {
            n += 1;
            None
        }
        other => other.map(String::from),
    });
    (out, n)
}

/// Drop every row that contains any missing cell.
pub fn drop_incomplete_rows(table: &Table) -> (Table, usize) {
    let out = table.filter_rows(|r| r.iter().all(|c| c.is_some()));
    let dropped = table.n_rows() - out.n_rows();
    (out, dropped)
}

/// Run the three cleaning steps in order.
///
/// Fails with `MissingDataExhaustion` when nothing survives.
pub fn clean(table: &Table) -> Result<(Table, CleaningReport)> {
    let (step1, dropped_columns) = drop_incomplete_columns(table);
    let (step2, na_rewritten) = rewrite_na_sentinels(&step1);
    let (step3, dropped_rows) = drop_incomplete_rows(&step2);

    if step3.n_columns() == 0 {
        return Err(LcError::MissingDataExhaustion(format!(
            "all {} columns contain missing values",
            table.n_columns()
        )));
    }
    if step3.n_rows() == 0 {
        return Err(LcError::MissingDataExhaustion(format!(
            "all {} rows contain missing values after dropping {} column(s)",
            table.n_rows(),
            dropped_columns.len()
        )));
    }

    if !dropped_columns.is_empty() {
        tracing::warn!(columns = ?dropped_columns, "Dropped incomplete columns");
    }
    tracing::info!(
        n_rows = step3.n_rows(),
        n_columns = step3.n_columns(),
        na_rewritten,
        dropped_rows,
        "Cleaned table"
    );

    let report = CleaningReport {
        dropped_columns,
        na_rewritten,
        dropped_rows,
        n_rows: step3.n_rows(),
        n_columns: step3.n_columns(),
    };
    Ok((step3, report))
}
