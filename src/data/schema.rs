//! Header normalization into the canonical column vocabulary.
//!
//! Raw sheet headers are free-form ("Case marking complexity (distinctions +
//! optionality)", "L2?", "Hill/Valley"). Every header is rewritten to a
//! snake_case identifier and then passed through a fixed rename table.

use crate::data::Table;
use crate::error::{LcError, Result};
use std::collections::HashSet;

/// Long generic forms mapped to canonical short names.
pub const CANONICAL_RENAMES: &[(&str, &str)] = &[
    (
        "case_marking_complexity_distinctions_plus_optionality",
        "case_marking_complexity",
    ),
    ("form_complexity_number_of_inflected_forms", "form_complexity"),
    ("cell_complexity_number_of_paradigm_cells", "cell_complexity"),
    ("standard_deviation_of_slope", "stdev_of_slope"),
    ("altitude_m", "altitude"),
    ("speaker_population", "population"),
    ("l2", "L2"),
    ("l2_speakers", "L2"),
    ("hill_or_valley", "hill_valley"),
    ("agriculture_intensity", "agricultural_intensity"),
    ("political_complexity", "political_organization"),
];

/// Columns the analysis needs after normalization and cleaning.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "language",
    "subfamily",
    "hill_valley",
    "cell_complexity",
    "form_complexity",
    "case_marking_complexity",
    "altitude",
    "stdev_of_slope",
    "population",
    "L2",
    "agricultural_intensity",
    "political_organization",
];

/// Rewrite a header into a generic snake_case identifier.
///
/// Never fails: an input with no usable characters becomes `unnamed`.
pub fn normalize_header(raw: &str) -> String {
    let mut replaced = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '+' => replaced.push_str("_plus_"),
            '?' | '(' | ')' | '/' | '-' => replaced.push('_'),
            c if c.is_whitespace() => replaced.push('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => replaced.push(c),
            _ => {}
        }
    }

    let mut collapsed = String::with_capacity(replaced.len());
    for ch in replaced.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }

    let out = collapsed.trim_matches('_').to_lowercase();
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

fn rename(generic: &str) -> Option<&'static str> {
    CANONICAL_RENAMES
        .iter()
        .find(|(from, _)| *from == generic)
        .map(|(_, to)| *to)
}

/// Normalize a header and apply the canonical rename table.
///
/// An already-canonical name with a collision suffix keeps its case, so
/// `L2_2` stays `L2_2` instead of falling back to `l2_2`.
pub fn canonical_name(raw: &str) -> String {
    let generic = normalize_header(raw);
    if let Some(to) = rename(&generic) {
        return to.to_string();
    }
    if let Some((stem, k)) = generic.rsplit_once('_') {
        if !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()) {
            if let Some(to) = rename(stem).filter(|to| to.to_lowercase() == stem) {
                return format!("{}_{}", to, k);
            }
        }
    }
    generic
}

/// Rename every column of a table to its canonical identifier.
///
/// Collisions get `_2`, `_3`, ... suffixes in header order.
pub fn normalize_table(table: &Table) -> Table {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(table.n_columns());

    for raw in table.columns() {
        let base = canonical_name(raw);
        let mut name = base.clone();
        let mut k = 2;
        while seen.contains(&name) {
            name = format!("{}_{}", base, k);
            k += 1;
        }
        seen.insert(name.clone());
        names.push(name);
    }

    let renamed: Vec<(&String, &String)> = table
        .columns()
        .iter()
        .zip(names.iter())
        .filter(|(a, b)| a != b)
        .collect();
    if !renamed.is_empty() {
        tracing::debug!(n_renamed = renamed.len(), "Normalized column headers");
    }

    Table::from_parts(names, table.rows().to_vec())
}

/// Fail with `SchemaResolution` listing every required column that is absent.
pub fn require_columns(table: &Table, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LcError::SchemaResolution { columns: missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header_punctuation() {
        assert_eq!(normalize_header("Hill/Valley"), "hill_valley");
        assert_eq!(normalize_header("L2?"), "l2");
        assert_eq!(normalize_header("Stdev  of slope"), "stdev_of_slope");
        assert_eq!(
            normalize_header("Case marking complexity (distinctions + optionality)"),
            "case_marking_complexity_distinctions_plus_optionality"
        );
        assert_eq!(normalize_header("Altitude (m)"), "altitude_m");
    }

    #[test]
    fn test_normalize_header_never_fails() {
        assert_eq!(normalize_header(""), "unnamed");
        assert_eq!(normalize_header("???"), "unnamed");
        assert_eq!(normalize_header("Größe*%"), "gre");
    }

    #[test]
    fn test_canonical_renames() {
        assert_eq!(
            canonical_name("Case marking complexity (distinctions + optionality)"),
            "case_marking_complexity"
        );
        assert_eq!(canonical_name("L2?"), "L2");
        assert_eq!(canonical_name("Language"), "language");
    }

    #[test]
    fn test_canonical_name_idempotent() {
        for raw in ["L2?", "Hill/Valley", "Altitude (m)", "Subfamily", "weird--name__"] {
            let once = canonical_name(raw);
            assert_eq!(canonical_name(&once), once);
        }
    }

    #[test]
    fn test_normalize_table_dedups() {
        let t = Table::new(
            vec!["Notes".into(), "notes".into(), "NOTES?".into()],
            vec![],
        )
        .unwrap();
        let n = normalize_table(&t);
        assert_eq!(n.columns(), &["notes", "notes_2", "notes_3"]);
        assert_eq!(normalize_table(&n).columns(), n.columns());
    }

    #[test]
    fn test_normalize_table_mixed_case_collision_is_stable() {
        let t = Table::new(vec!["L2?".into(), "L2 speakers".into(), "L2".into()], vec![]).unwrap();
        let once = normalize_table(&t);
        assert_eq!(once.columns(), &["L2", "L2_2", "L2_3"]);
        let twice = normalize_table(&once);
        assert_eq!(twice.columns(), once.columns());
        assert_eq!(canonical_name("L2_2"), "L2_2");
        assert_eq!(canonical_name("Altitude (m) 2"), "altitude_m_2");
    }

    #[test]
    fn test_require_columns() {
        let t = Table::new(vec!["language".into()], vec![]).unwrap();
        match require_columns(&t, &["language", "subfamily", "L2"]) {
            Err(LcError::SchemaResolution { columns }) => {
                assert_eq!(columns, vec!["subfamily", "L2"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
