//! Feature derivation: binary indicators and per-variant z-scaling.
//!
//! Every derived column is computed from the rows of the dataset it is
//! called on, so a sensitivity or leave-one-out variant always gets its own
//! means and standard deviations.

use crate::data::{Dataset, Value};
use crate::error::{LcError, Result};
use tracing::debug;

/// Level of `agricultural_intensity` coded as 1.
pub const INTENSIVE_AGRICULTURE: &str = "Intensive/irrigated";

/// Level of `political_organization` coded as 1.
pub const STATE_ORGANIZATION: &str = "State";

/// A binary indicator derived from one categorical column.
struct BinaryRule {
    target: &'static str,
    source: &'static str,
    level: &'static str,
    /// When true the indicator is 1 for every level except `level`.
    negate: bool,
}

const BINARY_RULES: &[BinaryRule] = &[
    BinaryRule {
        target: "agriculture_binary",
        source: "agricultural_intensity",
        level: INTENSIVE_AGRICULTURE,
        negate: false,
    },
    BinaryRule {
        target: "political_organization_binary",
        source: "political_organization",
        level: STATE_ORGANIZATION,
        negate: false,
    },
    BinaryRule {
        target: "hill_binary",
        source: "hill_valley",
        level: "Hill",
        negate: false,
    },
    BinaryRule {
        target: "hill_valley_binary",
        source: "hill_valley",
        level: "Split",
        negate: true,
    },
];

/// `(target, source)` pairs for z-scaled columns.
pub const SCALED_COLUMNS: &[(&str, &str)] = &[
    ("scaled_population", "population"),
    ("scaled_altitude", "altitude"),
    ("scaled_stdev_slope", "stdev_of_slope"),
    ("scaled_case_marking_complexity", "case_marking_complexity"),
    ("scaled_form_complexity", "form_complexity"),
    ("scaled_cell_complexity", "cell_complexity"),
];

/// Names of all columns added by [`derive_features`].
pub fn derived_column_names() -> Vec<&'static str> {
    BINARY_RULES
        .iter()
        .map(|r| r.target)
        .chain(SCALED_COLUMNS.iter().map(|(t, _)| *t))
        .collect()
}

/// Source columns [`derive_features`] reads.
pub fn source_columns() -> Vec<&'static str> {
    let mut cols: Vec<&str> = BINARY_RULES
        .iter()
        .map(|r| r.source)
        .chain(SCALED_COLUMNS.iter().map(|(_, s)| *s))
        .collect();
    cols.sort();
    cols.dedup();
    cols
}

/// Add the binary indicators and scaled columns to a dataset.
///
/// Original columns are kept. Missing source columns are reported together.
pub fn derive_features(dataset: &Dataset) -> Result<Dataset> {
    let missing: Vec<String> = source_columns()
        .into_iter()
        .filter(|c| !dataset.has_column(c))
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        return Err(LcError::SchemaResolution { columns: missing });
    }

    let mut out = dataset.clone();

    for rule in BINARY_RULES {
        let values = binarize(dataset, rule.source, rule.level, rule.negate)?;
        out = out.with_derived_column(rule.target, values)?;
    }

    for (target, source) in SCALED_COLUMNS {
        let raw = dataset.continuous(source)?;
        let scaled = zscore(&raw).map_err(|e| match e {
            LcError::DegenerateScaling { .. } => LcError::DegenerateScaling {
                column: source.to_string(),
            },
            other => other,
        })?;
        out = out.with_derived_column(target, scaled.into_iter().map(Value::Continuous).collect())?;
    }

    debug!(
        variant = %dataset.variant(),
        n = dataset.n_rows(),
        "derived {} feature columns",
        BINARY_RULES.len() + SCALED_COLUMNS.len()
    );

    Ok(out)
}

fn binarize(dataset: &Dataset, column: &str, level: &str, negate: bool) -> Result<Vec<Value>> {
    let values = dataset.categorical(column)?;
    Ok(values
        .iter()
        .map(|v| {
            let hit = v == level;
            Value::Continuous(if hit != negate { 1.0 } else { 0.0 })
        })
        .collect())
}

/// Z-score with the sample standard deviation (n − 1 denominator).
///
/// Fails with [`LcError::DegenerateScaling`] on fewer than two values or zero
/// variance.
///
/// # Examples
/// ```
/// use lingcomplex::transform::zscore;
/// let z = zscore(&[10.0, 20.0, 30.0]).unwrap();
/// assert_eq!(z, vec![-1.0, 0.0, 1.0]);
/// ```
pub fn zscore(values: &[f64]) -> Result<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return Err(LcError::DegenerateScaling {
            column: "<values>".to_string(),
        });
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let sd = var.sqrt();
    if !sd.is_finite() || sd <= f64::EPSILON * mean.abs().max(1.0) {
        return Err(LcError::DegenerateScaling {
            column: "<values>".to_string(),
        });
    }
    Ok(values.iter().map(|v| (v - mean) / sd).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variant;
    use approx::assert_relative_eq;

    fn cat(values: &[&str]) -> Vec<Value> {
        values.iter().map(|s| Value::Categorical(s.to_string())).collect()
    }

    fn num(values: &[f64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Continuous(v)).collect()
    }

    fn dataset() -> Dataset {
        Dataset::from_columns(
            vec!["A".into(), "B".into(), "C".into(), "D".into(), "E".into()],
            vec![
                ("subfamily".into(), cat(&["K", "K", "N", "N", "T"])),
                ("hill_valley".into(), cat(&["Hill", "Valley", "Split", "Hill", "Valley"])),
                (
                    "agricultural_intensity".into(),
                    cat(&["Intensive/irrigated", "Extensive", "Intensive/irrigated", "None", "Extensive"]),
                ),
                ("political_organization".into(), cat(&["State", "Chiefdom", "Band", "State", "State"])),
                ("population".into(), num(&[1000.0, 5000.0, 200.0, 80000.0, 3000.0])),
                ("altitude".into(), num(&[1200.0, 300.0, 800.0, 2500.0, 150.0])),
                ("stdev_of_slope".into(), num(&[5.0, 1.0, 3.0, 8.0, 0.5])),
                ("case_marking_complexity".into(), num(&[10.0, 4.0, 7.0, 12.0, 3.0])),
                ("form_complexity".into(), num(&[30.0, 12.0, 18.0, 40.0, 9.0])),
                ("cell_complexity".into(), num(&[20.0, 8.0, 11.0, 25.0, 7.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_zscore_example() {
        let z = zscore(&[10.0, 20.0, 30.0]).unwrap();
        assert_relative_eq!(z[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(z[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zscore_degenerate() {
        assert!(matches!(
            zscore(&[3.0, 3.0, 3.0]),
            Err(LcError::DegenerateScaling { .. })
        ));
        assert!(zscore(&[1.0]).is_err());
    }

    #[test]
    fn test_hill_binaries() {
        let ds = derive_features(&dataset()).unwrap();
        let hill = ds.continuous("hill_binary").unwrap();
        let hv = ds.continuous("hill_valley_binary").unwrap();
        assert_eq!(hill, vec![1.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(hv, vec![1.0, 1.0, 0.0, 1.0, 1.0]);

        // Codings differ only on Valley rows; Split is the only zero of hill_valley_binary
        let source = ds.categorical("hill_valley").unwrap();
        for i in 0..ds.n_rows() {
            assert_eq!(hill[i] != hv[i], source[i] == "Valley");
            assert_eq!(hv[i] == 0.0, source[i] == "Split");
        }
    }

    #[test]
    fn test_other_binaries() {
        let ds = derive_features(&dataset()).unwrap();
        assert_eq!(ds.continuous("agriculture_binary").unwrap(), vec![1.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(
            ds.continuous("political_organization_binary").unwrap(),
            vec![1.0, 0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_scaled_columns_standardized() {
        let ds = derive_features(&dataset()).unwrap();
        for (target, _) in SCALED_COLUMNS {
            let v = ds.continuous(target).unwrap();
            let n = v.len() as f64;
            let mean = v.iter().sum::<f64>() / n;
            let sd = (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
            assert_relative_eq!(mean, 0.0, epsilon = 1e-10);
            assert_relative_eq!(sd, 1.0, epsilon = 1e-10);
        }
        // Originals retained
        assert!(ds.has_column("altitude"));
        assert_eq!(ds.derived_columns().len(), derived_column_names().len());
    }

    #[test]
    fn test_rescaled_per_variant() {
        let base = dataset();
        let full = derive_features(&base).unwrap();
        let sens = base
            .exclude_languages(&["D".to_string()], Variant::Sensitivity { excluded: vec!["D".into()] })
            .unwrap();
        let sens = derive_features(&sens).unwrap();
        let v = sens.continuous("scaled_altitude").unwrap();
        assert_relative_eq!(v.iter().sum::<f64>(), 0.0, epsilon = 1e-10);
        // Row A is scaled differently once D is gone
        let a_full = full.continuous("scaled_altitude").unwrap()[0];
        assert!((a_full - v[0]).abs() > 1e-6);
    }

    #[test]
    fn test_missing_source_column() {
        let ds = Dataset::from_columns(vec!["A".into(), "B".into()], vec![]).unwrap();
        match derive_features(&ds) {
            Err(LcError::SchemaResolution { columns }) => {
                assert!(columns.contains(&"altitude".to_string()));
                assert!(columns.contains(&"hill_valley".to_string()));
            }
            other => panic!("expected SchemaResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_value_is_error() {
        let base = dataset();
        let mut alt = num(&[1200.0, 300.0, 800.0, 2500.0, 150.0]);
        alt[2] = Value::Missing;
        let ds = base.with_derived_column("altitude", alt).unwrap();
        assert!(matches!(
            derive_features(&ds),
            Err(LcError::InvalidVariableType { .. })
        ));
    }

    #[test]
    fn test_constant_column_names_source() {
        let base = dataset();
        let ds = base.with_derived_column("altitude", num(&[5.0; 5])).unwrap();
        match derive_features(&ds) {
            Err(LcError::DegenerateScaling { column }) => assert_eq!(column, "altitude"),
            other => panic!("expected DegenerateScaling, got {:?}", other),
        }
    }
}
