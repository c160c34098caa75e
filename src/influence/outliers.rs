//! The `4/n` influential-observation rule.

use crate::influence::{InfluenceRow, InfluenceTable};

/// Cook's distance cutoff for a fit on `n` observations.
///
/// Always derived from the fit's own `n`, so a sensitivity variant with one
/// fewer row gets a slightly higher cutoff than the full variant.
pub fn outlier_threshold(n: usize) -> f64 {
    if n == 0 {
        return f64::INFINITY;
    }
    4.0 / n as f64
}

/// Rows whose score exceeds the table's threshold, most influential first.
///
/// NaN scores (failed deletions) are never flagged.
pub fn flag_outliers(table: &InfluenceTable) -> Vec<&InfluenceRow> {
    let mut flagged: Vec<&InfluenceRow> = table
        .rows
        .iter()
        .filter(|r| r.cooks_distance > table.threshold)
        .collect();
    flagged.sort_by(|a, b| {
        b.cooks_distance
            .partial_cmp(&a.cooks_distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.language.cmp(&b.language))
    });
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variant;
    use crate::influence::InfluenceMethod;
    use approx::assert_relative_eq;

    fn table(scores: &[f64]) -> InfluenceTable {
        InfluenceTable::new(
            "m",
            Variant::Full,
            InfluenceMethod::FixedVariance,
            scores
                .iter()
                .enumerate()
                .map(|(i, &s)| (format!("L{:02}", i), s))
                .collect(),
        )
    }

    #[test]
    fn test_threshold_tracks_n() {
        assert_relative_eq!(outlier_threshold(50), 0.08);
        assert_relative_eq!(outlier_threshold(49), 4.0 / 49.0);
        assert!(outlier_threshold(49) > 0.0816 && outlier_threshold(49) < 0.0817);
    }

    #[test]
    fn test_threshold_recomputed_per_table() {
        // 0.081 is flagged at n = 50 but not at n = 49
        let mut scores = vec![0.01; 50];
        scores[7] = 0.081;
        let full = table(&scores);
        assert_relative_eq!(full.threshold, 0.08);
        assert_eq!(flag_outliers(&full).len(), 1);

        scores.pop();
        let smaller = table(&scores);
        assert_relative_eq!(smaller.threshold, 4.0 / 49.0);
        assert!(flag_outliers(&smaller).is_empty());
    }

    #[test]
    fn test_flag_order_and_nan() {
        // n = 5, threshold 0.8
        let t = table(&[0.9, f64::NAN, 0.5, 0.01, 2.0]);
        let flagged: Vec<&str> = flag_outliers(&t).iter().map(|r| r.language.as_str()).collect();
        assert_eq!(flagged, vec!["L04", "L00"]);
        assert!(!t.rows[1].flagged);
    }
}
