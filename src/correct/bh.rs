//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Test labels in original order.
    pub labels: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (q-values). NaN where the input p-value was NaN.
    pub q_values: Vec<f64>,
    /// Number of tests with a usable p-value.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get the q-value for a label.
    pub fn get_qvalue(&self, label: &str) -> Option<f64> {
        let idx = self.labels.iter().position(|l| l == label)?;
        self.q_values.get(idx).copied()
    }

    /// Count results with q below `alpha`.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// `q[i] = min over ranks ≥ i of p * m / rank`, capped at 1, where `m`
/// counts only the finite p-values. NaN inputs are carried through as NaN.
pub fn correct_bh(p_values: &[f64], labels: &[String]) -> BhCorrected {
    let n = p_values.len();
    let mut q_values = vec![f64::NAN; n];

    let mut indices: Vec<usize> = (0..n).filter(|&i| !p_values[i].is_nan()).collect();
    let m = indices.len();
    if m > 0 {
        indices.sort_by(|&a, &b| {
            p_values[a]
                .partial_cmp(&p_values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut running = 1.0f64;
        for rank in (1..=m).rev() {
            let idx = indices[rank - 1];
            let adjusted = p_values[idx] * m as f64 / rank as f64;
            running = running.min(adjusted).min(1.0);
            q_values[idx] = running;
        }
    }

    BhCorrected {
        labels: labels.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("model_{}", i)).collect()
    }

    #[test]
    fn test_bh_known_values() {
        let p_values = vec![0.005, 0.01, 0.02, 0.04, 0.1];
        let corrected = correct_bh(&p_values, &labels(5));

        // Rank 1: 0.005 * 5/1 = 0.025
        // Rank 2: 0.01 * 5/2 = 0.025
        // Rank 3: 0.02 * 5/3 = 0.0333
        // Rank 4: 0.04 * 5/4 = 0.05
        // Rank 5: 0.1
        assert_relative_eq!(corrected.q_values[0], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[1], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[2], 1.0 / 30.0, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[3], 0.05, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[4], 0.1, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_unsorted_input() {
        let p_values = vec![0.04, 0.01, 0.03, 0.005];
        let corrected = correct_bh(&p_values, &labels(4));
        assert_relative_eq!(corrected.q_values[3], 0.02, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[1], 0.02, epsilon = 1e-10);
        assert_relative_eq!(corrected.get_qvalue("model_0").unwrap(), 0.04, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_nan_passthrough() {
        let p_values = vec![0.01, f64::NAN, 0.04];
        let corrected = correct_bh(&p_values, &labels(3));
        assert_eq!(corrected.n_tests, 2);
        assert!(corrected.q_values[1].is_nan());
        assert_relative_eq!(corrected.q_values[0], 0.02, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[2], 0.04, epsilon = 1e-10);
        assert_eq!(corrected.n_significant(0.05), 2);
    }

    #[test]
    fn test_bh_bounded_and_empty() {
        let corrected = correct_bh(&[0.5, 0.9, 0.99], &labels(3));
        assert!(corrected.q_values.iter().all(|q| *q <= 1.0));
        let empty = correct_bh(&[], &[]);
        assert_eq!(empty.n_tests, 0);
        assert!(empty.q_values.is_empty());
    }
}
