//! Shapiro–Wilk normality test.
//!
//! Coefficients and p-values follow Royston (1995), Algorithm AS R94,
//! valid for 3 ≤ n ≤ 5000.

use crate::error::{LcError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

/// Smallest sample the test accepts.
pub const SW_MIN_N: usize = 3;

/// Largest sample the approximation covers.
pub const SW_MAX_N: usize = 5000;

// Polynomial coefficients, lowest power first.
const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const G: [f64; 2] = [-2.273, 0.459];

/// Result of a Shapiro–Wilk test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapiroWilk {
    pub w: f64,
    pub p_value: f64,
    pub n: usize,
}

impl ShapiroWilk {
    /// Normality rejected at level `alpha`.
    pub fn rejects(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

fn poly(c: &[f64], x: f64) -> f64 {
    c.iter().rev().fold(0.0, |acc, &ci| acc * x + ci)
}

/// Upper-half coefficients `a_n, a_{n-1}, …` for a sample of size `n`.
fn coefficients(n: usize, normal: &Normal) -> Vec<f64> {
    let half = n / 2;
    if n == 3 {
        return vec![0.5f64.sqrt()];
    }
    let nf = n as f64;
    let m: Vec<f64> = (1..=half)
        .map(|i| normal.inverse_cdf((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    // Σ m² over the whole sample; the order statistics are symmetric
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / nf.sqrt();

    let mut a = vec![0.0; half];
    a[0] = poly(&C1, rsn) - m[0] / ssumm2;
    let (start, fac) = if n > 5 {
        a[1] = poly(&C2, rsn) - m[1] / ssumm2;
        let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
            / (1.0 - 2.0 * a[0] * a[0] - 2.0 * a[1] * a[1]))
            .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a[0] * a[0])).sqrt();
        (1, fac)
    };
    for i in start..half {
        a[i] = -m[i] / fac;
    }
    a
}

/// Shapiro–Wilk W statistic and p-value.
///
/// NaN values are rejected; a sample with zero range is an error.
pub fn shapiro_wilk(values: &[f64]) -> Result<ShapiroWilk> {
    let n = values.len();
    if !(SW_MIN_N..=SW_MAX_N).contains(&n) {
        return Err(LcError::InvalidParameter(format!(
            "Shapiro-Wilk needs {} to {} values, got {}",
            SW_MIN_N, SW_MAX_N, n
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(LcError::InvalidParameter(
            "Shapiro-Wilk input contains non-finite values".to_string(),
        ));
    }

    let mut x = values.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));
    if x[n - 1] - x[0] < 1e-19 * x[0].abs().max(1.0) {
        return Err(LcError::InvalidParameter(
            "Shapiro-Wilk input has zero range".to_string(),
        ));
    }

    let normal = Normal::new(0.0, 1.0).map_err(|e| LcError::Numerical(e.to_string()))?;
    let a = coefficients(n, &normal);

    let mean = x.iter().sum::<f64>() / n as f64;
    let ss: f64 = x.iter().map(|v| (v - mean).powi(2)).sum();
    let num: f64 = a
        .iter()
        .enumerate()
        .map(|(i, ai)| ai * (x[n - 1 - i] - x[i]))
        .sum();
    let w = (num * num / ss).min(1.0);

    let p_value = if n == 3 {
        (6.0 / PI * (w.sqrt().asin() - 0.75f64.sqrt().asin())).max(0.0)
    } else {
        let nf = n as f64;
        let w1 = (1.0 - w).ln();
        let (y, m, s) = if n <= 11 {
            let gamma = poly(&G, nf);
            if w1 >= gamma {
                return Ok(ShapiroWilk { w, p_value: 1e-99, n });
            }
            (-(gamma - w1).ln(), poly(&C3, nf), poly(&C4, nf).exp())
        } else {
            let ln_n = nf.ln();
            (w1, poly(&C5, ln_n), poly(&C6, ln_n).exp())
        };
        1.0 - normal.cdf((y - m) / s)
    };

    Ok(ShapiroWilk {
        w,
        p_value: p_value.clamp(0.0, 1.0),
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_grid() {
        // R: shapiro.test(1:10)
        let x: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let sw = shapiro_wilk(&x).unwrap();
        assert_relative_eq!(sw.w, 0.97016, epsilon = 1e-5);
        assert_relative_eq!(sw.p_value, 0.8924, epsilon = 1e-3);
        assert!(!sw.rejects(0.05));
    }

    #[test]
    fn test_three_values_exact() {
        let sw = shapiro_wilk(&[1.0, 2.0, 4.0]).unwrap();
        assert_relative_eq!(sw.w, 0.964286, epsilon = 1e-5);
        assert_relative_eq!(sw.p_value, 0.6369, epsilon = 1e-3);
    }

    #[test]
    fn test_large_sample_branch() {
        let x = [
            2.1, 3.4, 1.9, 5.6, 4.4, 3.3, 2.8, 3.9, 4.1, 3.0, 2.5, 3.7, 6.2, 1.2,
        ];
        let sw = shapiro_wilk(&x).unwrap();
        assert_relative_eq!(sw.w, 0.974285, epsilon = 1e-4);
        assert_relative_eq!(sw.p_value, 0.9281, epsilon = 1e-3);
    }

    #[test]
    fn test_outlier_rejects() {
        let mut x = vec![1.0; 13];
        x.push(50.0);
        let sw = shapiro_wilk(&x).unwrap();
        assert!(sw.w < 0.35);
        assert!(sw.rejects(0.001));

        let skewed: Vec<f64> = (1..=30).map(|i| 0.1 * (i as f64).powi(3)).collect();
        let sw = shapiro_wilk(&skewed).unwrap();
        assert_relative_eq!(sw.w, 0.83164, epsilon = 1e-4);
        assert!(sw.p_value < 0.001);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(shapiro_wilk(&[1.0, 2.0]).is_err());
        assert!(shapiro_wilk(&[3.0, 3.0, 3.0, 3.0]).is_err());
        assert!(shapiro_wilk(&[1.0, f64::NAN, 2.0]).is_err());
    }
}
