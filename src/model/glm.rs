//! Binomial GLM with logit link.
//!
//! Fit by iteratively reweighted least squares. Standard errors come from
//! the inverse Fisher information `(X'WX)⁻¹` with `W = diag(μ(1−μ))`.

use crate::data::DesignMatrix;
use crate::error::{LcError, Result};
use crate::model::{FitConfig, FitWarning};
use nalgebra::DVector;
use std::time::Instant;
use tracing::debug;

/// Fitted probabilities closer than this to 0 or 1 count as separated.
const SEPARATION_EPS: f64 = 1e-10;

/// Floor for IRLS working weights.
const MIN_WEIGHT: f64 = 1e-12;

/// Linear predictor clamp, keeps `exp` finite.
const ETA_MAX: f64 = 30.0;

/// Raw logistic regression estimates.
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub beta: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub log_likelihood: f64,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<FitWarning>,
    /// Fitted probabilities μ.
    pub fitted: Vec<f64>,
    /// Linear predictor `Xβ`.
    pub linear_predictor: Vec<f64>,
    /// Deviance residuals.
    pub residuals: Vec<f64>,
}

fn logistic(eta: f64) -> f64 {
    let eta = eta.clamp(-ETA_MAX, ETA_MAX);
    1.0 / (1.0 + (-eta).exp())
}

fn binomial_deviance(y: &[f64], mu: &[f64]) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, &m)| unit_deviance(yi, m))
        .sum()
}

fn unit_deviance(y: f64, mu: f64) -> f64 {
    let mu = mu.clamp(SEPARATION_EPS, 1.0 - SEPARATION_EPS);
    if y > 0.5 {
        -2.0 * mu.ln()
    } else {
        -2.0 * (1.0 - mu).ln()
    }
}

/// Check a response is 0/1 and not constant.
fn check_binary(y: &[f64]) -> Result<()> {
    if let Some(v) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(LcError::DegenerateFit(format!(
            "binomial response must be 0/1, found {}",
            v
        )));
    }
    let ones = y.iter().filter(|&&v| v == 1.0).count();
    if ones == 0 || ones == y.len() {
        return Err(LcError::DegenerateFit(
            "binomial response is constant".to_string(),
        ));
    }
    Ok(())
}

/// Fit a logistic regression by IRLS.
pub fn fit_glm(y: &[f64], design: &DesignMatrix, config: &FitConfig) -> Result<GlmFit> {
    config.validate()?;
    let n = y.len();
    let p = design.n_coefficients();
    if design.n_rows() != n {
        return Err(LcError::InvalidParameter(format!(
            "Row mismatch: response {}, design {}",
            n,
            design.n_rows()
        )));
    }
    if n <= p {
        return Err(LcError::DegenerateFit(format!(
            "{} observations for {} coefficients",
            n, p
        )));
    }
    check_binary(y)?;

    let x = design.matrix();
    let y_vec = DVector::from_column_slice(y);
    let started = Instant::now();
    let budget = config.max_duration();

    // Start from μ = (y + 0.5) / 2
    let mut mu: DVector<f64> = y_vec.map(|yi| (yi + 0.5) / 2.0);
    let mut eta: DVector<f64> = mu.map(|m| (m / (1.0 - m)).ln());
    let mut beta = DVector::zeros(p);
    let mut deviance = binomial_deviance(y, mu.as_slice());

    let mut converged = false;
    let mut timed_out = false;
    let mut iterations = 0;

    for iter in 0..config.max_iter {
        if iter > 0 {
            if let Some(b) = budget {
                if started.elapsed() >= b {
                    timed_out = true;
                    break;
                }
            }
        }
        iterations = iter + 1;

        // Working weights and response
        let w: DVector<f64> = mu.map(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
        let z: DVector<f64> = DVector::from_fn(n, |i, _| eta[i] + (y_vec[i] - mu[i]) / w[i]);

        let mut xw = x.clone();
        let mut zw = z.clone();
        for i in 0..n {
            let ws = w[i].sqrt();
            for j in 0..p {
                xw[(i, j)] *= ws;
            }
            zw[i] *= ws;
        }

        let xtwx = xw.transpose() * &xw;
        let chol = xtwx.cholesky().ok_or_else(|| {
            LcError::DegenerateFit("weighted design is rank deficient".to_string())
        })?;
        beta = chol.solve(&(xw.transpose() * zw));

        eta = x * &beta;
        mu = eta.map(logistic);
        let dev_new = binomial_deviance(y, mu.as_slice());

        if (dev_new - deviance).abs() / (dev_new.abs() + 0.1) < config.tol {
            deviance = dev_new;
            converged = true;
            break;
        }
        deviance = dev_new;
    }

    let w: DVector<f64> = mu.map(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
    let mut xw = x.clone();
    for i in 0..n {
        let ws = w[i].sqrt();
        for j in 0..p {
            xw[(i, j)] *= ws;
        }
    }
    let fisher = xw.transpose() * &xw;
    let cov_beta = fisher
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| LcError::Numerical("Fisher information is singular".to_string()))?;
    let std_errors: Vec<f64> = (0..p).map(|j| cov_beta[(j, j)].max(0.0).sqrt()).collect();

    let mut warnings = Vec::new();
    if timed_out {
        warnings.push(FitWarning::TimedOut {
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    } else if !converged {
        warnings.push(FitWarning::NotConverged { iterations });
    }
    let n_boundary = mu
        .iter()
        .filter(|&&m| m < SEPARATION_EPS || m > 1.0 - SEPARATION_EPS)
        .count();
    if n_boundary > 0 {
        warnings.push(FitWarning::Separation { n_boundary });
    }

    let log_likelihood = -0.5 * deviance;
    let residuals: Vec<f64> = (0..n)
        .map(|i| {
            let d = unit_deviance(y[i], mu[i]).max(0.0).sqrt();
            if y[i] >= mu[i] {
                d
            } else {
                -d
            }
        })
        .collect();

    debug!(n, p, iterations, converged, deviance, "IRLS fit complete");

    Ok(GlmFit {
        beta: beta.iter().copied().collect(),
        std_errors,
        log_likelihood,
        deviance,
        iterations,
        converged,
        warnings,
        fitted: mu.iter().copied().collect(),
        linear_predictor: eta.iter().copied().collect(),
        residuals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn design(xs: &[f64]) -> DesignMatrix {
        let n = xs.len();
        DesignMatrix::from_matrix(
            DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { xs[i] }),
            vec!["(Intercept)".into(), "x".into()],
            (0..n).map(|i| format!("L{}", i)).collect(),
        )
    }

    #[test]
    fn test_intercept_only_matches_logit_of_mean() {
        let y = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0];
        let dm = DesignMatrix::from_matrix(
            DMatrix::from_element(8, 1, 1.0),
            vec!["(Intercept)".into()],
            (0..8).map(|i| i.to_string()).collect(),
        );
        let fit = fit_glm(&y, &dm, &FitConfig::default()).unwrap();
        assert!(fit.converged);
        // 5 of 8 ones
        assert_relative_eq!(fit.beta[0], (5.0f64 / 3.0).ln(), epsilon = 1e-8);
        // SE = 1/sqrt(n p (1-p))
        let se = 1.0 / (8.0f64 * 0.625 * 0.375).sqrt();
        assert_relative_eq!(fit.std_errors[0], se, epsilon = 1e-6);
    }

    #[test]
    fn test_positive_slope() {
        let xs = vec![-2.0, -1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.0, 2.5];
        let y = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        let fit = fit_glm(&y, &design(&xs), &FitConfig::default()).unwrap();
        assert!(fit.converged);
        assert!(fit.warnings.is_empty());
        assert!(fit.beta[1] > 0.0);
        assert!(fit.fitted.iter().all(|&m| m > 0.0 && m < 1.0));
        // Score equations: X'(y - μ) = 0
        let s0: f64 = (0..10).map(|i| y[i] - fit.fitted[i]).sum();
        let s1: f64 = (0..10).map(|i| xs[i] * (y[i] - fit.fitted[i])).sum();
        assert_relative_eq!(s0, 0.0, epsilon = 1e-6);
        assert_relative_eq!(s1, 0.0, epsilon = 1e-6);
        // Deviance is the sum of squared deviance residuals
        let d: f64 = fit.residuals.iter().map(|r| r * r).sum();
        assert_relative_eq!(d, fit.deviance, epsilon = 1e-8);
    }

    #[test]
    fn test_separation_warns() {
        let xs = vec![-3.0, -2.0, -1.0, 1.0, 2.0, 3.0];
        let y = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let fit = fit_glm(&y, &design(&xs), &FitConfig::default()).unwrap();
        let n_boundary = fit.warnings.iter().find_map(|w| match w {
            FitWarning::Separation { n_boundary } => Some(*n_boundary),
            _ => None,
        });
        assert!(matches!(n_boundary, Some(k) if k > 0), "warnings: {:?}", fit.warnings);
    }

    #[test]
    fn test_non_binary_response() {
        let r = fit_glm(&[0.0, 1.0, 2.0, 1.0], &design(&[1.0, 2.0, 3.0, 4.0]), &FitConfig::default());
        assert!(matches!(r, Err(LcError::DegenerateFit(_))));
        let r = fit_glm(&[1.0, 1.0, 1.0, 1.0], &design(&[1.0, 2.0, 3.0, 4.0]), &FitConfig::default());
        assert!(matches!(r, Err(LcError::DegenerateFit(_))));
    }
}
