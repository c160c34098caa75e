//! Linear mixed model with a single random intercept.
//!
//! `y = Xβ + Zu + ε` where `u ~ N(0, τ²I)` and `ε ~ N(0, σ²I)`.
//!
//! Estimation is REML with σ² profiled out. Writing `V = σ²H` with
//! `H = I + θ²ZZ'` and `θ = τ/σ`, the restricted log-likelihood depends on θ
//! alone:
//!
//! `ℓ_R(θ) = -½ [ log|H| + log|X'H⁻¹X| + (n−p)(1 + log(2π σ̂²(θ))) ]`
//!
//! with `σ̂²(θ) = r'H⁻¹r / (n−p)`. θ is found by a log-spaced grid scan over
//! `[0, theta_upper]` followed by golden-section refinement around the best
//! grid point.

use crate::data::{DesignMatrix, RandomDesignMatrix};
use crate::error::{LcError, Result};
use crate::model::{FitConfig, FitWarning};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use std::time::Instant;
use tracing::debug;

/// Number of log-spaced grid points (θ = 0 is evaluated in addition).
const GRID_POINTS: usize = 25;

/// Smallest positive θ on the grid.
const GRID_LOWER: f64 = 1e-3;

/// Raw LMM estimates, before packaging into a fitted model.
#[derive(Debug, Clone)]
pub struct LmmFit {
    /// Fixed-effect estimates.
    pub beta: Vec<f64>,
    /// Standard errors from `σ²(X'H⁻¹X)⁻¹`.
    pub std_errors: Vec<f64>,
    /// Residual degrees of freedom, `n − p`.
    pub df_residual: f64,
    /// Estimated ratio τ/σ.
    pub theta: f64,
    /// Random-intercept variance.
    pub tau2: f64,
    /// Residual variance.
    pub sigma2: f64,
    /// BLUPs in the order of `RandomDesignMatrix::group_ids`.
    pub random_effects: Vec<f64>,
    /// Maximized REML log-likelihood.
    pub log_reml: f64,
    /// Objective evaluations used.
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<FitWarning>,
    /// `Xβ + Zu`.
    pub fitted: Vec<f64>,
    /// `y − Xβ − Zu`.
    pub residuals: Vec<f64>,
    /// `Xβ` alone, used for the marginal R².
    pub fixed_predictor: Vec<f64>,
}

/// Generalized least squares quantities at a fixed θ.
pub(crate) struct GlsState {
    pub beta: DVector<f64>,
    /// `X'H⁻¹X`.
    pub xthx: DMatrix<f64>,
    pub xthx_inv: DMatrix<f64>,
    pub h_chol: Cholesky<f64, Dyn>,
    /// Marginal residuals `y − Xβ`.
    pub residuals: DVector<f64>,
    /// `r'H⁻¹r`.
    pub quad: f64,
    pub log_det_h: f64,
    pub log_det_xthx: f64,
}

impl GlsState {
    /// Profiled residual variance.
    pub fn sigma2(&self, df: usize) -> f64 {
        self.quad / df as f64
    }

    /// Profiled REML log-likelihood.
    pub fn reml(&self, df: usize) -> f64 {
        let sigma2 = self.sigma2(df);
        -0.5 * (self.log_det_h
            + self.log_det_xthx
            + df as f64 * (1.0 + (2.0 * std::f64::consts::PI * sigma2).ln()))
    }
}

/// Solve the GLS problem for `H = I + θ²ZZ'`.
pub(crate) fn gls(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    zzt: &DMatrix<f64>,
    theta: f64,
) -> Result<GlsState> {
    let n = y.len();
    let mut h = zzt * (theta * theta);
    for i in 0..n {
        h[(i, i)] += 1.0;
    }
    let h_chol = h.cholesky().ok_or_else(|| {
        LcError::Numerical(format!("marginal covariance not positive definite at θ = {}", theta))
    })?;

    let hinv_x = h_chol.solve(x);
    let hinv_y = h_chol.solve(y);
    let xthx = x.transpose() * &hinv_x;
    let xthx_chol = xthx.clone().cholesky().ok_or_else(|| {
        LcError::DegenerateFit("fixed-effects design is rank deficient".to_string())
    })?;
    let beta = xthx_chol.solve(&(x.transpose() * hinv_y));
    let xthx_inv = xthx_chol.inverse();

    let residuals = y - x * &beta;
    let quad = residuals.dot(&h_chol.solve(&residuals));
    let log_det_h = 2.0 * h_chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let log_det_xthx = 2.0 * xthx_chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();

    Ok(GlsState {
        beta,
        xthx,
        xthx_inv,
        h_chol,
        residuals,
        quad,
        log_det_h,
        log_det_xthx,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stop {
    Iterations,
    Time,
}

/// Bookkeeping for the one-dimensional REML search.
struct ThetaSearch<'a> {
    y: &'a DVector<f64>,
    x: &'a DMatrix<f64>,
    zzt: &'a DMatrix<f64>,
    df: usize,
    evals: usize,
    max_iter: usize,
    started: Instant,
    budget: Option<std::time::Duration>,
    stop: Option<Stop>,
    best: Option<(f64, f64)>,
}

impl<'a> ThetaSearch<'a> {
    /// Evaluate ℓ_R(θ). Returns `None` once a limit is hit; the first
    /// evaluation always runs.
    fn eval(&mut self, theta: f64) -> Result<Option<f64>> {
        if self.stop.is_some() {
            return Ok(None);
        }
        if self.evals > 0 {
            if self.evals >= self.max_iter {
                self.stop = Some(Stop::Iterations);
                return Ok(None);
            }
            if let Some(budget) = self.budget {
                if self.started.elapsed() >= budget {
                    self.stop = Some(Stop::Time);
                    return Ok(None);
                }
            }
        }
        self.evals += 1;

        let value = gls(self.y, self.x, self.zzt, theta)?.reml(self.df);
        if !value.is_finite() {
            return Err(LcError::Numerical(format!(
                "REML objective is not finite at θ = {}",
                theta
            )));
        }
        match self.best {
            Some((_, b)) if b >= value => {}
            _ => self.best = Some((theta, value)),
        }
        Ok(Some(value))
    }
}

/// Fit an LMM by profiled REML.
pub fn fit_lmm(
    y: &[f64],
    design: &DesignMatrix,
    random: &RandomDesignMatrix,
    config: &FitConfig,
) -> Result<LmmFit> {
    config.validate()?;
    let n = y.len();
    let p = design.n_coefficients();

    if design.n_rows() != n || random.n_rows() != n {
        return Err(LcError::InvalidParameter(format!(
            "Row mismatch: response {}, design {}, grouping {}",
            n,
            design.n_rows(),
            random.n_rows()
        )));
    }
    if random.n_replicated_groups() < 2 {
        return Err(LcError::DegenerateFit(format!(
            "random intercept needs at least 2 groups with 2+ observations, found {} of {} groups",
            random.n_replicated_groups(),
            random.n_groups
        )));
    }
    if n <= p {
        return Err(LcError::DegenerateFit(format!(
            "{} observations for {} fixed effects",
            n, p
        )));
    }
    let mean = y.iter().sum::<f64>() / n as f64;
    if y.iter().all(|v| (v - mean).abs() <= f64::EPSILON * mean.abs().max(1.0)) {
        return Err(LcError::DegenerateFit("response has zero variance".to_string()));
    }

    let x = design.matrix();
    let z = random.matrix();
    let y_vec = DVector::from_column_slice(y);
    let zzt = z * z.transpose();
    let df = n - p;

    let mut search = ThetaSearch {
        y: &y_vec,
        x,
        zzt: &zzt,
        df,
        evals: 0,
        max_iter: config.max_iter,
        started: Instant::now(),
        budget: config.max_duration(),
        stop: None,
        best: None,
    };

    // Grid scan: θ = 0 plus log-spaced points up to theta_upper.
    let lower = GRID_LOWER.min(config.theta_upper / 10.0);
    let ratio = (config.theta_upper / lower).ln();
    let mut grid = vec![0.0];
    grid.extend((0..GRID_POINTS).map(|k| {
        lower * (ratio * k as f64 / (GRID_POINTS - 1) as f64).exp()
    }));
    let mut values = Vec::with_capacity(grid.len());
    for &t in &grid {
        match search.eval(t)? {
            Some(v) => values.push(v),
            None => break,
        }
    }

    // Golden-section refinement around the best grid point.
    let mut bracket_converged = false;
    if values.len() == grid.len() {
        let best_idx = values
            .iter()
            .enumerate()
            .fold(0, |bi, (i, v)| if *v > values[bi] { i } else { bi });
        let mut a = grid[best_idx.saturating_sub(1)];
        let mut b = grid[(best_idx + 1).min(grid.len() - 1)];
        let gr = (5f64.sqrt() - 1.0) / 2.0;
        let width_tol = |mid: f64| config.tol.sqrt() * (1.0 + mid);

        let mut c = b - gr * (b - a);
        let mut d = a + gr * (b - a);
        let mut fc = search.eval(c)?;
        let mut fd = search.eval(d)?;
        loop {
            if (b - a) <= width_tol((a + b) / 2.0) {
                bracket_converged = true;
                break;
            }
            let (Some(vc), Some(vd)) = (fc, fd) else { break };
            if vc > vd {
                b = d;
                d = c;
                fd = fc;
                c = b - gr * (b - a);
                fc = search.eval(c)?;
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + gr * (b - a);
                fd = search.eval(d)?;
            }
        }
    }

    let (mut theta, _) = search
        .best
        .ok_or_else(|| LcError::Numerical("REML search evaluated no points".to_string()))?;
    let iterations = search.evals;

    let mut warnings = Vec::new();
    let converged = bracket_converged && search.stop.is_none();
    match search.stop {
        Some(Stop::Time) => warnings.push(FitWarning::TimedOut {
            elapsed_ms: search.started.elapsed().as_millis() as u64,
        }),
        Some(Stop::Iterations) => warnings.push(FitWarning::NotConverged { iterations }),
        None if !converged => warnings.push(FitWarning::NotConverged { iterations }),
        None => {}
    }

    if theta < config.singular_tol {
        theta = 0.0;
    }

    let state = gls(&y_vec, x, &zzt, theta)?;
    let sigma2 = state.sigma2(df);
    let tau2 = theta * theta * sigma2;
    if theta == 0.0 {
        warnings.push(FitWarning::SingularRandomEffect { tau2 });
    }

    let cov_beta = &state.xthx_inv * sigma2;
    let std_errors: Vec<f64> = (0..p).map(|j| cov_beta[(j, j)].max(0.0).sqrt()).collect();

    // BLUPs: u = τ² Z'V⁻¹r = θ² Z'H⁻¹r
    let hinv_r = state.h_chol.solve(&state.residuals);
    let u = (z.transpose() * &hinv_r) * (theta * theta);

    let fixed_predictor = x * &state.beta;
    let fitted = &fixed_predictor + z * &u;
    let residuals = &y_vec - &fitted;

    debug!(
        n,
        p,
        theta,
        tau2,
        sigma2,
        iterations,
        converged,
        "REML fit complete"
    );

    Ok(LmmFit {
        beta: state.beta.iter().copied().collect(),
        std_errors,
        df_residual: df as f64,
        theta,
        tau2,
        sigma2,
        random_effects: u.iter().copied().collect(),
        log_reml: state.reml(df),
        iterations,
        converged,
        warnings,
        fitted: fitted.iter().copied().collect(),
        residuals: residuals.iter().copied().collect(),
        fixed_predictor: fixed_predictor.iter().copied().collect(),
    })
}
