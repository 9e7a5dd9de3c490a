//! Weighted linear regression with absorbed fixed effects and cluster-robust
//! standard errors.
//!
//! Fixed effects are swept out of the outcome and every regressor by
//! [`FixedEffectsSolver`]; the remaining coefficients come from weighted
//! least squares on the demeaned columns (Frisch–Waugh–Lovell). Residuals of
//! the demeaned fit equal those of the full model.
//!
//! # References
//!
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 10.
//! - Liang & Zeger (1986), "Longitudinal data analysis using generalized
//!   linear models." *Biometrika*.

use std::collections::HashMap;

use fewclust_core::{Error, RegressionFit, RegressionPrimitive, RegressionProblem, Result};
use nalgebra::{DMatrix, DVector};

use super::hdfe::FixedEffectsSolver;

/// Smallest acceptable eigenvalue ratio of `X'WX` before a fit is declared singular.
const RCOND_TOL: f64 = 1e-12;

/// Reference [`RegressionPrimitive`]: weighted OLS, MAP absorption,
/// Liang–Zeger CRVE with the `G/(G−1)·(N−1)/(N−K)` correction.
///
/// Without absorb terms an intercept is absorbed instead.
#[derive(Debug, Clone, Default)]
pub struct AbsorbingOls {
    tol: Option<f64>,
}

impl AbsorbingOls {
    /// Solver with default MAP tolerance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the MAP convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = Some(tol);
        self
    }
}

impl RegressionPrimitive for AbsorbingOls {
    fn fit(&self, problem: &RegressionProblem<'_>) -> Result<RegressionFit> {
        validate(problem)?;
        let n = problem.n_obs();
        let p = problem.regressors.len();

        let groups = if problem.absorb.is_empty() {
            vec![vec![0usize; n]]
        } else {
            problem.absorb.to_vec()
        };
        let mut solver = FixedEffectsSolver::new(groups, problem.weights)?;
        if let Some(tol) = self.tol {
            solver = solver.with_tol(tol);
        }
        let df_absorbed = solver.degrees_of_freedom_absorbed();

        let y_dm = solver.partial_out(problem.outcome)?;
        let mut x_dm = DMatrix::<f64>::zeros(n, p);
        for (j, reg) in problem.regressors.iter().enumerate() {
            let col = solver.partial_out(&reg.values)?;
            // A regressor fully explained by the fixed effects cannot be identified.
            let before = weighted_ss(&reg.values, problem.weights);
            let after = weighted_ss(&col, problem.weights);
            if before <= 0.0 || after <= RCOND_TOL * before {
                let reason = format!("'{}' is collinear with the absorbed effects", reg.name);
                return Err(singular(problem.label, &reason));
            }
            x_dm.set_column(j, &DVector::from_vec(col));
        }

        let names: Vec<String> = problem.regressors.iter().map(|r| r.name.clone()).collect();
        let n_clusters = count_distinct(problem.clusters);
        let df_resid = n.saturating_sub(p + df_absorbed);

        if p == 0 {
            let fitted = problem.outcome.iter().zip(&y_dm).map(|(y, e)| y - e).collect();
            return Ok(RegressionFit {
                names,
                coefficients: Vec::new(),
                std_errors: Vec::new(),
                residuals: y_dm,
                fitted,
                n_obs: n,
                df_resid,
                n_clusters,
            });
        }

        let w = DVector::from_column_slice(problem.weights);
        let y_vec = DVector::from_vec(y_dm);
        let mut xw = x_dm.clone();
        for (i, mut row) in xw.row_iter_mut().enumerate() {
            row *= w[i];
        }
        let xtwx = xw.transpose() * &x_dm;
        let xtwy = xw.transpose() * &y_vec;

        let eig = xtwx.symmetric_eigenvalues();
        let max_eig = eig.iter().copied().fold(0.0_f64, f64::max);
        let min_eig = eig.iter().copied().fold(f64::INFINITY, f64::min);
        if max_eig.is_nan() || max_eig <= 0.0 || min_eig <= RCOND_TOL * max_eig {
            return Err(singular(problem.label, "X'WX is singular after absorbing fixed effects"));
        }
        let bread = xtwx
            .try_inverse()
            .ok_or_else(|| singular(problem.label, "X'WX is not invertible"))?;

        let beta = &bread * xtwy;
        let resid = &y_vec - &x_dm * &beta;
        let std_errors = cluster_robust_se(
            &x_dm,
            problem.weights,
            &resid,
            &bread,
            problem.clusters,
            df_absorbed,
        )?;

        let residuals: Vec<f64> = resid.iter().copied().collect();
        let fitted = problem.outcome.iter().zip(&residuals).map(|(y, e)| y - e).collect();

        Ok(RegressionFit {
            names,
            coefficients: beta.iter().copied().collect(),
            std_errors,
            residuals,
            fitted,
            n_obs: n,
            df_resid,
            n_clusters,
        })
    }

    fn name(&self) -> &str {
        "absorbing-ols"
    }
}

/// Weighted Liang–Zeger (HC0 sandwich) standard errors.
///
/// `V = (X'WX)⁻¹ [Σ_g s_g s_g'] (X'WX)⁻¹ · G/(G−1) · (N−1)/(N−K)` with
/// `s_g = Σ_{i∈g} w_i x_i e_i` and `K = p + df_absorbed`.
pub fn cluster_robust_se(
    x: &DMatrix<f64>,
    weights: &[f64],
    residuals: &DVector<f64>,
    bread: &DMatrix<f64>,
    cluster_ids: &[u64],
    df_absorbed: usize,
) -> Result<Vec<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if cluster_ids.len() != n || weights.len() != n || residuals.len() != n {
        return Err(Error::Validation("cluster_ids, weights, residuals must have length n".into()));
    }

    let mut cluster_map: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        cluster_map.entry(cid).or_default().push(i);
    }
    let g = cluster_map.len() as f64;

    let mut meat = DMatrix::zeros(p, p);
    for indices in cluster_map.values() {
        let mut s_g = DVector::<f64>::zeros(p);
        for &i in indices {
            let we = weights[i] * residuals[i];
            for j in 0..p {
                s_g[j] += x[(i, j)] * we;
            }
        }
        meat += &s_g * s_g.transpose();
    }

    let n_f = n as f64;
    let k_f = (p + df_absorbed) as f64;
    let correction =
        if g > 1.0 && n_f > k_f { (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - k_f)) } else { 1.0 };

    let vcr = (bread * &meat) * bread * correction;
    Ok((0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect())
}

fn validate(problem: &RegressionProblem<'_>) -> Result<()> {
    let n = problem.n_obs();
    if n == 0 {
        return Err(Error::Validation("outcome must be non-empty".into()));
    }
    if problem.weights.len() != n || problem.clusters.len() != n {
        return Err(Error::Validation(format!(
            "weights ({}) and clusters ({}) must have length {n}",
            problem.weights.len(),
            problem.clusters.len()
        )));
    }
    if let Some(r) = problem.regressors.iter().find(|r| r.values.len() != n) {
        return Err(Error::Validation(format!("regressor '{}' has length {}", r.name, r.values.len())));
    }
    if problem.outcome.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("outcome contains non-finite values".into()));
    }
    if problem.weights.iter().all(|&w| w <= 0.0) {
        return Err(Error::Computation("all weights are zero".into()));
    }
    Ok(())
}

fn weighted_ss(v: &[f64], w: &[f64]) -> f64 {
    v.iter().zip(w).map(|(x, wi)| wi * x * x).sum()
}

fn count_distinct(ids: &[u64]) -> usize {
    let mut v = ids.to_vec();
    v.sort_unstable();
    v.dedup();
    v.len()
}

fn singular(label: &str, reason: &str) -> Error {
    Error::RegressionSingularity { spec: label.to_string(), reason: reason.to_string() }
}
