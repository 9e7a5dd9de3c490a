//! Core traits for fewclust
//!
//! The estimation engines never fit models themselves: they post-process
//! what a regression primitive and a synthetic-control primitive return.
//! Both are traits so the engines do not depend on a concrete solver.

use serde::Serialize;

use crate::Result;
use crate::panel::Panel;

/// A named regressor column.
#[derive(Debug, Clone, PartialEq)]
pub struct Regressor {
    /// Coefficient name.
    pub name: String,
    /// One value per observation.
    pub values: Vec<f64>,
}

impl Regressor {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self { name: name.into(), values }
    }
}

/// Everything a linear absorbing regression needs, by reference.
#[derive(Debug, Clone, Copy)]
pub struct RegressionProblem<'a> {
    /// Specification label (for error reporting).
    pub label: &'a str,
    /// Dependent variable.
    pub outcome: &'a [f64],
    /// Explicit regressors (no intercept; it is absorbed or added by the solver).
    pub regressors: &'a [Regressor],
    /// Absorbed fixed effects: per dimension, a 0-based level per observation.
    pub absorb: &'a [Vec<usize>],
    /// Analysis weights.
    pub weights: &'a [f64],
    /// Cluster id per observation for the robust variance.
    pub clusters: &'a [u64],
}

impl RegressionProblem<'_> {
    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.outcome.len()
    }
}

/// Output of a regression fit.
#[derive(Debug, Clone, Serialize)]
pub struct RegressionFit {
    /// Regressor names, aligned with `coefficients`.
    pub names: Vec<String>,
    /// Point estimates.
    pub coefficients: Vec<f64>,
    /// Cluster-robust standard errors.
    pub std_errors: Vec<f64>,
    /// Observation-level residuals of the full (FE-inclusive) model.
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// Observation-level fitted values (`outcome − residuals`).
    #[serde(skip)]
    pub fitted: Vec<f64>,
    /// Number of observations used.
    pub n_obs: usize,
    /// Residual degrees of freedom.
    pub df_resid: usize,
    /// Number of clusters in the robust variance.
    pub n_clusters: usize,
}

impl RegressionFit {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Coefficient on `name`.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|j| self.coefficients[j])
    }

    /// Standard error of `name`.
    pub fn std_error(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|j| self.std_errors[j])
    }

    /// t-statistic of `name`; `None` when the SE is zero or not finite.
    pub fn t_stat(&self, name: &str) -> Option<f64> {
        let j = self.index_of(name)?;
        let se = self.std_errors[j];
        if se.is_finite() && se > 0.0 { Some(self.coefficients[j] / se) } else { None }
    }
}

/// Linear model with absorbed fixed effects, weights and cluster-robust variance.
pub trait RegressionPrimitive: Send + Sync {
    /// Fit the problem. Singular designs return
    /// [`Error::RegressionSingularity`](crate::Error::RegressionSingularity).
    fn fit(&self, problem: &RegressionProblem<'_>) -> Result<RegressionFit>;

    /// Solver name (e.g. "absorbing-ols").
    fn name(&self) -> &str;
}

/// One synthetic-control fit: a single treated unit against never-treated donors.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticControlProblem<'a> {
    /// Panel restricted to the treated unit and never-treated units.
    pub panel: &'a Panel,
    /// Outcome column name.
    pub outcome: &'a str,
    /// The treated unit.
    pub treated_unit: u64,
    /// Covariate columns to adjust for (empty for none).
    pub covariates: &'a [String],
}

/// Synthetic control returning the ATT of one treated unit.
pub trait SyntheticControlPrimitive: Send + Sync {
    /// Average treatment effect on the treated unit.
    fn att(&self, problem: &SyntheticControlProblem<'_>) -> Result<f64>;

    /// Method name (e.g. "uniform-weights").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_lookup_and_t_stat() {
        let fit = RegressionFit {
            names: vec!["treat".into(), "x".into()],
            coefficients: vec![2.0, 1.0],
            std_errors: vec![0.5, 0.0],
            residuals: vec![],
            fitted: vec![],
            n_obs: 10,
            df_resid: 8,
            n_clusters: 5,
        };
        assert_eq!(fit.coefficient("treat"), Some(2.0));
        assert_eq!(fit.t_stat("treat"), Some(4.0));
        assert_eq!(fit.t_stat("x"), None);
        assert_eq!(fit.coefficient("missing"), None);
    }
}
