//! Synthetic control with uniform donor and time weights.
//!
//! With every never-treated donor weighted equally and every pre-period
//! weighted equally, the synthetic DID estimate of one treated unit reduces
//! to a difference-in-differences of the per-period gap
//! `y_u,t − mean_donors y_t`:
//!
//! `ATT_u = mean_{t ≥ onset}(gap_t) − mean_{t < onset}(gap_t)`.
//!
//! Covariates, when given, are projected out first with a two-way fixed
//! effects regression estimated on untreated cells only.
//!
//! # References
//!
//! - Arkhangelsky et al. (2021), "Synthetic Difference-in-Differences."
//!   *American Economic Review*.

use std::collections::{BTreeMap, HashSet};

use fewclust_core::{
    Error, Factor, Panel, RegressionPrimitive, RegressionProblem, Regressor, Result,
    SyntheticControlPrimitive, SyntheticControlProblem,
};

use super::absorbing::AbsorbingOls;
use crate::design::absorb_levels;

/// Reference [`SyntheticControlPrimitive`]; performs no weight optimization.
#[derive(Debug, Clone, Default)]
pub struct UniformWeightsControl {
    ols: AbsorbingOls,
}

impl UniformWeightsControl {
    /// New instance.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyntheticControlPrimitive for UniformWeightsControl {
    fn att(&self, problem: &SyntheticControlProblem<'_>) -> Result<f64> {
        let panel = problem.panel;
        let u = problem.treated_unit;
        check_unique_cells(panel)?;

        let onset = panel
            .unit_assignment()
            .onset(u)
            .ok_or_else(|| Error::Computation(format!("unit {u} is never treated")))?;

        let y = panel.numeric(problem.outcome)?;
        let y = if problem.covariates.is_empty() {
            y.to_vec()
        } else {
            self.adjust_for_covariates(panel, y, u, onset, problem.covariates)?
        };

        let mut treated_y: BTreeMap<i64, f64> = BTreeMap::new();
        let mut donor_sum: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for i in 0..panel.len() {
            let t = panel.times()[i];
            if panel.units()[i] == u {
                treated_y.insert(t, y[i]);
            } else {
                let e = donor_sum.entry(t).or_insert((0.0, 0));
                e.0 += y[i];
                e.1 += 1;
            }
        }
        if donor_sum.is_empty() {
            return Err(Error::Computation(format!("no donor units for unit {u}")));
        }

        let (mut pre, mut n_pre, mut post, mut n_post) = (0.0, 0usize, 0.0, 0usize);
        for (t, yu) in &treated_y {
            let Some(&(s, n)) = donor_sum.get(t) else { continue };
            let gap = yu - s / n as f64;
            if *t >= onset {
                post += gap;
                n_post += 1;
            } else {
                pre += gap;
                n_pre += 1;
            }
        }
        if n_pre == 0 || n_post == 0 {
            return Err(Error::Computation(format!(
                "unit {u} needs pre and post periods with donors ({n_pre} pre, {n_post} post)"
            )));
        }
        Ok(post / n_post as f64 - pre / n_pre as f64)
    }

    fn name(&self) -> &str {
        "uniform-weights"
    }
}

impl UniformWeightsControl {
    /// `y − Xγ` with γ from a unit + time FE regression over donor rows and
    /// the treated unit's pre-period rows.
    fn adjust_for_covariates(
        &self,
        panel: &Panel,
        y: &[f64],
        u: u64,
        onset: i64,
        covariates: &[String],
    ) -> Result<Vec<f64>> {
        let rows: Vec<usize> = (0..panel.len())
            .filter(|&i| panel.units()[i] != u || panel.times()[i] < onset)
            .collect();
        let fit_panel = panel.select_rows(&rows);
        let fit_y: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
        let regressors = covariates
            .iter()
            .map(|c| Ok(Regressor::new(c.clone(), fit_panel.numeric(c)?.to_vec())))
            .collect::<Result<Vec<_>>>()?;
        let absorb = vec![
            absorb_levels(&fit_panel, &[Factor::Unit])?,
            absorb_levels(&fit_panel, &[Factor::Time])?,
        ];
        let weights = vec![1.0; rows.len()];
        let fit = self.ols.fit(&RegressionProblem {
            label: "covariate-projection",
            outcome: &fit_y,
            regressors: &regressors,
            absorb: &absorb,
            weights: &weights,
            clusters: fit_panel.units(),
        })?;

        let mut adjusted = y.to_vec();
        for (name, gamma) in covariates.iter().zip(&fit.coefficients) {
            let x = panel.numeric(name)?;
            for (a, xi) in adjusted.iter_mut().zip(x) {
                *a -= gamma * xi;
            }
        }
        Ok(adjusted)
    }
}

fn check_unique_cells(panel: &Panel) -> Result<()> {
    let mut seen = HashSet::with_capacity(panel.len());
    for (&u, &t) in panel.units().iter().zip(panel.times()) {
        if !seen.insert((u, t)) {
            return Err(Error::Validation(format!("unit {u} has more than one row in period {t}")));
        }
    }
    Ok(())
}
