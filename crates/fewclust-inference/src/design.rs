//! Regression designs built from a [`Panel`] and a typed [`ModelSpec`].
//!
//! A [`Design`] is assembled once per (panel, outcome, specification) and
//! then reused by every draw: engines swap in a new outcome vector or a new
//! treatment column without rebuilding the absorbed levels or controls.

use std::collections::HashMap;

use fewclust_core::{
    ControlTerm, Error, Factor, ModelSpec, Panel, RegressionFit, RegressionPrimitive,
    RegressionProblem, Regressor, Result,
};

/// Coefficient name of the treatment regressor.
pub const TREATMENT: &str = "treatment";

/// Owned regression inputs for one (outcome, specification) pair.
#[derive(Debug, Clone)]
pub struct Design {
    label: String,
    outcome: Vec<f64>,
    treatment: Option<Vec<f64>>,
    controls: Vec<Regressor>,
    absorb: Vec<Vec<usize>>,
    weights: Vec<f64>,
    clusters: Vec<u64>,
    regressors: Vec<Regressor>,
}

impl Design {
    /// Build the design for `outcome` on `panel`.
    ///
    /// `treatment` names a numeric column; `None` uses the panel's treatment
    /// role column.
    pub fn build(
        panel: &Panel,
        outcome: &str,
        treatment: Option<&str>,
        spec: &ModelSpec,
    ) -> Result<Self> {
        let y = panel.numeric(outcome)?.to_vec();
        let d = match treatment {
            Some(col) => panel.numeric(col)?.to_vec(),
            None => panel.treated().iter().map(|&t| f64::from(t)).collect(),
        };

        let mut controls = Vec::new();
        for term in spec.control_terms() {
            let values = panel.numeric(term.column())?;
            let values = match &term {
                ControlTerm::Covariate(_) => values.to_vec(),
                ControlTerm::ByGroup(_) => {
                    values.iter().zip(panel.groups()).map(|(v, &g)| v * f64::from(g)).collect()
                }
            };
            controls.push(Regressor::new(term.label(), values));
        }

        let absorb = spec
            .absorb
            .iter()
            .map(|term| absorb_levels(panel, term.factors()))
            .collect::<Result<Vec<_>>>()?;

        let mut design = Self {
            label: spec.label.clone(),
            outcome: y,
            treatment: Some(d),
            controls,
            absorb,
            weights: panel.weights().to_vec(),
            clusters: panel.clusters().to_vec(),
            regressors: Vec::new(),
        };
        design.refresh_regressors();
        Ok(design)
    }

    /// Same design without the treatment regressor (the null-imposed model).
    pub fn without_treatment(&self) -> Self {
        let mut out = self.clone();
        out.treatment = None;
        out.refresh_regressors();
        out
    }

    /// Same design with a different treatment column.
    pub fn with_treatment(&self, values: Vec<f64>) -> Result<Self> {
        self.check_len("treatment", values.len())?;
        let mut out = self.clone();
        out.treatment = Some(values);
        out.refresh_regressors();
        Ok(out)
    }

    /// Specification label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Dependent variable.
    pub fn outcome(&self) -> &[f64] {
        &self.outcome
    }

    /// Treatment column, if present.
    pub fn treatment(&self) -> Option<&[f64]> {
        self.treatment.as_deref()
    }

    /// Analysis weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Cluster id per observation.
    pub fn clusters(&self) -> &[u64] {
        &self.clusters
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.outcome.len()
    }

    /// Regressors in fit order (treatment first, then controls).
    pub fn regressors(&self) -> &[Regressor] {
        &self.regressors
    }

    /// Problem with the design's own outcome.
    pub fn problem(&self) -> RegressionProblem<'_> {
        self.problem_with(&self.outcome)
    }

    /// Problem with a substituted outcome (e.g. a wild-bootstrap `y*`).
    pub fn problem_with<'a>(&'a self, outcome: &'a [f64]) -> RegressionProblem<'a> {
        RegressionProblem {
            label: &self.label,
            outcome,
            regressors: &self.regressors,
            absorb: &self.absorb,
            weights: &self.weights,
            clusters: &self.clusters,
        }
    }

    /// Fit with the design's own outcome.
    pub fn fit(&self, primitive: &dyn RegressionPrimitive) -> Result<RegressionFit> {
        self.fit_with(primitive, &self.outcome)
    }

    /// Fit with a substituted outcome; singularities carry this design's label.
    pub fn fit_with(
        &self,
        primitive: &dyn RegressionPrimitive,
        outcome: &[f64],
    ) -> Result<RegressionFit> {
        self.check_len("outcome", outcome.len())?;
        primitive.fit(&self.problem_with(outcome)).map_err(|e| e.with_spec(&self.label))
    }

    fn refresh_regressors(&mut self) {
        let mut regs = Vec::with_capacity(self.controls.len() + 1);
        if let Some(d) = &self.treatment {
            regs.push(Regressor::new(TREATMENT, d.clone()));
        }
        regs.extend(self.controls.iter().cloned());
        self.regressors = regs;
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.n_obs() {
            return Err(Error::Validation(format!(
                "{what} has length {len}, design has {} observations",
                self.n_obs()
            )));
        }
        Ok(())
    }
}

/// Dense 0-based levels of one (possibly interacted) absorb term.
pub fn absorb_levels(panel: &Panel, factors: &[Factor]) -> Result<Vec<usize>> {
    let columns = factors.iter().map(|f| factor_column(panel, f)).collect::<Result<Vec<_>>>()?;
    let mut index: HashMap<Vec<u64>, usize> = HashMap::new();
    let mut levels = Vec::with_capacity(panel.len());
    for i in 0..panel.len() {
        let key: Vec<u64> = columns.iter().map(|c| c[i]).collect();
        let next = index.len();
        levels.push(*index.entry(key).or_insert(next));
    }
    Ok(levels)
}

fn factor_column(panel: &Panel, factor: &Factor) -> Result<Vec<u64>> {
    Ok(match factor {
        Factor::Unit => panel.units().to_vec(),
        Factor::Cluster => panel.clusters().to_vec(),
        // Bit pattern is enough to tell periods apart.
        Factor::Time => panel.times().iter().map(|&t| t as u64).collect(),
        Factor::Group => panel.groups().iter().map(|&g| u64::from(g)).collect(),
        Factor::Column(name) => panel.categorical(name)?.to_vec(),
    })
}
