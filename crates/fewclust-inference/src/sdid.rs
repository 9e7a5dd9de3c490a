//! Population-weighted synthetic difference-in-differences.
//!
//! One synthetic-control fit per ever-treated unit (against all never-treated
//! units), aggregated with each unit's analysis weight from its first
//! observed period. The standard error comes from a cluster bootstrap that
//! resamples units.

use std::collections::BTreeSet;

use fewclust_core::{
    Error, Panel, Result, SdidResult, SyntheticControlPrimitive, SyntheticControlProblem, UnitAtt,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster_bootstrap::ClusterBootstrapEngine;
use crate::draws::DrawBudget;

/// SDID aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdidConfig {
    /// Cluster-bootstrap draws for the standard error.
    #[serde(default = "default_bootstrap_draws")]
    pub bootstrap_draws: usize,
    /// Bootstrap seed.
    #[serde(default)]
    pub seed: u64,
    /// Confidence level of the percentile interval.
    #[serde(default = "default_conf_level")]
    pub conf_level: f64,
}

fn default_bootstrap_draws() -> usize {
    50
}

fn default_conf_level() -> f64 {
    0.95
}

impl Default for SdidConfig {
    fn default() -> Self {
        Self {
            bootstrap_draws: default_bootstrap_draws(),
            seed: 0,
            conf_level: default_conf_level(),
        }
    }
}

/// Point estimate before the bootstrap.
#[derive(Debug, Clone)]
pub struct SdidPoint {
    /// Units entering the weighted mean.
    pub unit_atts: Vec<UnitAtt>,
    /// Units dropped for an undefined ATT or weight.
    pub excluded_units: Vec<u64>,
    /// Weighted mean of `unit_atts`.
    pub aggregate_att: f64,
}

/// Population-weighted SDID over a [`SyntheticControlPrimitive`].
pub struct SyntheticDidAggregator<S: SyntheticControlPrimitive> {
    primitive: S,
    config: SdidConfig,
    budget: DrawBudget,
}

impl<S: SyntheticControlPrimitive> SyntheticDidAggregator<S> {
    /// Aggregator with the default configuration.
    pub fn new(primitive: S) -> Self {
        Self { primitive, config: SdidConfig::default(), budget: DrawBudget::unlimited() }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: SdidConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a deadline / cancellation budget to the bootstrap.
    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Aggregate ATT with cluster-bootstrap SE (clustered on the unit).
    ///
    /// `covariates` are passed to the primitive only when `use_covariates`.
    pub fn estimate(
        &self,
        panel: &Panel,
        outcome: &str,
        use_covariates: bool,
        covariates: &[String],
    ) -> Result<SdidResult> {
        let covariates: &[String] = if use_covariates { covariates } else { &[] };
        let point = self.point_estimate(panel, outcome, covariates)?;

        let by_unit = panel.with_cluster_from("unit")?;
        let draws = ClusterBootstrapEngine::new().with_budget(self.budget.clone()).resample_and_estimate(
            &by_unit,
            |p| {
                self.point_estimate(p, outcome, covariates)
                    .map(|r| r.aggregate_att)
                    .map_err(draw_local)
            },
            self.config.bootstrap_draws,
            self.config.seed,
        )?;

        let bootstrap_se = draws.std_error();
        if bootstrap_se.is_none() {
            log::warn!(
                "sdid: {} valid bootstrap draws of {}; standard error undefined",
                draws.tally.valid,
                draws.tally.requested
            );
        }

        Ok(SdidResult {
            unit_atts: point.unit_atts,
            excluded_units: point.excluded_units,
            aggregate_att: point.aggregate_att,
            bootstrap_se,
            bootstrap_ci: draws.percentile_interval(self.config.conf_level),
            draws: draws.tally,
        })
    }

    /// Unit-level ATTs and their weighted mean, without the bootstrap.
    pub fn point_estimate(
        &self,
        panel: &Panel,
        outcome: &str,
        covariates: &[String],
    ) -> Result<SdidPoint> {
        let assignment = panel.unit_assignment();
        let treated = assignment.treated_ids();
        if treated.is_empty() {
            return Err(Error::NoTreatedUnits);
        }
        let never: BTreeSet<u64> = assignment.control_ids().into_iter().collect();
        let by_unit = panel.rows_by_unit();

        let fits: Vec<(u64, Result<f64>, f64)> = treated
            .par_iter()
            .map(|&u| {
                let mut keep = never.clone();
                keep.insert(u);
                let sub = panel.restrict_units(&keep);
                let att = self.primitive.att(&SyntheticControlProblem {
                    panel: &sub,
                    outcome,
                    treated_unit: u,
                    covariates,
                });
                let weight = by_unit.get(&u).map_or(f64::NAN, |rows| first_period_weight(panel, rows));
                (u, att, weight)
            })
            .collect();

        let mut unit_atts = Vec::with_capacity(fits.len());
        let mut excluded_units = Vec::new();
        for (unit, att, weight) in fits {
            match att {
                Ok(att) if att.is_finite() && weight.is_finite() && weight > 0.0 => {
                    unit_atts.push(UnitAtt { unit, att, weight });
                }
                Ok(att) => {
                    log::warn!("sdid: excluding unit {unit} (att={att}, weight={weight})");
                    excluded_units.push(unit);
                }
                Err(e) => {
                    log::warn!("sdid: excluding unit {unit}: {e}");
                    excluded_units.push(unit);
                }
            }
        }

        if unit_atts.is_empty() {
            return Err(Error::AggregationFailed(format!(
                "all {} treated units excluded",
                excluded_units.len()
            )));
        }
        let total_w: f64 = unit_atts.iter().map(|a| a.weight).sum();
        let aggregate_att = unit_atts.iter().map(|a| a.weight * a.att).sum::<f64>() / total_w;
        Ok(SdidPoint { unit_atts, excluded_units, aggregate_att })
    }
}

/// Weight of the unit's row in its earliest observed period.
fn first_period_weight(panel: &Panel, rows: &[usize]) -> f64 {
    rows.iter()
        .min_by_key(|&&i| panel.times()[i])
        .map_or(f64::NAN, |&i| panel.weights()[i])
}

/// Inside a bootstrap draw an empty treated set or a failed aggregation only
/// invalidates that draw.
fn draw_local(e: Error) -> Error {
    match e {
        Error::NoTreatedUnits => Error::DrawDegenerate("no treated units".into()),
        Error::AggregationFailed(msg) => Error::Computation(msg),
        other => other,
    }
}
