//! Nonparametric cluster (block) bootstrap.
//!
//! Each draw samples `G` clusters with replacement from the `G` clusters of
//! the panel, materializes their rows and reruns an arbitrary estimator on
//! the resampled panel. Every occurrence of a cluster receives a fresh
//! cluster id, and every unit inside it a fresh unit id, so a cluster drawn
//! twice enters the estimator as two distinct clusters.

use std::collections::HashMap;

use fewclust_core::{DrawOutcome, DrawTally, Error, Panel, Result};
use rand::Rng;

use crate::draws::{DrawBudget, draw_rng, finite, run_draws};
use crate::stats::{percentile_interval, sample_sd};

/// Statistics of one bootstrap run, in draw order.
#[derive(Debug, Clone)]
pub struct BootstrapDraws {
    /// Outcome of every requested draw.
    pub outcomes: Vec<DrawOutcome<f64>>,
    /// Valid statistics only, in draw order.
    pub statistics: Vec<f64>,
    /// Draw accounting.
    pub tally: DrawTally,
}

impl BootstrapDraws {
    fn from_outcomes(outcomes: Vec<DrawOutcome<f64>>) -> Self {
        let tally = DrawTally::from_outcomes(&outcomes);
        let statistics = outcomes.iter().filter_map(|o| o.clone().valid()).collect();
        Self { outcomes, statistics, tally }
    }

    /// Bootstrap standard error; `None` with fewer than two valid draws.
    pub fn std_error(&self) -> Option<f64> {
        sample_sd(&self.statistics)
    }

    /// Percentile interval; `None` with fewer than two valid draws.
    pub fn percentile_interval(&self, conf_level: f64) -> Option<(f64, f64)> {
        percentile_interval(&self.statistics, conf_level).ok()
    }
}

/// Resamples whole clusters with replacement and reruns an estimator.
#[derive(Debug, Clone, Default)]
pub struct ClusterBootstrapEngine {
    budget: DrawBudget,
}

impl ClusterBootstrapEngine {
    /// Engine with no time budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a deadline / cancellation budget.
    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Run `n_draws` cluster-bootstrap draws of `estimator_fn`.
    ///
    /// Clusters are the panel's cluster role column; use
    /// [`Panel::with_cluster_from`] to cluster on something else. Draws
    /// without a treated or without a control cluster are counted as
    /// degenerate. Results are reproducible for a given `seed` on any
    /// number of threads.
    pub fn resample_and_estimate<F>(
        &self,
        panel: &Panel,
        estimator_fn: F,
        n_draws: usize,
        seed: u64,
    ) -> Result<BootstrapDraws>
    where
        F: Fn(&Panel) -> Result<f64> + Sync,
    {
        let universe = ClusterUniverse::new(panel)?;
        let outcomes = run_draws(n_draws, &self.budget, |b| {
            let mut rng = draw_rng(seed, 0, b as u64);
            let resampled = universe.resample(panel, &mut rng)?;
            finite(estimator_fn(&resampled)?, "bootstrap statistic")
        })?;

        let draws = BootstrapDraws::from_outcomes(outcomes);
        if draws.tally.dropped() > 0 {
            log::debug!(
                "cluster bootstrap: {} of {} draws dropped ({} degenerate, {} failed, {} cancelled)",
                draws.tally.dropped(),
                draws.tally.requested,
                draws.tally.degenerate,
                draws.tally.failed,
                draws.tally.cancelled
            );
        }
        Ok(draws)
    }
}

/// Cluster ids, their rows and treatment status.
struct ClusterUniverse {
    ids: Vec<u64>,
    rows: Vec<Vec<usize>>,
    treated: Vec<bool>,
}

impl ClusterUniverse {
    fn new(panel: &Panel) -> Result<Self> {
        let assignment = panel.cluster_assignment();
        let (ids, rows): (Vec<u64>, Vec<Vec<usize>>) = panel.rows_by_cluster().into_iter().unzip();
        let treated: Vec<bool> = ids.iter().map(|&c| assignment.is_treated(c)).collect();
        let n_treated = treated.iter().filter(|&&t| t).count();
        if n_treated == 0 || n_treated == ids.len() {
            return Err(Error::InsufficientClusters {
                treated: n_treated,
                control: ids.len() - n_treated,
            });
        }
        Ok(Self { ids, rows, treated })
    }

    fn resample<R: Rng>(&self, panel: &Panel, rng: &mut R) -> Result<Panel> {
        let g = self.ids.len();
        let picks: Vec<usize> = (0..g).map(|_| rng.random_range(0..g)).collect();

        let has_treated = picks.iter().any(|&k| self.treated[k]);
        let has_control = picks.iter().any(|&k| !self.treated[k]);
        if !has_treated || !has_control {
            return Err(Error::DrawDegenerate(
                "resample lacks a treated or a control cluster".into(),
            ));
        }

        let mut rows = Vec::new();
        let mut cluster = Vec::new();
        let mut unit = Vec::new();
        let mut fresh_unit: HashMap<(usize, u64), u64> = HashMap::new();
        for (occurrence, &k) in picks.iter().enumerate() {
            for &i in &self.rows[k] {
                let next = fresh_unit.len() as u64;
                let id = *fresh_unit.entry((occurrence, panel.units()[i])).or_insert(next);
                rows.push(i);
                cluster.push(occurrence as u64);
                unit.push(id);
            }
        }
        panel.select_rows(&rows).with_ids(unit, cluster)
    }
}
