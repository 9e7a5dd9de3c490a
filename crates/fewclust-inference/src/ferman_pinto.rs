//! Block bootstrap with the Ferman–Pinto heteroskedasticity correction.
//!
//! Residuals of the null-imposed regression are collapsed into one
//! triple-difference contrast `W` per cluster. With a single treated cluster
//! the treated contrast is compared against contrasts resampled from all
//! clusters. When cluster sizes differ, `Var(W)` depends on cell sizes; the
//! corrected bootstrap rescales every resampled contrast to the variance
//! predicted for the slot it lands in.
//!
//! # References
//!
//! - Ferman & Pinto (2019), "Inference in Differences-in-Differences with Few
//!   Treated Groups and Heteroskedasticity." *Review of Economics and
//!   Statistics*.

use std::collections::BTreeMap;

use fewclust_core::{DrawTally, Error, ModelSpec, Panel, RegressionPrimitive, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::design::{Design, TREATMENT};
use crate::draws::{DrawBudget, draw_rng, finite, run_draws};
use crate::stats::exceed_share;

/// Draw stream of the block bootstrap.
const STREAM: u64 = 1;

/// Aggregated null residual contrast of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterContrast {
    /// Cluster id.
    pub cluster: u64,
    /// Whether the cluster is ever treated.
    pub treated: bool,
    /// Signed, size-weighted contrast of cell mean residuals.
    pub w: f64,
    /// Variance proxy `Σ Pr²·Σw²/P²` over the cluster's cells.
    pub q: f64,
    /// Total analysis weight of the cluster.
    pub weight: f64,
}

/// Per-cluster contrasts of one null fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterContrasts {
    /// Contrasts in ascending cluster order.
    pub clusters: Vec<ClusterContrast>,
}

#[derive(Default)]
struct Cell {
    sum_w: f64,
    sum_w_eta: f64,
    sum_w2: f64,
}

impl ClusterContrasts {
    /// Collapse observation residuals into cluster × time × group cells and
    /// then into one contrast per cluster.
    ///
    /// Cell `c` in block `(cluster, post, group)` enters with share
    /// `Pr = P_c / P_block` and sign `(post ? +1 : −1)·(group ? +1 : −1)`.
    /// The post period starts at the earliest treated onset.
    pub fn from_residuals(panel: &Panel, residuals: &[f64]) -> Result<Self> {
        if residuals.len() != panel.len() {
            return Err(Error::Validation(format!(
                "residuals length ({}) != panel length ({})",
                residuals.len(),
                panel.len()
            )));
        }
        let assignment = panel.cluster_assignment();
        let onset = assignment.reference_onset();
        let post_of = |t: i64| onset.is_some_and(|t0| t >= t0);

        let mut cells: BTreeMap<(u64, i64, u8), Cell> = BTreeMap::new();
        for i in 0..panel.len() {
            let w = panel.weights()[i];
            let cell = cells.entry((panel.clusters()[i], panel.times()[i], panel.groups()[i])).or_default();
            cell.sum_w += w;
            cell.sum_w_eta += w * residuals[i];
            cell.sum_w2 += w * w;
        }

        let mut block_weight: BTreeMap<(u64, bool, u8), f64> = BTreeMap::new();
        for (&(c, t, g), cell) in &cells {
            *block_weight.entry((c, post_of(t), g)).or_insert(0.0) += cell.sum_w;
        }

        let mut per_cluster: BTreeMap<u64, ClusterContrast> = BTreeMap::new();
        for (&(c, t, g), cell) in &cells {
            let entry = per_cluster.entry(c).or_insert(ClusterContrast {
                cluster: c,
                treated: assignment.is_treated(c),
                w: 0.0,
                q: 0.0,
                weight: 0.0,
            });
            entry.weight += cell.sum_w;
            if cell.sum_w <= 0.0 {
                continue;
            }
            let is_post = post_of(t);
            let block = block_weight.get(&(c, is_post, g)).copied().unwrap_or(0.0);
            let pr = cell.sum_w / block;
            let eta_bar = cell.sum_w_eta / cell.sum_w;
            let sign = (if is_post { 1.0 } else { -1.0 }) * (if g == 1 { 1.0 } else { -1.0 });
            entry.w += sign * pr * eta_bar;
            entry.q += pr * pr * cell.sum_w2 / (cell.sum_w * cell.sum_w);
        }

        Ok(Self { clusters: per_cluster.into_values().collect() })
    }

    /// Number of treated and control clusters.
    pub fn counts(&self) -> (usize, usize) {
        let treated = self.clusters.iter().filter(|c| c.treated).count();
        (treated, self.clusters.len() - treated)
    }
}

/// Which variance model the corrected bootstrap used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceBranch {
    /// `var = slope·q + intercept`.
    Linear,
    /// Negative slope: `var = 1`.
    UniformFallback,
    /// Negative intercept: `var = q`.
    ProportionalFallback,
}

/// Fitted `Var(W | q)` and the per-cluster variances it implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceModel {
    /// Coefficient on `q`.
    pub slope: f64,
    /// Constant.
    pub intercept: f64,
    /// Executed branch.
    pub branch: VarianceBranch,
    /// Variance per cluster, aligned with [`ClusterContrasts::clusters`].
    pub variances: Vec<f64>,
}

/// Weighted least squares of `W²` on `(1, q)` with weights `P_cluster`,
/// falling back when a predicted variance is not positive.
pub fn fit_variance_model(contrasts: &ClusterContrasts) -> Result<VarianceModel> {
    let cs = &contrasts.clusters;
    let sw: f64 = cs.iter().map(|c| c.weight).sum();
    if cs.is_empty() || sw <= 0.0 {
        return Err(Error::Computation("no weighted clusters for the variance model".into()));
    }
    let mq = cs.iter().map(|c| c.weight * c.q).sum::<f64>() / sw;
    let my = cs.iter().map(|c| c.weight * c.w * c.w).sum::<f64>() / sw;
    let sxx: f64 = cs.iter().map(|c| c.weight * (c.q - mq).powi(2)).sum();
    let sxy: f64 = cs.iter().map(|c| c.weight * (c.q - mq) * (c.w * c.w - my)).sum();

    let scale = cs.iter().map(|c| c.q * c.q).sum::<f64>().max(f64::MIN_POSITIVE);
    let (slope, intercept) = if sxx <= 1e-14 * scale {
        (0.0, my)
    } else {
        let slope = sxy / sxx;
        (slope, my - slope * mq)
    };

    let linear: Vec<f64> = cs.iter().map(|c| slope * c.q + intercept).collect();
    let (branch, variances) = if linear.iter().all(|v| *v > 0.0) {
        (VarianceBranch::Linear, linear)
    } else if slope < 0.0 {
        log::warn!(
            "ferman-pinto: non-positive predicted variance (slope={slope:.3e}, intercept={intercept:.3e}); using var = 1"
        );
        (VarianceBranch::UniformFallback, vec![1.0; cs.len()])
    } else {
        log::warn!(
            "ferman-pinto: non-positive predicted variance (slope={slope:.3e}, intercept={intercept:.3e}); using var = q"
        );
        (VarianceBranch::ProportionalFallback, cs.iter().map(|c| c.q).collect())
    };
    Ok(VarianceModel { slope, intercept, branch, variances })
}

/// Uncorrected and corrected block-bootstrap p-values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockBootstrapPValues {
    /// Share of uncorrected contrasts with `stat² > α̂²`.
    pub p_uncorrected: Option<f64>,
    /// Same with heteroskedasticity-corrected contrasts.
    pub p_corrected: Option<f64>,
    /// Draw accounting.
    pub draws: DrawTally,
}

/// Resample cluster contrasts into fixed treated/control slots.
///
/// Slot `i` keeps its label and weight and receives `W_s` of a cluster `s`
/// drawn with replacement; the corrected draw uses `W_s·√(var_i / var_s)`.
pub fn bootstrap_p_values(
    contrasts: &ClusterContrasts,
    model: &VarianceModel,
    alpha_hat: f64,
    n_draws: usize,
    seed: u64,
    budget: &DrawBudget,
) -> Result<BlockBootstrapPValues> {
    let cs = &contrasts.clusters;
    let (n_treated, n_control) = contrasts.counts();
    if n_treated == 0 || n_control == 0 {
        return Err(Error::InsufficientClusters { treated: n_treated, control: n_control });
    }
    if model.variances.len() != cs.len() {
        return Err(Error::Validation("variance model does not match contrasts".into()));
    }
    let control_weight: f64 = cs.iter().filter(|c| !c.treated).map(|c| c.weight).sum();
    if control_weight <= 0.0 {
        return Err(Error::Computation("control clusters carry no weight".into()));
    }

    let g = cs.len();
    let outcomes = run_draws(n_draws, budget, |b| {
        let mut rng = draw_rng(seed, STREAM, b as u64);
        let picks: Vec<usize> = (0..g).map(|_| rng.random_range(0..g)).collect();
        let (raw, cor) = slot_contrasts(cs, &model.variances, &picks, n_treated, control_weight);
        Ok((finite(raw, "block bootstrap contrast")?, finite(cor, "corrected contrast")?))
    })?;

    let draws = DrawTally::from_outcomes(&outcomes);
    let (raw, cor): (Vec<f64>, Vec<f64>) = outcomes.into_iter().filter_map(|o| o.valid()).unzip();
    let threshold = alpha_hat * alpha_hat;
    let sq = |v: &[f64]| v.iter().map(|x| x * x).collect::<Vec<_>>();
    Ok(BlockBootstrapPValues {
        p_uncorrected: exceed_share(&sq(&raw), threshold),
        p_corrected: exceed_share(&sq(&cor), threshold),
        draws,
    })
}

/// Uncorrected and corrected treated-minus-control contrast of one draw.
///
/// Slot `i` receives the contrast of cluster `picks[i]`.
fn slot_contrasts(
    cs: &[ClusterContrast],
    variances: &[f64],
    picks: &[usize],
    n_treated: usize,
    control_weight: f64,
) -> (f64, f64) {
    let (mut t_raw, mut t_cor, mut c_raw, mut c_cor) = (0.0, 0.0, 0.0, 0.0);
    for ((i, slot), &s) in cs.iter().enumerate().zip(picks) {
        let raw = cs[s].w;
        let cor = raw * (variances[i] / variances[s]).sqrt();
        if slot.treated {
            t_raw += raw;
            t_cor += cor;
        } else {
            c_raw += slot.weight * raw;
            c_cor += slot.weight * cor;
        }
    }
    let nt = n_treated as f64;
    (t_raw / nt - c_raw / control_weight, t_cor / nt - c_cor / control_weight)
}

/// Full Ferman–Pinto procedure for one (outcome, specification).
#[derive(Debug, Clone, Serialize)]
pub struct BlockBootstrapResult {
    /// Treatment coefficient of the full fit.
    pub alpha_hat: f64,
    /// Cluster contrasts of the null fit.
    pub contrasts: ClusterContrasts,
    /// Variance model used by the corrected draws.
    pub variance_model: VarianceModel,
    /// Bootstrap p-values.
    pub p_values: BlockBootstrapPValues,
}

/// Runs the full-fit / null-fit / contrast / bootstrap sequence.
pub struct BlockBootstrapCorrector<R: RegressionPrimitive> {
    primitive: R,
    budget: DrawBudget,
}

impl<R: RegressionPrimitive> BlockBootstrapCorrector<R> {
    /// Corrector over `primitive`.
    pub fn new(primitive: R) -> Self {
        Self { primitive, budget: DrawBudget::unlimited() }
    }

    /// Attach a deadline / cancellation budget.
    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    /// `treatment` names a numeric column; `None` uses the panel's treatment column.
    pub fn run(
        &self,
        outcome: &str,
        treatment: Option<&str>,
        spec: &ModelSpec,
        panel: &Panel,
        n_draws: usize,
        seed: u64,
    ) -> Result<BlockBootstrapResult> {
        let design = Design::build(panel, outcome, treatment, spec)?;
        self.run_design(&design, panel, n_draws, seed)
    }

    /// Same as [`Self::run`] with a prebuilt design.
    pub fn run_design(
        &self,
        design: &Design,
        panel: &Panel,
        n_draws: usize,
        seed: u64,
    ) -> Result<BlockBootstrapResult> {
        let (treated, control) = count_clusters(panel);
        if treated == 0 || control == 0 {
            return Err(Error::InsufficientClusters { treated, control });
        }

        let full = design.fit(&self.primitive)?;
        let alpha_hat = full
            .coefficient(TREATMENT)
            .ok_or_else(|| Error::Computation("treatment coefficient missing".into()))?;
        let null = design.without_treatment().fit(&self.primitive)?;

        let contrasts = ClusterContrasts::from_residuals(panel, &null.residuals)?;
        let variance_model = fit_variance_model(&contrasts)?;
        let p_values =
            bootstrap_p_values(&contrasts, &variance_model, alpha_hat, n_draws, seed, &self.budget)?;
        Ok(BlockBootstrapResult { alpha_hat, contrasts, variance_model, p_values })
    }
}

fn count_clusters(panel: &Panel) -> (usize, usize) {
    let a = panel.cluster_assignment();
    (a.treated_ids().len(), a.control_ids().len())
}
