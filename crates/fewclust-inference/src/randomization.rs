//! Randomization inference through wild cluster bootstrap placebos.
//!
//! Every never-treated cluster `j` in turn plays the treated cluster: its
//! placebo indicator is `eligibility × 1{cluster = j}`. For each placebo (and
//! for the actual assignment, `j = 0`) the null-imposed model is perturbed
//! with one Rademacher sign per cluster, `y* = ŷ + s·η̂`, and refit. The
//! observed `|β̂|` and `|t̂|` are ranked against the pooled grid, which
//! already contains the actual assignment's draws.
//!
//! # References
//!
//! - MacKinnon & Webb (2019), "Randomization Inference for
//!   Difference-in-Differences with Few Treated Clusters." *Journal of
//!   Econometrics*.
//! - Cameron, Gelbach & Miller (2008), "Bootstrap-Based Improvements for
//!   Inference with Clustered Errors." *Review of Economics and Statistics*.

use std::collections::HashMap;

use fewclust_core::{
    DrawOutcome, DrawTally, Error, ModelSpec, NullDistribution, Panel, RegressionPrimitive, Result,
};
use serde::Serialize;

use crate::design::{Design, TREATMENT};
use crate::draws::{DrawBudget, draw_rng, finite, rademacher, run_draws};
use crate::stats::abs_tail_prob;

/// First draw stream of the placebo grid; placebo `j` uses `STREAM_BASE + j`.
const STREAM_BASE: u64 = 16;

/// Observed statistics, p-values and the per-placebo null distributions.
#[derive(Debug, Clone, Serialize)]
pub struct RandomizationResult {
    /// Treatment coefficient on the actual data.
    pub beta_hat: f64,
    /// Its cluster-robust t-statistic, if the SE is usable.
    pub t_hat: Option<f64>,
    /// `#{|β*| > |β̂|} / #valid` over the full grid, at least `1/#valid`.
    pub p_beta: Option<f64>,
    /// Same for `|t|`; `None` when `t_hat` is undefined.
    pub p_t: Option<f64>,
    /// Wild cluster restricted bootstrap p-value (`|t*|` vs `|t̂|`, actual assignment only).
    pub p_wild_cluster_bootstrap: Option<f64>,
    /// Null distribution per placebo; the first entry is the actual assignment.
    pub null_distributions: Vec<NullDistribution>,
    /// Accounting over the whole grid.
    pub draws: DrawTally,
}

/// Placebo × wild-bootstrap grid over a [`RegressionPrimitive`].
pub struct RandomizationInferenceEngine<R: RegressionPrimitive> {
    primitive: R,
    budget: DrawBudget,
}

impl<R: RegressionPrimitive> RandomizationInferenceEngine<R> {
    /// Engine over `primitive`.
    pub fn new(primitive: R) -> Self {
        Self { primitive, budget: DrawBudget::unlimited() }
    }

    /// Attach a deadline / cancellation budget.
    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Run `n_draws` sign-flip draws for the actual assignment and every
    /// placebo cluster.
    ///
    /// `treatment` names a numeric column (`None`: the panel's treatment
    /// column); `eligibility` names the numeric column that placebo
    /// indicators are built from.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        outcome: &str,
        treatment: Option<&str>,
        spec: &ModelSpec,
        eligibility: &str,
        panel: &Panel,
        n_draws: usize,
        seed: u64,
    ) -> Result<RandomizationResult> {
        let design = Design::build(panel, outcome, treatment, spec)?;
        self.run_design(&design, outcome, eligibility, panel, n_draws, seed)
    }

    /// Same as [`Self::run`] with a prebuilt design.
    pub fn run_design(
        &self,
        design: &Design,
        outcome: &str,
        eligibility: &str,
        panel: &Panel,
        n_draws: usize,
        seed: u64,
    ) -> Result<RandomizationResult> {
        let assignment = panel.cluster_assignment();
        let placebos = assignment.control_ids();
        let n_treated = assignment.treated_ids().len();
        if n_treated == 0 || placebos.is_empty() {
            return Err(Error::InsufficientClusters { treated: n_treated, control: placebos.len() });
        }

        let actual = design.fit(&self.primitive)?;
        let beta_hat = actual
            .coefficient(TREATMENT)
            .ok_or_else(|| Error::Computation("treatment coefficient missing".into()))?;
        let t_hat = actual.t_stat(TREATMENT);

        let null = design.without_treatment().fit(&self.primitive)?;

        let elig = panel.numeric(eligibility)?;
        let mut worlds: Vec<(Option<u64>, Design)> = vec![(None, design.clone())];
        for &j in &placebos {
            let d: Vec<f64> = panel
                .clusters()
                .iter()
                .zip(elig)
                .map(|(&c, &e)| if c == j { e } else { 0.0 })
                .collect();
            worlds.push((Some(j), design.with_treatment(d)?));
        }

        let cluster_index = dense_index(panel.clusters());
        let n_clusters = cluster_index.iter().copied().max().map_or(0, |m| m + 1);

        let grid = run_draws(worlds.len() * n_draws, &self.budget, |k| {
            let (j, b) = (k / n_draws, k % n_draws);
            let mut rng = draw_rng(seed, STREAM_BASE + j as u64, b as u64);
            let signs = rademacher(&mut rng, n_clusters);
            let y_star = wild_outcome(&null.fitted, &null.residuals, &cluster_index, &signs);
            let fit = worlds[j].1.fit_with(&self.primitive, &y_star)?;
            let beta = fit
                .coefficient(TREATMENT)
                .ok_or_else(|| Error::Computation("treatment coefficient missing".into()))?;
            Ok((finite(beta, "placebo coefficient")?, fit.t_stat(TREATMENT)))
        })?;

        let draws = DrawTally::from_outcomes(&grid);
        let mut null_distributions = Vec::with_capacity(worlds.len());
        for (j, (placebo, _)) in worlds.iter().enumerate() {
            let slice: &[DrawOutcome<(f64, Option<f64>)>] = &grid[j * n_draws..(j + 1) * n_draws];
            let valid: Vec<(f64, Option<f64>)> = slice.iter().filter_map(|o| o.clone().valid()).collect();
            null_distributions.push(NullDistribution {
                outcome: outcome.to_string(),
                spec: design.label().to_string(),
                placebo_cluster: *placebo,
                beta: valid.iter().map(|v| v.0).collect(),
                t: valid.iter().filter_map(|v| v.1).collect(),
                draws: DrawTally::from_outcomes(slice),
            });
        }

        let all_beta: Vec<f64> = null_distributions.iter().flat_map(|d| d.beta.iter().copied()).collect();
        let all_t: Vec<f64> = null_distributions.iter().flat_map(|d| d.t.iter().copied()).collect();
        let p_beta = abs_tail_prob(beta_hat, &all_beta);
        let p_t = t_hat.and_then(|t| abs_tail_prob(t, &all_t));
        let p_wild_cluster_bootstrap =
            t_hat.zip(null_distributions.first()).and_then(|(t, d)| abs_tail_prob(t, &d.t));

        if draws.dropped() > 0 {
            log::warn!(
                "randomization inference: {} of {} draws dropped",
                draws.dropped(),
                draws.requested
            );
        }

        Ok(RandomizationResult {
            beta_hat,
            t_hat,
            p_beta,
            p_t,
            p_wild_cluster_bootstrap,
            null_distributions,
            draws,
        })
    }
}

/// `ŷ + s[g]·η̂`, with one sign per dense cluster index `g`.
fn wild_outcome(
    fitted: &[f64],
    residuals: &[f64],
    cluster_index: &[usize],
    signs: &[f64],
) -> Vec<f64> {
    fitted
        .iter()
        .zip(residuals)
        .zip(cluster_index)
        .map(|((f, e), &g)| f + signs[g] * e)
        .collect()
}

fn dense_index(ids: &[u64]) -> Vec<usize> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    ids.iter()
        .map(|id| {
            let next = index.len();
            *index.entry(*id).or_insert(next)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::econometrics::AbsorbingOls;

    /// 6 clusters × 4 periods, cluster 0 treated from t = 2.
    fn panel(effect: f64) -> Panel {
        let mut cluster = Vec::new();
        let mut time = Vec::new();
        let mut treated = Vec::new();
        let mut y = Vec::new();
        let mut post = Vec::new();
        for c in 0..6u64 {
            for t in 0..4i64 {
                let p = u8::from(t >= 2);
                let d = u8::from(c == 0) * p;
                cluster.push(c);
                time.push(t);
                treated.push(d);
                post.push(f64::from(p));
                let noise = ((c * 13 + t as u64 * 7) % 11) as f64 / 11.0 - 0.5;
                y.push(c as f64 + 0.5 * t as f64 + effect * f64::from(d) + 0.3 * noise);
            }
        }
        let n = cluster.len();
        Panel::new(cluster.clone(), cluster, time, treated, vec![0; n], vec![1.0; n])
            .unwrap()
            .with_numeric("y", y)
            .unwrap()
            .with_numeric("post", post)
            .unwrap()
    }

    fn spec() -> ModelSpec {
        ModelSpec::new("twfe").with_absorb("cluster time").unwrap()
    }

    #[test]
    fn grid_has_one_world_per_placebo() {
        let engine = RandomizationInferenceEngine::new(AbsorbingOls::new());
        let r = engine.run("y", None, &spec(), "post", &panel(1.0), 5, 7).unwrap();
        assert_eq!(r.null_distributions.len(), 6);
        assert_eq!(r.null_distributions[0].placebo_cluster, None);
        assert_eq!(r.null_distributions[1].placebo_cluster, Some(1));
        assert_eq!(r.draws.requested, 30);
        let p = r.p_beta.unwrap();
        assert!(p >= 1.0 / r.draws.valid as f64 && p <= 1.0);
    }

    #[test]
    fn same_seed_same_p_values() {
        let engine = RandomizationInferenceEngine::new(AbsorbingOls::new());
        let a = engine.run("y", None, &spec(), "post", &panel(0.5), 8, 3).unwrap();
        let b = engine.run("y", None, &spec(), "post", &panel(0.5), 8, 3).unwrap();
        assert_eq!(a.p_beta, b.p_beta);
        assert_eq!(a.p_t, b.p_t);
        assert_eq!(a.null_distributions[2].beta, b.null_distributions[2].beta);
    }

    #[test]
    fn large_effect_is_extreme() {
        let engine = RandomizationInferenceEngine::new(AbsorbingOls::new());
        let r = engine.run("y", None, &spec(), "post", &panel(25.0), 10, 1).unwrap();
        // Placebo draws never approach a 25-unit jump.
        let placebo_max = r.null_distributions[1..]
            .iter()
            .flat_map(|d| d.beta.iter())
            .fold(0.0_f64, |m, b| m.max(b.abs()));
        assert!(placebo_max < 25.0);
    }

    #[test]
    fn needs_a_control_cluster() {
        let p = panel(1.0);
        let all_treated: Vec<u8> = p.times().iter().map(|&t| u8::from(t >= 2)).collect();
        let p = p.with_treatment(all_treated).unwrap();
        let err = RandomizationInferenceEngine::new(AbsorbingOls::new())
            .run("y", Some("post"), &spec(), "post", &p, 2, 0)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientClusters { control: 0, .. }));
    }

    #[test]
    fn wild_outcome_flips_whole_clusters() {
        let p = panel(1.0);
        let null = Design::build(&p, "y", None, &spec())
            .unwrap()
            .without_treatment()
            .fit(&AbsorbingOls::new())
            .unwrap();
        let index = dense_index(p.clusters());
        let signs = rademacher(&mut draw_rng(9, STREAM_BASE, 0), 6);
        let y_star = wild_outcome(&null.fitted, &null.residuals, &index, &signs);

        let mut sign_of: HashMap<u64, f64> = HashMap::new();
        for i in 0..p.len() {
            let e = null.residuals[i];
            if e.abs() < 1e-9 {
                continue;
            }
            let s = (y_star[i] - null.fitted[i]) / e;
            assert!((s.abs() - 1.0).abs() < 1e-9, "row {i}: ratio {s}");
            let first = *sign_of.entry(p.clusters()[i]).or_insert(s);
            assert!((s - first).abs() < 1e-9, "cluster {} mixes signs", p.clusters()[i]);
        }
        assert!(sign_of.len() >= 2);
    }

    #[test]
    fn dense_index_is_first_appearance() {
        assert_eq!(dense_index(&[7, 3, 7, 9, 3]), vec![0, 1, 0, 2, 1]);
    }
}
