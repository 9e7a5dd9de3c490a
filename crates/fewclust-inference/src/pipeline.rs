//! Runs every inference procedure for (outcome, specification) pairs and
//! assembles the output records.

use fewclust_core::{DrawTally, Error, ModelSpec, Panel, RegressionPrimitive, Result, SdidResult};
use serde::{Deserialize, Serialize};

use crate::cluster_bootstrap::ClusterBootstrapEngine;
use crate::design::{Design, TREATMENT};
use crate::draws::DrawBudget;
use crate::ferman_pinto::{BlockBootstrapCorrector, VarianceBranch};
use crate::randomization::RandomizationInferenceEngine;
use crate::stats::t_two_sided;

/// Draw counts and seed shared by all procedures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cluster-bootstrap draws (SE of the point estimate).
    pub bootstrap_draws: usize,
    /// Ferman–Pinto block-bootstrap draws.
    pub block_bootstrap_draws: usize,
    /// Wild-bootstrap draws per placebo world.
    pub ri_draws: usize,
    /// Global seed.
    pub seed: u64,
    /// Numeric treatment column; `None` uses the panel's treatment column.
    pub treatment: Option<String>,
    /// Numeric column placebo indicators are built from.
    pub eligibility: String,
}

/// Draw accounting per procedure.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcedureDraws {
    /// Cluster bootstrap.
    pub cluster_bootstrap: DrawTally,
    /// Ferman–Pinto block bootstrap.
    pub block_bootstrap: DrawTally,
    /// Randomization inference grid.
    pub randomization: DrawTally,
}

/// Output record for one (outcome, specification).
#[derive(Debug, Clone, Serialize)]
pub struct SpecificationReport {
    /// Outcome column.
    pub outcome: String,
    /// Specification label.
    pub spec: String,
    /// Treatment coefficient.
    pub point_estimate: f64,
    /// Cluster-robust standard error.
    pub se: f64,
    /// Cluster-bootstrap standard error.
    pub bootstrap_se: Option<f64>,
    /// t(G − 1) p-value of the cluster-robust t-statistic.
    pub p_crve: Option<f64>,
    /// Wild cluster restricted bootstrap p-value.
    pub p_wild_cluster_bootstrap: Option<f64>,
    /// Randomization-inference p-value on `|t|`.
    pub p_randomization_inference_t: Option<f64>,
    /// Randomization-inference p-value on `|β|`.
    pub p_randomization_inference_beta: Option<f64>,
    /// Uncorrected Ferman–Pinto p-value.
    pub p_block_bootstrap: Option<f64>,
    /// Heteroskedasticity-corrected Ferman–Pinto p-value.
    pub p_block_bootstrap_corrected: Option<f64>,
    /// Variance model branch of the corrected bootstrap.
    pub variance_branch: VarianceBranch,
    /// Observations in the primary fit.
    pub n_obs: usize,
    /// Clusters in the primary fit.
    pub n_clusters: usize,
    /// Draw accounting.
    pub draws: ProcedureDraws,
}

/// SDID output for one outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SdidReport {
    /// Outcome column.
    pub outcome: String,
    /// Aggregated estimate.
    #[serde(flatten)]
    pub result: SdidResult,
}

/// Runs CRVE, cluster bootstrap, Ferman–Pinto and randomization inference.
pub struct SpecificationRunner<R: RegressionPrimitive + Clone> {
    primitive: R,
    config: PipelineConfig,
    budget: DrawBudget,
}

impl<R: RegressionPrimitive + Clone> SpecificationRunner<R> {
    /// Runner over `primitive`.
    pub fn new(primitive: R, config: PipelineConfig) -> Self {
        Self { primitive, config, budget: DrawBudget::unlimited() }
    }

    /// Attach a deadline / cancellation budget shared by every procedure.
    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Every (outcome, specification) pair, outcomes outermost.
    pub fn run_grid(
        &self,
        panel: &Panel,
        outcomes: &[String],
        specs: &[ModelSpec],
    ) -> Result<Vec<SpecificationReport>> {
        let mut reports = Vec::with_capacity(outcomes.len() * specs.len());
        for outcome in outcomes {
            for spec in specs {
                log::debug!("running outcome '{outcome}' with specification '{}'", spec.label);
                reports.push(self.run(panel, outcome, spec)?);
            }
        }
        Ok(reports)
    }

    /// All procedures for one (outcome, specification).
    pub fn run(&self, panel: &Panel, outcome: &str, spec: &ModelSpec) -> Result<SpecificationReport> {
        let cfg = &self.config;
        let treatment = cfg.treatment.as_deref();
        let design = Design::build(panel, outcome, treatment, spec)?;

        let fit = design.fit(&self.primitive)?;
        let point_estimate = fit
            .coefficient(TREATMENT)
            .ok_or_else(|| Error::Computation("treatment coefficient missing".into()))?;
        let se = fit.std_error(TREATMENT).unwrap_or(f64::NAN);
        let p_crve = fit.t_stat(TREATMENT).and_then(|t| t_two_sided(t, fit.n_clusters.saturating_sub(1)));

        let bootstrap = ClusterBootstrapEngine::new().with_budget(self.budget.clone()).resample_and_estimate(
            panel,
            |p| {
                let d = Design::build(p, outcome, treatment, spec)?;
                d.fit(&self.primitive)?
                    .coefficient(TREATMENT)
                    .ok_or_else(|| Error::Computation("treatment coefficient missing".into()))
            },
            cfg.bootstrap_draws,
            cfg.seed,
        )?;

        let fp = BlockBootstrapCorrector::new(self.primitive.clone())
            .with_budget(self.budget.clone())
            .run_design(&design, panel, cfg.block_bootstrap_draws, cfg.seed)?;

        let ri = RandomizationInferenceEngine::new(self.primitive.clone())
            .with_budget(self.budget.clone())
            .run_design(&design, outcome, &cfg.eligibility, panel, cfg.ri_draws, cfg.seed)?;

        Ok(SpecificationReport {
            outcome: outcome.to_string(),
            spec: spec.label.clone(),
            point_estimate,
            se,
            bootstrap_se: bootstrap.std_error(),
            p_crve,
            p_wild_cluster_bootstrap: ri.p_wild_cluster_bootstrap,
            p_randomization_inference_t: ri.p_t,
            p_randomization_inference_beta: ri.p_beta,
            p_block_bootstrap: fp.p_values.p_uncorrected,
            p_block_bootstrap_corrected: fp.p_values.p_corrected,
            variance_branch: fp.variance_model.branch,
            n_obs: fit.n_obs,
            n_clusters: fit.n_clusters,
            draws: ProcedureDraws {
                cluster_bootstrap: bootstrap.tally,
                block_bootstrap: fp.p_values.draws,
                randomization: ri.draws,
            },
        })
    }
}
