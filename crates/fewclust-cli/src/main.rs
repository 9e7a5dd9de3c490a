//! fewclust CLI

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fewclust_inference::{
    AbsorbingOls, DrawBudget, SdidConfig, SdidReport, SpecificationRunner, SyntheticDidAggregator,
    UniformWeightsControl,
};
use std::path::PathBuf;

use crate::config::{RunConfig, read_panel, read_run_config};

#[derive(Parser)]
#[command(name = "fewclust")]
#[command(about = "fewclust - inference with very few treated clusters")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every (outcome, specification) in a config: CRVE, cluster
    /// bootstrap, Ferman-Pinto and randomization inference
    Run {
        /// Run configuration (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Panel JSON. Overrides `panel` in the config.
        #[arg(long)]
        panel: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Overrides `threads` in the config.
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Population-weighted SDID for one outcome
    Sdid {
        /// Panel JSON
        #[arg(long)]
        panel: PathBuf,

        /// Outcome column
        #[arg(long)]
        outcome: String,

        /// Covariate columns passed to the synthetic-control step
        #[arg(long, value_delimiter = ',')]
        covariates: Vec<String>,

        /// Cluster-bootstrap draws for the standard error
        #[arg(long, default_value = "50")]
        draws: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { config, panel, output, threads } => {
            cmd_run(&config, panel.as_ref(), output.as_ref(), threads)
        }
        Commands::Sdid { panel, outcome, covariates, draws, seed, output, threads } => {
            cmd_sdid(&panel, &outcome, &covariates, draws, seed, output.as_ref(), threads)
        }
        Commands::Version => {
            println!("fewclust {}", fewclust_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_run(
    config_path: &PathBuf,
    panel_override: Option<&PathBuf>,
    output: Option<&PathBuf>,
    threads_override: Option<usize>,
) -> Result<()> {
    tracing::info!(path = %config_path.display(), "loading run config");
    let cfg: RunConfig = read_run_config(config_path)?;
    set_threads(threads_override.unwrap_or(cfg.threads));

    let panel_path = panel_override
        .or(cfg.panel.as_ref())
        .ok_or_else(|| anyhow::anyhow!("no panel: pass --panel or set `panel` in the config"))?;
    tracing::info!(path = %panel_path.display(), "loading panel");
    let panel = cfg.prepare_panel(&read_panel(panel_path)?)?;

    let specs = cfg.model_specs()?;
    let budget = cfg.budget();
    tracing::info!(
        n_obs = panel.len(),
        n_clusters = panel.cluster_ids().len(),
        n_specs = specs.len(),
        n_outcomes = cfg.outcomes.len(),
        "running specification grid"
    );

    let reports = SpecificationRunner::new(AbsorbingOls::new(), cfg.pipeline_config())
        .with_budget(budget.clone())
        .run_grid(&panel, &cfg.outcomes, &specs)?;

    let mut sdid = Vec::new();
    if let Some(section) = &cfg.sdid {
        let aggregator = SyntheticDidAggregator::new(UniformWeightsControl::new())
            .with_config(cfg.sdid_config(section))
            .with_budget(budget.clone());
        let use_covariates = !section.covariates.is_empty();
        for outcome in &cfg.outcomes {
            tracing::info!(outcome = %outcome, "running sdid");
            let result = aggregator.estimate(&panel, outcome, use_covariates, &section.covariates)?;
            sdid.push(SdidReport { outcome: outcome.clone(), result });
        }
    }

    let output_json = serde_json::json!({
        "fewclust_version": fewclust_core::VERSION,
        "n_obs": panel.len(),
        "n_clusters": panel.cluster_ids().len(),
        "seed": cfg.seed,
        "specifications": reports,
        "sdid": sdid,
    });
    write_json(output, output_json)
}

#[allow(clippy::too_many_arguments)]
fn cmd_sdid(
    panel_path: &PathBuf,
    outcome: &str,
    covariates: &[String],
    draws: usize,
    seed: u64,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    set_threads(threads);
    tracing::info!(path = %panel_path.display(), "loading panel");
    let panel = read_panel(panel_path)?;

    let config = SdidConfig { bootstrap_draws: draws, seed, ..SdidConfig::default() };
    let result = SyntheticDidAggregator::new(UniformWeightsControl::new())
        .with_config(config)
        .with_budget(DrawBudget::unlimited())
        .estimate(&panel, outcome, !covariates.is_empty(), covariates)?;

    let report = SdidReport { outcome: outcome.to_string(), result };
    write_json(output, serde_json::to_value(report)?)
}

fn set_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
