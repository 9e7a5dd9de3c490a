//! Run configuration for `fewclust run`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use fewclust_core::{ModelSpec, Panel, PanelRecords};
use fewclust_inference::{DrawBudget, PipelineConfig, SdidConfig};
use serde::{Deserialize, Serialize};

/// Draw counts used when `fast` is set.
const FAST_BOOTSTRAP_DRAWS: usize = 50;
const FAST_BLOCK_BOOTSTRAP_DRAWS: usize = 200;
const FAST_RI_DRAWS: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Panel JSON (`{ "observations": [...] }`). `--panel` overrides it.
    #[serde(default)]
    pub panel: Option<PathBuf>,

    /// Outcome columns, run outermost.
    pub outcomes: Vec<String>,

    /// Fully typed specifications.
    #[serde(default)]
    pub specs: Vec<ModelSpec>,

    /// Shorthand for one more specification built from an absorb string
    /// plus `controls`.
    #[serde(default)]
    pub absorb: Option<String>,

    /// Controls attached to the `absorb` shorthand specification.
    #[serde(default)]
    pub controls: ControlSet,

    /// Categorical column (or `unit` / `cluster`) used as the cluster id.
    #[serde(default = "default_cluster_var")]
    pub cluster_var: String,

    /// Numeric treatment column. Defaults to the panel's treatment flag.
    #[serde(default)]
    pub treatment: Option<String>,

    /// Numeric column placebo indicators are built from.
    #[serde(default = "default_eligibility")]
    pub eligibility: String,

    /// Inclusive period window applied before anything else.
    #[serde(default)]
    pub years: Option<YearRange>,

    #[serde(default = "default_bootstrap_draws")]
    pub bootstrap_draws: usize,

    #[serde(default = "default_block_bootstrap_draws")]
    pub block_bootstrap_draws: usize,

    #[serde(default = "default_ri_draws")]
    pub ri_draws: usize,

    /// Cap every draw count at the fast-mode values.
    #[serde(default)]
    pub fast: bool,

    #[serde(default)]
    pub seed: u64,

    /// Threads (0 = auto). Use 1 for deterministic scheduling.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Wall-clock budget for all draws, in seconds.
    #[serde(default)]
    pub max_seconds: Option<f64>,

    /// Also run SDID for every outcome.
    #[serde(default)]
    pub sdid: Option<SdidSection>,
}

/// Control variables for the `absorb` shorthand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSet {
    #[serde(default)]
    pub demographics: Vec<String>,
    #[serde(default)]
    pub unemployment: Option<String>,
    #[serde(default)]
    pub minimum_wage: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct YearRange {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdidSection {
    /// Covariates passed to the synthetic-control primitive.
    #[serde(default)]
    pub covariates: Vec<String>,
    #[serde(default = "default_sdid_draws")]
    pub bootstrap_draws: usize,
}

fn default_cluster_var() -> String {
    "cluster".to_string()
}

fn default_eligibility() -> String {
    "eligible".to_string()
}

fn default_bootstrap_draws() -> usize {
    1000
}

fn default_block_bootstrap_draws() -> usize {
    1000
}

fn default_ri_draws() -> usize {
    100
}

fn default_sdid_draws() -> usize {
    50
}

fn default_threads() -> usize {
    1
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Load a panel document from disk.
pub fn read_panel(path: &Path) -> Result<Panel> {
    let bytes = std::fs::read(path)?;
    let records: PanelRecords = serde_json::from_slice(&bytes)?;
    Ok(Panel::from_observations(&records.observations)?)
}

impl RunConfig {
    fn validate(&self) -> Result<()> {
        if self.outcomes.is_empty() {
            bail!("config: `outcomes` must list at least one column");
        }
        if self.specs.is_empty() && self.absorb.is_none() {
            bail!("config: provide `specs` or an `absorb` string");
        }
        if let Some(y) = self.years {
            if y.from > y.to {
                bail!("config: years.from ({}) > years.to ({})", y.from, y.to);
            }
        }
        if let Some(s) = self.max_seconds {
            if !(s.is_finite() && s > 0.0) {
                bail!("config: max_seconds must be positive, got {s}");
            }
        }
        Ok(())
    }

    /// Window the panel and apply the configured cluster variable.
    pub fn prepare_panel(&self, panel: &Panel) -> Result<Panel> {
        let windowed = match self.years {
            Some(y) => panel.restrict_periods(y.from, y.to)?,
            None => panel.clone(),
        };
        Ok(windowed.with_cluster_from(&self.cluster_var)?)
    }

    /// `specs` followed by the `absorb` shorthand, if any.
    pub fn model_specs(&self) -> Result<Vec<ModelSpec>> {
        let mut specs = self.specs.clone();
        if let Some(absorb) = &self.absorb {
            let c = &self.controls;
            let mut spec =
                ModelSpec::new(absorb.clone()).with_absorb(absorb)?.with_demographics(c.demographics.clone());
            if let Some(u) = &c.unemployment {
                spec = spec.with_unemployment(u.clone());
            }
            if let Some(m) = &c.minimum_wage {
                spec = spec.with_minimum_wage(m.clone());
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            bootstrap_draws: self.draws(self.bootstrap_draws, FAST_BOOTSTRAP_DRAWS),
            block_bootstrap_draws: self.draws(self.block_bootstrap_draws, FAST_BLOCK_BOOTSTRAP_DRAWS),
            ri_draws: self.draws(self.ri_draws, FAST_RI_DRAWS),
            seed: self.seed,
            treatment: self.treatment.clone(),
            eligibility: self.eligibility.clone(),
        }
    }

    pub fn sdid_config(&self, section: &SdidSection) -> SdidConfig {
        SdidConfig {
            bootstrap_draws: self.draws(section.bootstrap_draws, FAST_BOOTSTRAP_DRAWS),
            seed: self.seed,
            ..SdidConfig::default()
        }
    }

    pub fn budget(&self) -> DrawBudget {
        match self.max_seconds {
            Some(s) => DrawBudget::unlimited().with_time_limit(Duration::from_secs_f64(s)),
            None => DrawBudget::unlimited(),
        }
    }

    fn draws(&self, configured: usize, fast: usize) -> usize {
        if self.fast { configured.min(fast) } else { configured }
    }
}
