//! # fewclust-inference
//!
//! Estimation and inference for designs with very few treated clusters.
//!
//! This crate provides:
//! - Population-weighted synthetic difference-in-differences
//! - Nonparametric cluster bootstrap
//! - Ferman–Pinto corrected block bootstrap
//! - Randomization inference via wild cluster bootstrap placebos
//!
//! ## Architecture
//!
//! Engines are written against `RegressionPrimitive` and
//! `SyntheticControlPrimitive` from fewclust-core. The `econometrics`
//! module ships one reference implementation of each.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Nonparametric cluster bootstrap with fresh-id remapping.
pub mod cluster_bootstrap;
/// Regression designs built from typed specifications.
pub mod design;
/// Deterministic sub-seeds, parallel draw grids and budgets.
pub mod draws;
/// Reference regression and synthetic-control primitives.
pub mod econometrics;
/// Ferman–Pinto block bootstrap.
pub mod ferman_pinto;
/// Per-specification runner and report records.
pub mod pipeline;
/// Randomization inference over placebo clusters.
pub mod randomization;
/// Population-weighted SDID aggregation.
pub mod sdid;
/// Quantiles, tail probabilities and t p-values.
pub mod stats;

pub use cluster_bootstrap::{BootstrapDraws, ClusterBootstrapEngine};
pub use design::{Design, TREATMENT};
pub use draws::{DrawBudget, draw_rng};
pub use econometrics::{AbsorbingOls, FixedEffectsSolver, UniformWeightsControl};
pub use ferman_pinto::{
    BlockBootstrapCorrector, BlockBootstrapPValues, BlockBootstrapResult, ClusterContrast,
    ClusterContrasts, VarianceBranch, VarianceModel, bootstrap_p_values, fit_variance_model,
};
pub use pipeline::{
    PipelineConfig, ProcedureDraws, SdidReport, SpecificationReport, SpecificationRunner,
};
pub use randomization::{RandomizationInferenceEngine, RandomizationResult};
pub use sdid::{SdidConfig, SdidPoint, SyntheticDidAggregator};
