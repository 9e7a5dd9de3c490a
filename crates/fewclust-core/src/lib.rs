//! # fewclust-core
//!
//! Core types for fewclust: the immutable [`Panel`], typed regression
//! specifications, the error taxonomy and the two primitive traits the
//! estimation engines are written against.
//!
//! ## Architecture
//!
//! Estimators in `fewclust-inference` depend on [`RegressionPrimitive`] and
//! [`SyntheticControlPrimitive`], NOT on a concrete solver.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod panel;
pub mod spec;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use panel::{Observation, Panel, PanelRecords, TreatmentAssignment};
pub use spec::{AbsorbTerm, ControlTerm, Factor, ModelSpec, parse_absorb};
pub use traits::{
    RegressionFit, RegressionPrimitive, RegressionProblem, Regressor, SyntheticControlPrimitive,
    SyntheticControlProblem,
};
pub use types::{DrawOutcome, DrawTally, EstimationResult, NullDistribution, SdidResult, UnitAtt};

/// fewclust version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
