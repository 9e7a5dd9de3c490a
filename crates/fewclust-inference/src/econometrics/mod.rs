//! Econometric primitives.
//!
//! - **Fixed-effects absorption** by weighted alternating projections.
//! - **Absorbing OLS**: weighted least squares on the demeaned design with
//!   Liang–Zeger cluster-robust standard errors.
//! - **Uniform-weights synthetic control**: per-period gap between a treated
//!   unit and the mean of never-treated donors.

pub mod absorbing;
pub mod hdfe;
pub mod synthetic_control;

pub use absorbing::{AbsorbingOls, cluster_robust_se};
pub use hdfe::FixedEffectsSolver;
pub use synthetic_control::UniformWeightsControl;
