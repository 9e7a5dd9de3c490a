//! Error types for fewclust

use thiserror::Error;

/// fewclust error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// The panel contains no ever-treated unit.
    #[error("no treated units in panel")]
    NoTreatedUnits,

    /// Not enough treated or control clusters to run a procedure.
    #[error("insufficient clusters: {treated} treated, {control} control")]
    InsufficientClusters {
        /// Number of treated clusters found.
        treated: usize,
        /// Number of control clusters found.
        control: usize,
    },

    /// Every unit-level estimate was undefined, so nothing could be aggregated.
    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    /// A resample / placebo draw lacks treated- or control-equivalent clusters.
    #[error("degenerate draw: {0}")]
    DrawDegenerate(String),

    /// Normal equations were singular after absorbing fixed effects.
    #[error("singular regression for specification '{spec}': {reason}")]
    RegressionSingularity {
        /// Label of the offending specification.
        spec: String,
        /// Solver message.
        reason: String,
    },
}

impl Error {
    /// Whether a failure of this kind only invalidates the current draw.
    ///
    /// Draw loops drop such draws and keep going; anything else aborts.
    pub fn is_draw_local(&self) -> bool {
        matches!(
            self,
            Error::DrawDegenerate(_) | Error::RegressionSingularity { .. } | Error::Computation(_)
        )
    }

    /// Attach a specification label to a singular-fit error.
    pub fn with_spec(self, spec: &str) -> Self {
        match self {
            Error::RegressionSingularity { reason, .. } => {
                Error::RegressionSingularity { spec: spec.to_string(), reason }
            }
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_local_classification() {
        assert!(Error::DrawDegenerate("x".into()).is_draw_local());
        assert!(
            Error::RegressionSingularity { spec: "a".into(), reason: "b".into() }.is_draw_local()
        );
        assert!(!Error::NoTreatedUnits.is_draw_local());
        assert!(!Error::InsufficientClusters { treated: 0, control: 3 }.is_draw_local());
    }

    #[test]
    fn with_spec_relabels_singularity_only() {
        let e = Error::RegressionSingularity { spec: String::new(), reason: "X'WX".into() }
            .with_spec("two-way FE");
        assert!(e.to_string().contains("two-way FE"));
        let e = Error::NoTreatedUnits.with_spec("ignored");
        assert!(matches!(e, Error::NoTreatedUnits));
    }
}
