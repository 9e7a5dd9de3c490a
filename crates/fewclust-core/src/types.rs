//! Common result types for fewclust

use serde::{Deserialize, Serialize};

/// Outcome of a single resampling / placebo draw.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome<T> {
    /// Statistic computed on the draw.
    Valid(T),
    /// Draw lacked treated- or control-equivalent clusters.
    Degenerate,
    /// Estimator failed or returned a non-finite value.
    Failed,
    /// Draw was not run because the grid was cancelled or ran out of time.
    Cancelled,
}

impl<T> DrawOutcome<T> {
    /// The statistic, if valid.
    pub fn valid(self) -> Option<T> {
        match self {
            DrawOutcome::Valid(v) => Some(v),
            _ => None,
        }
    }
}

/// Counts of requested vs. accepted draws for one procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawTally {
    /// Draws requested.
    pub requested: usize,
    /// Draws that produced a finite statistic.
    pub valid: usize,
    /// Draws dropped for lacking treated/control clusters.
    pub degenerate: usize,
    /// Draws dropped because the estimator failed.
    pub failed: usize,
    /// Draws never run (deadline or cancellation).
    pub cancelled: usize,
}

impl DrawTally {
    /// Tally a sequence of outcomes.
    pub fn from_outcomes<'a, T: 'a>(outcomes: impl IntoIterator<Item = &'a DrawOutcome<T>>) -> Self {
        let mut t = DrawTally::default();
        for o in outcomes {
            t.requested += 1;
            match o {
                DrawOutcome::Valid(_) => t.valid += 1,
                DrawOutcome::Degenerate => t.degenerate += 1,
                DrawOutcome::Failed => t.failed += 1,
                DrawOutcome::Cancelled => t.cancelled += 1,
            }
        }
        t
    }

    /// Draws that did not contribute to the statistic.
    pub fn dropped(&self) -> usize {
        self.requested - self.valid
    }

    /// Component-wise sum.
    pub fn merge(self, other: Self) -> Self {
        Self {
            requested: self.requested + other.requested,
            valid: self.valid + other.valid,
            degenerate: self.degenerate + other.degenerate,
            failed: self.failed + other.failed,
            cancelled: self.cancelled + other.cancelled,
        }
    }
}

/// Conventional point estimate with its cluster-robust inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Coefficient on the treatment indicator.
    pub estimate: f64,
    /// Cluster-robust standard error.
    pub std_error: f64,
    /// `estimate / std_error`; `None` when the SE is degenerate.
    pub t_stat: Option<f64>,
    /// Degrees of freedom for the reference t distribution (clusters − 1).
    pub df: usize,
    /// Two-sided p-value against t(df).
    pub p_value: Option<f64>,
    /// Observations used.
    pub n_obs: usize,
}

/// One treated unit's synthetic-control ATT and its aggregation weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitAtt {
    /// Treated unit id.
    pub unit: u64,
    /// Unit-level ATT.
    pub att: f64,
    /// Weight in the aggregate (first-observed-period analysis weight).
    pub weight: f64,
}

/// Population-weighted SDID estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdidResult {
    /// Units that entered the weighted mean.
    pub unit_atts: Vec<UnitAtt>,
    /// Treated units excluded because their ATT or weight was undefined.
    pub excluded_units: Vec<u64>,
    /// Weighted mean of unit ATTs.
    pub aggregate_att: f64,
    /// Cluster-bootstrap SE; `None` with fewer than two valid draws.
    pub bootstrap_se: Option<f64>,
    /// Percentile interval from the bootstrap draws, when available.
    pub bootstrap_ci: Option<(f64, f64)>,
    /// Bootstrap draw accounting.
    pub draws: DrawTally,
}

/// Reference distribution of one placebo world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullDistribution {
    /// Outcome column.
    pub outcome: String,
    /// Specification label.
    pub spec: String,
    /// Placebo-treated cluster; `None` for the actual assignment.
    pub placebo_cluster: Option<u64>,
    /// Treatment coefficients, one per valid draw.
    pub beta: Vec<f64>,
    /// t-statistics, one per valid draw (may hold fewer entries than `beta`).
    pub t: Vec<f64>,
    /// Draw accounting for this placebo.
    pub draws: DrawTally,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_kind() {
        let outcomes = vec![
            DrawOutcome::Valid(1.0),
            DrawOutcome::Degenerate,
            DrawOutcome::Valid(2.0),
            DrawOutcome::Failed,
            DrawOutcome::Cancelled,
        ];
        let t = DrawTally::from_outcomes(&outcomes);
        assert_eq!(t.requested, 5);
        assert_eq!(t.valid, 2);
        assert_eq!(t.dropped(), 3);
        let m = t.merge(t);
        assert_eq!(m.requested, 10);
        assert_eq!(m.degenerate, 2);
    }

    #[test]
    fn valid_extracts_statistic() {
        assert_eq!(DrawOutcome::Valid(3).valid(), Some(3));
        assert_eq!(DrawOutcome::<i32>::Failed.valid(), None);
    }
}
