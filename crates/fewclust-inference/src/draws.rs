//! Draw scheduling: deterministic sub-seeds, parallel draw grids and an
//! optional deadline / cancellation budget.
//!
//! Every draw seeds its own `StdRng` from `(seed, stream, index)`, so a grid
//! produces the same statistics in the same order on any number of threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fewclust_core::{DrawOutcome, Error, Result};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;

/// RNG for draw `index` of stream `stream` (placebo index, engine id, ...).
pub fn draw_rng(seed: u64, stream: u64, index: u64) -> StdRng {
    let mixed = seed
        .wrapping_mul(2654435761)
        .wrapping_add(stream)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(index);
    StdRng::seed_from_u64(mixed)
}

/// `n` independent Rademacher signs (±1 with probability ½).
pub fn rademacher<R: Rng>(rng: &mut R, n: usize) -> Vec<f64> {
    (0..n).map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 }).collect()
}

/// Optional wall-clock deadline and cancellation flag shared by a draw grid.
///
/// Draws that have not started when the budget runs out are reported as
/// [`DrawOutcome::Cancelled`]; finished draws are kept.
#[derive(Debug, Clone, Default)]
pub struct DrawBudget {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl DrawBudget {
    /// No deadline, no cancellation.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Stop starting new draws after `limit` from now.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.deadline = Some(Instant::now() + limit);
        self
    }

    /// Stop starting new draws once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Whether new draws should be skipped.
    pub fn exhausted(&self) -> bool {
        if self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Run `n` draws in parallel, preserving draw order.
///
/// `f` returns the statistic of draw `i`. Draw-local errors
/// ([`Error::is_draw_local`]) are recorded as degenerate or failed draws;
/// any other error aborts the grid.
pub fn run_draws<T, F>(n: usize, budget: &DrawBudget, f: F) -> Result<Vec<DrawOutcome<T>>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    (0..n)
        .into_par_iter()
        .map(|i| {
            if budget.exhausted() {
                return Ok(DrawOutcome::Cancelled);
            }
            match f(i) {
                Ok(v) => Ok(DrawOutcome::Valid(v)),
                Err(Error::DrawDegenerate(_)) => Ok(DrawOutcome::Degenerate),
                Err(e) if e.is_draw_local() => {
                    log::debug!("draw {i} dropped: {e}");
                    Ok(DrawOutcome::Failed)
                }
                Err(e) => Err(e),
            }
        })
        .collect()
}

/// Reject a non-finite draw statistic.
pub fn finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::Computation(format!("{what} is not finite")))
    }
}
