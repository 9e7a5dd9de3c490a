//! Small statistics helpers shared by the resampling engines.

use fewclust_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Sample standard deviation (n − 1 denominator) of the finite entries.
///
/// Returns `None` with fewer than two finite values.
pub fn sample_sd(xs: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = xs.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let ss: f64 = finite.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (n - 1.0)).sqrt())
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Percentile interval at `conf_level` from bootstrap statistics.
pub fn percentile_interval(samples: &[f64], conf_level: f64) -> Result<(f64, f64)> {
    if samples.len() < 2 {
        return Err(Error::Validation("percentile_interval requires at least 2 samples".into()));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    let mut v = samples.to_vec();
    v.sort_by(f64::total_cmp);
    let alpha = (1.0 - conf_level) / 2.0;
    Ok((quantile_linear_sorted(&v, alpha), quantile_linear_sorted(&v, 1.0 - alpha)))
}

/// Share of the reference draws that exceed the observed statistic,
/// floored at `1/n_valid`.
///
/// The reference grid already contains the observed assignment, so the
/// observed statistic is not counted a second time.
pub fn tail_prob_counts(n_exceed: usize, n_valid: usize) -> f64 {
    let n = n_valid.max(1) as f64;
    (n_exceed as f64 / n).max(1.0 / n)
}

/// Randomization p-value for `|observed|` against `|draws|`.
///
/// `None` when the observed statistic is not finite or there are no draws.
pub fn abs_tail_prob(observed: f64, draws: &[f64]) -> Option<f64> {
    if !observed.is_finite() || draws.is_empty() {
        return None;
    }
    let target = observed.abs();
    let n_exceed = draws.iter().filter(|d| d.abs() > target).count();
    Some(tail_prob_counts(n_exceed, draws.len()))
}

/// Plain share of `stats` strictly above `threshold`; `None` when empty.
pub fn exceed_share(stats: &[f64], threshold: f64) -> Option<f64> {
    if stats.is_empty() {
        return None;
    }
    Some(stats.iter().filter(|&&s| s > threshold).count() as f64 / stats.len() as f64)
}

/// Two-sided p-value of `t` against Student's t with `df` degrees of freedom.
pub fn t_two_sided(t: f64, df: usize) -> Option<f64> {
    if !t.is_finite() || df == 0 {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df as f64).ok()?;
    Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}
