//! End-to-end checks on synthetic state-year panels.
//!
//! - One treated cluster, +2 jump: point estimate, RI bounds, bootstrap SE
//! - Randomization inference calibration under a true null
//! - SDID on a multi-unit, multi-cluster panel

use fewclust_core::{ModelSpec, Panel};
use fewclust_inference::{
    AbsorbingOls, ClusterBootstrapEngine, Design, PipelineConfig, RandomizationInferenceEngine,
    SpecificationRunner, SyntheticDidAggregator, TREATMENT, UniformWeightsControl,
};

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 10 clusters × 5 periods, cluster 0 treated from t = 3 with a +2 jump.
/// Control clusters get a small post-period shift in {−0.1, 0, +0.1}.
fn jump_panel() -> Panel {
    let mut cluster = Vec::new();
    let mut time = Vec::new();
    let mut treated = Vec::new();
    let mut y = Vec::new();
    let mut post = Vec::new();
    for c in 0..10u64 {
        for t in 0..5i64 {
            let p = u8::from(t >= 3);
            let d = u8::from(c == 0) * p;
            let wiggle = if c == 0 { 0.0 } else { 0.1 * ((c % 3) as f64 - 1.0) };
            cluster.push(c);
            time.push(t);
            treated.push(d);
            post.push(f64::from(p));
            y.push(0.5 * c as f64 + 0.3 * t as f64 + 2.0 * f64::from(d) + wiggle * f64::from(p));
        }
    }
    let n = cluster.len();
    Panel::new(cluster.clone(), cluster, time, treated, vec![0; n], vec![1.0; n])
        .unwrap()
        .with_numeric("y", y)
        .unwrap()
        .with_numeric("post", post)
        .unwrap()
}

fn twfe() -> ModelSpec {
    ModelSpec::new("twfe").with_absorb("cluster time").unwrap()
}

/// Pure-noise panel: no treatment effect.
fn null_panel(seed: u64, n_clusters: u64, n_periods: i64) -> Panel {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let eps = Normal::new(0.0, 1.0).unwrap();
    let mut cluster = Vec::new();
    let mut time = Vec::new();
    let mut treated = Vec::new();
    let mut y = Vec::new();
    let mut post = Vec::new();
    let onset = n_periods / 2;
    for c in 0..n_clusters {
        for t in 0..n_periods {
            let p = u8::from(t >= onset);
            cluster.push(c);
            time.push(t);
            treated.push(u8::from(c == 0) * p);
            post.push(f64::from(p));
            y.push(c as f64 + 0.2 * t as f64 + eps.sample(&mut rng));
        }
    }
    let n = cluster.len();
    Panel::new(cluster.clone(), cluster, time, treated, vec![0; n], vec![1.0; n])
        .unwrap()
        .with_numeric("y", y)
        .unwrap()
        .with_numeric("post", post)
        .unwrap()
}

// ---------------------------------------------------------------------------
// One treated cluster, +2 jump
// ---------------------------------------------------------------------------

#[test]
fn jump_point_estimate_is_two() {
    let panel = jump_panel();
    let fit = Design::build(&panel, "y", None, &twfe()).unwrap().fit(&AbsorbingOls::new()).unwrap();
    let beta = fit.coefficient(TREATMENT).unwrap();
    assert!((beta - 2.0).abs() < 1e-8, "beta={beta}");
    assert_eq!(fit.n_obs, 50);
    assert_eq!(fit.n_clusters, 10);
}

#[test]
fn jump_randomization_p_value_is_minimal() {
    let panel = jump_panel();
    let r = RandomizationInferenceEngine::new(AbsorbingOls::new())
        .run("y", None, &twfe(), "post", &panel, 4, 2024)
        .unwrap();
    assert_eq!(r.null_distributions.len(), 10);
    assert_eq!(r.draws.requested, 40);
    // No placebo or sign-flip draw exceeds |2|, so the share sits at the
    // one-draw floor of the 40-draw grid.
    let p = r.p_beta.unwrap();
    assert_eq!(r.draws.valid, 40);
    assert!(p >= 1.0 / 40.0 - 1e-12, "p_beta={p}");
    assert!(p < 0.1, "p_beta={p}");
}

#[test]
fn jump_cluster_bootstrap_se_is_positive() {
    let panel = jump_panel();
    let spec = twfe();
    let draws = ClusterBootstrapEngine::new()
        .resample_and_estimate(
            &panel,
            |p| {
                let fit = Design::build(p, "y", None, &spec)?.fit(&AbsorbingOls::new())?;
                Ok(fit.coefficient(TREATMENT).unwrap_or(f64::NAN))
            },
            60,
            7,
        )
        .unwrap();
    let se = draws.std_error().unwrap();
    assert!(se.is_finite() && se > 0.0, "se={se}");
    assert!(draws.tally.valid >= 2);
}

#[test]
fn jump_full_report() {
    let config = PipelineConfig {
        bootstrap_draws: 30,
        block_bootstrap_draws: 200,
        ri_draws: 4,
        seed: 2024,
        treatment: None,
        eligibility: "post".into(),
    };
    let reports = SpecificationRunner::new(AbsorbingOls::new(), config)
        .run_grid(&jump_panel(), &["y".to_string()], &[twfe()])
        .unwrap();
    let r = &reports[0];
    assert!((r.point_estimate - 2.0).abs() < 1e-8);
    assert!(r.se.is_finite());
    assert!(r.bootstrap_se.unwrap() > 0.0);
    assert_eq!(r.draws.block_bootstrap.requested, 200);
}

// ---------------------------------------------------------------------------
// Calibration under the null
// ---------------------------------------------------------------------------

#[test]
fn randomization_inference_is_calibrated_under_null() {
    let engine = RandomizationInferenceEngine::new(AbsorbingOls::new());
    let spec = twfe();
    let n_sims = 200;
    let mut p_beta = Vec::with_capacity(n_sims);
    let mut p_t = Vec::with_capacity(n_sims);
    for s in 0..n_sims as u64 {
        let panel = null_panel(1000 + s, 10, 6);
        let r = engine.run("y", None, &spec, "post", &panel, 10, s).unwrap();
        p_beta.push(r.p_beta.unwrap());
        p_t.push(r.p_t.unwrap());
    }

    let rate = |ps: &[f64], level: f64| ps.iter().filter(|&&p| p <= level).count() as f64 / ps.len() as f64;
    for (name, ps) in [("p_beta", &p_beta), ("p_t", &p_t)] {
        let r05 = rate(ps, 0.05);
        let r50 = rate(ps, 0.5);
        assert!((0.01..=0.12).contains(&r05), "{name}: rejection rate at 0.05 = {r05}");
        assert!((0.35..=0.65).contains(&r50), "{name}: rejection rate at 0.5 = {r50}");
    }
}

// ---------------------------------------------------------------------------
// SDID
// ---------------------------------------------------------------------------

#[test]
fn sdid_constant_effect_across_clusters() {
    // 4 clusters × 3 units × 6 periods; units in cluster 0 treated at t = 3 or 4.
    let mut unit = Vec::new();
    let mut cluster = Vec::new();
    let mut time = Vec::new();
    let mut treated = Vec::new();
    let mut weight = Vec::new();
    let mut y = Vec::new();
    for c in 0..4u64 {
        for k in 0..3u64 {
            let u = c * 10 + k;
            let onset = if c == 0 { Some(3 + (k as i64 % 2)) } else { None };
            for t in 0..6i64 {
                let d = u8::from(onset.is_some_and(|t0| t >= t0));
                unit.push(u);
                cluster.push(c);
                time.push(t);
                treated.push(d);
                weight.push(1.0 + k as f64);
                y.push(u as f64 * 0.1 + (t as f64 * 0.9).cos() - 0.75 * f64::from(d));
            }
        }
    }
    let panel = Panel::new(unit, cluster, time, treated, vec![0; 72], weight)
        .unwrap()
        .with_numeric("y", y)
        .unwrap();
    let r = SyntheticDidAggregator::new(UniformWeightsControl::new())
        .estimate(&panel, "y", false, &[])
        .unwrap();
    assert_eq!(r.unit_atts.len(), 3);
    assert!((r.aggregate_att + 0.75).abs() < 1e-10, "att={}", r.aggregate_att);
    assert_eq!(r.draws.requested, 50);
}
