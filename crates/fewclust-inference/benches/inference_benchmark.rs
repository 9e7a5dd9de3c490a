use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fewclust_core::{ModelSpec, Panel};
use fewclust_inference::{
    AbsorbingOls, ClusterContrasts, Design, DrawBudget, RandomizationInferenceEngine, TREATMENT,
    bootstrap_p_values, fit_variance_model,
};
use std::hint::black_box;

/// `n_clusters` clusters × 4 units × 8 periods, cluster 0 treated from t = 4.
fn make_panel(n_clusters: u64) -> Panel {
    let mut unit = Vec::new();
    let mut cluster = Vec::new();
    let mut time = Vec::new();
    let mut treated = Vec::new();
    let mut group = Vec::new();
    let mut y = Vec::new();
    let mut post = Vec::new();
    for c in 0..n_clusters {
        for k in 0..4u64 {
            for t in 0..8i64 {
                let p = u8::from(t >= 4);
                let g = u8::from(k % 2 == 1);
                unit.push(c * 100 + k);
                cluster.push(c);
                time.push(t);
                group.push(g);
                treated.push(u8::from(c == 0) * p * g);
                post.push(f64::from(p * g));
                let noise = ((c * 31 + k * 17 + t as u64 * 7) % 13) as f64 / 13.0;
                y.push(c as f64 + 0.3 * t as f64 + noise);
            }
        }
    }
    let n = unit.len();
    Panel::new(unit, cluster, time, treated, group, vec![1.0; n])
        .unwrap()
        .with_numeric("y", y)
        .unwrap()
        .with_numeric("eligible", post)
        .unwrap()
}

fn ddd_spec() -> ModelSpec {
    ModelSpec::new("ddd").with_absorb("cluster#group time#group cluster#time").unwrap()
}

fn bench_absorbing_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("absorbing_ols/ddd");
    for n_clusters in [10u64, 50, 200] {
        let panel = make_panel(n_clusters);
        let design = Design::build(&panel, "y", None, &ddd_spec()).unwrap();
        let ols = AbsorbingOls::new();
        group.bench_with_input(BenchmarkId::from_parameter(n_clusters), &design, |b, d| {
            b.iter(|| black_box(d.fit(&ols).unwrap().coefficient(TREATMENT)))
        });
    }
    group.finish();
}

fn bench_block_bootstrap(c: &mut Criterion) {
    let panel = make_panel(50);
    let design = Design::build(&panel, "y", None, &ddd_spec()).unwrap();
    let null = design.without_treatment().fit(&AbsorbingOls::new()).unwrap();
    let contrasts = ClusterContrasts::from_residuals(&panel, &null.residuals).unwrap();
    let model = fit_variance_model(&contrasts).unwrap();
    let budget = DrawBudget::unlimited();
    c.bench_function("ferman_pinto/bootstrap_1000", |b| {
        b.iter(|| {
            black_box(bootstrap_p_values(&contrasts, &model, 0.1, 1000, 7, &budget).unwrap())
        })
    });
}

fn bench_randomization(c: &mut Criterion) {
    let panel = make_panel(10);
    let engine = RandomizationInferenceEngine::new(AbsorbingOls::new());
    let spec = ddd_spec();
    c.bench_function("randomization/10_clusters_b10", |b| {
        b.iter(|| black_box(engine.run("y", None, &spec, "eligible", &panel, 10, 1).unwrap().p_beta))
    });
}

criterion_group!(benches, bench_absorbing_fit, bench_block_bootstrap, bench_randomization);
criterion_main!(benches);
