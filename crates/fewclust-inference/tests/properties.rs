//! Property tests: invariance to uniform rescaling of analysis weights.

use fewclust_core::{ModelSpec, Panel};
use fewclust_inference::{AbsorbingOls, Design, SyntheticDidAggregator, TREATMENT, UniformWeightsControl};
use proptest::prelude::*;

fn panel(weights: &[f64], noise: &[f64]) -> Panel {
    // 5 clusters × 4 periods, cluster 0 treated from t = 2.
    let mut cluster = Vec::new();
    let mut time = Vec::new();
    let mut treated = Vec::new();
    let mut y = Vec::new();
    let mut w = Vec::new();
    for c in 0..5u64 {
        for t in 0..4i64 {
            let i = (c as usize) * 4 + t as usize;
            let d = u8::from(c == 0 && t >= 2);
            cluster.push(c);
            time.push(t);
            treated.push(d);
            y.push(c as f64 + 0.4 * t as f64 + 1.3 * f64::from(d) + noise[i]);
            w.push(weights[c as usize]);
        }
    }
    Panel::new(cluster.clone(), cluster, time, treated, vec![0; 20], w)
        .unwrap()
        .with_numeric("y", y)
        .unwrap()
}

fn rescaled(p: &Panel, k: f64) -> Panel {
    p.with_weights(p.weights().iter().map(|w| w * k).collect()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn regression_is_scale_invariant(
        weights in proptest::collection::vec(0.2f64..5.0, 5),
        noise in proptest::collection::vec(-0.5f64..0.5, 20),
        k in 0.01f64..100.0,
    ) {
        let p = panel(&weights, &noise);
        let spec = ModelSpec::new("twfe").with_absorb("cluster time").unwrap();
        let a = Design::build(&p, "y", None, &spec).unwrap().fit(&AbsorbingOls::new()).unwrap();
        let b = Design::build(&rescaled(&p, k), "y", None, &spec).unwrap().fit(&AbsorbingOls::new()).unwrap();
        let (ba, bb) = (a.coefficient(TREATMENT).unwrap(), b.coefficient(TREATMENT).unwrap());
        prop_assert!((ba - bb).abs() <= 1e-7 * (1.0 + ba.abs()));
        let (sa, sb) = (a.std_error(TREATMENT).unwrap(), b.std_error(TREATMENT).unwrap());
        prop_assert!((sa - sb).abs() <= 1e-7 * (1.0 + sa.abs()));
    }

    #[test]
    fn sdid_is_scale_invariant(
        weights in proptest::collection::vec(0.2f64..5.0, 5),
        noise in proptest::collection::vec(-0.5f64..0.5, 20),
        k in 0.01f64..100.0,
    ) {
        let p = panel(&weights, &noise);
        let agg = SyntheticDidAggregator::new(UniformWeightsControl::new());
        let a = agg.point_estimate(&p, "y", &[]).unwrap();
        let b = agg.point_estimate(&rescaled(&p, k), "y", &[]).unwrap();
        prop_assert!((a.aggregate_att - b.aggregate_att).abs() <= 1e-9 * (1.0 + a.aggregate_att.abs()));
    }
}
