use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fewclust"))
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("fewclust_cli_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

/// 6 clusters × 5 periods, cluster 0 treated from t = 2 with a +2 jump.
fn write_panel() -> PathBuf {
    let mut rows = Vec::new();
    for c in 0..6u64 {
        for t in 0..5i64 {
            let post = u8::from(t >= 2);
            let d = u8::from(c == 0) * post;
            let wiggle = 0.05 * ((c + t as u64 * 2) % 3) as f64;
            let y = c as f64 + 0.5 * t as f64 + 2.0 * f64::from(d) + wiggle;
            rows.push(serde_json::json!({
                "unit": c,
                "cluster": c,
                "time": 2000 + t,
                "treated": d,
                "weight": 1.0 + (c % 2) as f64,
                "values": { "y": y, "eligible": f64::from(post) },
                "categories": { "state": c },
            }));
        }
    }
    let path = tmp_path("panel.json");
    std::fs::write(&path, serde_json::to_string(&serde_json::json!({ "observations": rows })).unwrap())
        .unwrap();
    path
}

fn parse_json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}); stderr:\n{}",
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

#[test]
fn version_prints_crate_version() {
    let out = run(&["version"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("fewclust "), "unexpected: {text}");
}

#[test]
fn run_yaml_config_reports_every_p_value() {
    let panel = write_panel();
    let config = tmp_path("run.yaml");
    std::fs::write(
        &config,
        "outcomes: [y]\n\
         absorb: cluster time\n\
         cluster_var: state\n\
         years: {from: 2000, to: 2004}\n\
         fast: true\n\
         bootstrap_draws: 20\n\
         block_bootstrap_draws: 50\n\
         ri_draws: 3\n\
         seed: 11\n\
         sdid:\n  bootstrap_draws: 10\n",
    )
    .unwrap();

    let out = run(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--panel",
        panel.to_str().unwrap(),
        "--threads",
        "1",
    ]);
    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    let v = parse_json(&out);

    assert_eq!(v["n_obs"].as_u64(), Some(30));
    assert_eq!(v["n_clusters"].as_u64(), Some(6));
    let specs = v["specifications"].as_array().expect("specifications array");
    assert_eq!(specs.len(), 1);
    let r = &specs[0];
    assert_eq!(r["spec"].as_str(), Some("cluster time"));
    let beta = r["point_estimate"].as_f64().unwrap();
    assert!((beta - 2.0).abs() < 0.25, "beta={beta}");
    for key in [
        "se",
        "p_crve",
        "p_wild_cluster_bootstrap",
        "p_randomization_inference_t",
        "p_randomization_inference_beta",
        "p_block_bootstrap",
        "p_block_bootstrap_corrected",
    ] {
        assert!(r.get(key).is_some(), "missing {key}");
    }
    assert_eq!(r["draws"]["randomization"]["requested"].as_u64(), Some(3 * 6));

    let sdid = v["sdid"].as_array().expect("sdid array");
    assert_eq!(sdid.len(), 1);
    assert_eq!(sdid[0]["outcome"].as_str(), Some("y"));
    assert!(sdid[0]["aggregate_att"].as_f64().is_some());
    assert_eq!(sdid[0]["draws"]["requested"].as_u64(), Some(10));

    let _ = std::fs::remove_file(&panel);
    let _ = std::fs::remove_file(&config);
}

#[test]
fn run_json_config_writes_output_file() {
    let panel = write_panel();
    let config = tmp_path("run.json");
    let output = tmp_path("report.json");
    std::fs::write(
        &config,
        serde_json::to_string(&serde_json::json!({
            "panel": panel,
            "outcomes": ["y"],
            "specs": [{ "label": "twfe", "absorb": ["cluster", "time"] }],
            "bootstrap_draws": 10,
            "block_bootstrap_draws": 20,
            "ri_draws": 2,
        }))
        .unwrap(),
    )
    .unwrap();

    let out = run(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(v["specifications"][0]["spec"].as_str(), Some("twfe"));
    assert_eq!(v["sdid"].as_array().map(|a| a.len()), Some(0));

    let _ = std::fs::remove_file(&panel);
    let _ = std::fs::remove_file(&config);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn run_without_panel_fails() {
    let config = tmp_path("nopanel.yaml");
    std::fs::write(&config, "outcomes: [y]\nabsorb: cluster time\n").unwrap();
    let out = run(&["run", "--config", config.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("no panel"));
    let _ = std::fs::remove_file(&config);
}

#[test]
fn sdid_subcommand_emits_unit_atts() {
    let panel = write_panel();
    let out = run(&[
        "sdid",
        "--panel",
        panel.to_str().unwrap(),
        "--outcome",
        "y",
        "--draws",
        "8",
        "--seed",
        "3",
    ]);
    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    let v = parse_json(&out);
    let atts = v["unit_atts"].as_array().expect("unit_atts array");
    assert_eq!(atts.len(), 1);
    assert_eq!(v["draws"]["requested"].as_u64(), Some(8));
    let _ = std::fs::remove_file(&panel);
}
