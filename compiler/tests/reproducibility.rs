// Reproducibility tests.
//
// Construction must be deterministic: the same bundle yields byte-identical
// snapshots and fingerprints, both through the library and through the
// `sdfgc` binary, and a saved snapshot reloads to an equal SDFG.

use std::path::PathBuf;
use std::process::Command;

use sdfgc::persist::fingerprint;
use sdfgc::pipeline::{parse_bundle, BuildOptions, Bundle};
use sdfgc::program::DefaultClassifier;
use sdfgc::sdfg::Sdfg;

const BUNDLE: &str = r#"{
    "kernels": [
        {
            "name": "jacobi",
            "source": "def jacobi(A, B, T): ...",
            "params": ["A", "B", "T"],
            "annotations": {
                "A": {"value": "numeric_array", "dtype": "float64", "shape": [32]},
                "B": {"value": "numeric_array", "dtype": "float64", "shape": [32]},
                "T": {"value": "symbol", "name": "T", "dtype": "int64"}
            },
            "program": {
                "name": "jacobi",
                "body": [
                    {"kind": "for", "var": "t", "begin": "0", "end": "T", "body": [
                        {"kind": "map", "params": ["i"], "range": "1:31", "body": [
                            {"kind": "assign", "target": "B[i]",
                             "value": "0.5 * (A[i - 1] + A[i + 1])"}]},
                        {"kind": "map", "params": ["i"], "range": "1:31", "body": [
                            {"kind": "assign", "target": "A[i]",
                             "value": "0.5 * (B[i - 1] + B[i + 1])"}]}]}
                ]
            }
        },
        {
            "name": "total",
            "params": ["A", "S"],
            "annotations": {
                "A": {"value": "numeric_array", "dtype": "float64", "shape": [32]},
                "S": {"value": "numeric_array", "dtype": "float64", "shape": [1]}
            },
            "program": {
                "name": "total",
                "body": [
                    {"kind": "map", "params": ["i"], "range": "0:32", "body": [
                        {"kind": "assign", "target": "S[0]", "value": "A[i]", "wcr": "sum"}]}
                ]
            }
        }
    ]
}"#;

fn sdfgc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sdfgc"))
}

fn scratch_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sdfgc-{}-{}", test, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn build_all() -> Vec<Sdfg> {
    let bundle = Bundle::from_json(BUNDLE).unwrap();
    parse_bundle(&bundle, &DefaultClassifier, &BuildOptions::default())
        .unwrap_or_else(|e| panic!("{e}"))
        .into_values()
        .collect()
}

fn run_sdfgc(args: &[&str]) -> String {
    let output = Command::new(sdfgc_binary())
        .args(args)
        .output()
        .expect("failed to run sdfgc");
    assert!(
        output.status.success(),
        "sdfgc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

// ── Library ─────────────────────────────────────────────────────────────────

#[test]
fn repeated_builds_have_identical_fingerprints() {
    let first = build_all();
    let second = build_all();
    assert_eq!(first.len(), 2);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        assert_eq!(fingerprint(a).unwrap(), fingerprint(b).unwrap());
    }
    assert_ne!(
        fingerprint(&first[0]).unwrap(),
        fingerprint(&first[1]).unwrap()
    );
}

#[test]
fn saved_snapshot_reloads_equal() {
    let dir = scratch_dir("snapshot");
    for sdfg in build_all() {
        let path = dir.join(format!("{}.json", sdfg.name));
        sdfg.save(&path).unwrap();
        let restored = Sdfg::load(&path).unwrap();
        assert_eq!(restored, sdfg);
        assert_eq!(fingerprint(&restored).unwrap(), fingerprint(&sdfg).unwrap());
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reduction_keeps_its_conflict_resolution() {
    let sdfgs = build_all();
    let total = sdfgs.iter().find(|s| s.name == "total").unwrap();
    let g = &total.state(total.start_state().unwrap()).unwrap().graph;
    let s = g.access_nodes_of("S").next().unwrap();
    let outer = &g.edges[g.in_edges(s)[0].index()];
    assert_eq!(outer.memlet.to_string(), "S[0] (CR: sum)");
    assert_eq!(outer.memlet.volume.to_string(), "32");
}

// ── Binary ──────────────────────────────────────────────────────────────────

#[test]
fn cli_output_is_byte_identical_across_runs() {
    let dir = scratch_dir("cli");
    let bundle = dir.join("bundle.json");
    std::fs::write(&bundle, BUNDLE).unwrap();
    let path = bundle.to_str().unwrap();

    for emit in ["summary", "dot", "json", "fingerprint"] {
        let first = run_sdfgc(&["--emit", emit, path]);
        let second = run_sdfgc(&["--emit", emit, path]);
        assert!(!first.is_empty(), "--emit {emit} produced no output");
        assert_eq!(first, second, "--emit {emit} differs across runs");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_fingerprints_match_the_library() {
    let dir = scratch_dir("fingerprint");
    let bundle = dir.join("bundle.json");
    std::fs::write(&bundle, BUNDLE).unwrap();

    let out = run_sdfgc(&["--emit", "fingerprint", bundle.to_str().unwrap()]);
    let lines: Vec<serde_json::Value> = out
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let expected = build_all();
    assert_eq!(lines.len(), expected.len());
    for (line, sdfg) in lines.iter().zip(&expected) {
        assert_eq!(line["name"], sdfg.name.as_str());
        assert_eq!(line["fingerprint"], fingerprint(sdfg).unwrap().to_hex().as_str());
    }
    assert!(lines[0]["source_hash"].is_string());
    assert!(lines[1]["source_hash"].is_null());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_reports_the_failing_stage() {
    let dir = scratch_dir("failure");
    let bundle = dir.join("bad.json");
    std::fs::write(&bundle, BUNDLE.replace("A[i - 1]", "Z[i - 1]")).unwrap();

    let output = Command::new(sdfgc_binary())
        .arg(&bundle)
        .output()
        .expect("failed to run sdfgc");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("build_dataflow failed"), "stderr: {stderr}");
    assert!(stderr.contains("E0301"), "stderr: {stderr}");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_rejects_malformed_bundles() {
    let dir = scratch_dir("malformed");
    let bundle = dir.join("bad.json");
    std::fs::write(&bundle, "{\"kernels\": 3}").unwrap();

    let output = Command::new(sdfgc_binary())
        .arg(&bundle)
        .output()
        .expect("failed to run sdfgc");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0502"));
    let _ = std::fs::remove_dir_all(&dir);
}
