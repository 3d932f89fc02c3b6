use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sdfgc::pass::PassId;
use sdfgc::pipeline::{parse_from_kernel, BuildOptions, BundleEntry};
use sdfgc::program::{DefaultClassifier, TreeParser};
use sdfgc::sdfg::Sdfg;
use sdfgc::*;

// Construction latency scenarios.
// Every kernel works on float64 arrays A, B, C of length 1024.

const LINEAR_BODY: &str = r#"[
    {"kind": "assign", "target": "B[0]", "value": "A[0] + 1.0"},
    {"kind": "assign", "target": "C[0]", "value": "B[0] * 2.0"},
    {"kind": "assign", "target": "A[1]", "value": "C[0] - B[0]"}
]"#;

const STENCIL_BODY: &str = r#"[
    {"kind": "for", "var": "t", "begin": "0", "end": "100", "body": [
        {"kind": "map", "params": ["i"], "range": "1:1023", "body": [
            {"kind": "assign", "target": "B[i]", "value": "0.33 * (A[i - 1] + A[i] + A[i + 1])"}]},
        {"kind": "map", "params": ["i"], "range": "1:1023", "body": [
            {"kind": "assign", "target": "A[i]", "value": "0.33 * (B[i - 1] + B[i] + B[i + 1])"}]}]}
]"#;

const BRANCHY_BODY: &str = r#"[
    {"kind": "for", "var": "i", "begin": "0", "end": "1024", "body": [
        {"kind": "if", "cond": "i < 512",
            "body": [{"kind": "assign", "target": "B[i]", "value": "A[i]"}],
            "orelse": [{"kind": "assign", "target": "C[i]", "value": "numpy.sqrt(A[i])"}]}]}
]"#;

const REDUCTION_BODY: &str = r#"[
    {"kind": "map", "params": ["i", "j"], "range": "0:32, 0:32", "body": [
        {"kind": "assign", "target": "B[0]", "value": "A[32 * i + j]", "wcr": "sum"}]}
]"#;

fn scenarios() -> [(&'static str, &'static str); 4] {
    [
        ("linear", LINEAR_BODY),
        ("stencil", STENCIL_BODY),
        ("branchy", BRANCHY_BODY),
        ("reduction", REDUCTION_BODY),
    ]
}

fn entry(body: &str) -> BundleEntry {
    let json = format!(
        r#"{{
            "name": "bench",
            "params": ["A", "B", "C"],
            "annotations": {{
                "A": {{"value": "numeric_array", "dtype": "float64", "shape": [1024]}},
                "B": {{"value": "numeric_array", "dtype": "float64", "shape": [1024]}},
                "C": {{"value": "numeric_array", "dtype": "float64", "shape": [1024]}}
            }},
            "globals": {{"numpy": {{"value": "module", "name": "numpy"}}}},
            "program": {{"name": "bench", "body": {body}}}
        }}"#
    );
    serde_json::from_str(&json).expect("benchmark fixture must decode")
}

/// A chain of `n` sequential loops, each copying one array into the next.
fn generate_loop_chain(n: usize) -> String {
    let names = ["A", "B", "C"];
    let loops: Vec<String> = (0..n)
        .map(|k| {
            let src = names[k % 3];
            let dst = names[(k + 1) % 3];
            format!(
                r#"{{"kind": "for", "var": "i{k}", "begin": "0", "end": "1024", "body": [
                    {{"kind": "assign", "target": "{dst}[i{k}]", "value": "{src}[i{k}] + 1.0"}}]}}"#
            )
        })
        .collect();
    format!("[{}]", loops.join(", "))
}

fn build(entry: &BundleEntry, options: &BuildOptions) -> Sdfg {
    let parser = TreeParser::new(entry.program.clone());
    parse_from_kernel(
        &entry.kernel,
        &entry.args,
        &DefaultClassifier,
        &parser,
        options,
    )
    .expect("benchmark kernel must build")
}

fn stopped_after(stage: PassId) -> BuildOptions {
    BuildOptions {
        stop_after: Some(stage),
        ..BuildOptions::default()
    }
}

// Full construction, bundle entry to validated SDFG.
fn bench_full_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction/full");
    let options = BuildOptions::default();
    for (name, body) in scenarios() {
        let entry = entry(body);
        group.bench_with_input(BenchmarkId::from_parameter(name), &entry, |b, entry| {
            b.iter(|| black_box(build(black_box(entry), &options)));
        });
    }
    group.finish();
}

// Per-stage latency on the stencil scenario.
fn bench_stage_latency(c: &mut Criterion) {
    let entry = entry(STENCIL_BODY);

    {
        let mut group = c.benchmark_group("construction/stage/propagate");
        group.bench_function("stencil", |b| {
            b.iter_batched(
                || build(&entry, &stopped_after(PassId::BuildDataflow)),
                |mut sdfg| {
                    propagate::propagate_sdfg(black_box(&mut sdfg));
                    black_box(sdfg);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("construction/stage/transform");
        group.bench_function("stencil", |b| {
            b.iter_batched(
                || build(&entry, &stopped_after(PassId::Propagate)),
                |mut sdfg| {
                    let mut summaries = transform::StateSummaries::new();
                    let n = transform::apply_strict_transformations(
                        black_box(&mut sdfg),
                        &mut summaries,
                    );
                    black_box(n);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("construction/stage/validate");
        group.bench_function("stencil", |b| {
            let sdfg = build(&entry, &stopped_after(PassId::Transform));
            b.iter(|| {
                let r = validate::validate_sdfg(black_box(&sdfg));
                black_box(r.is_ok());
            });
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("construction/stage/fingerprint");
        group.bench_function("stencil", |b| {
            let sdfg = build(&entry, &BuildOptions::default());
            b.iter(|| black_box(persist::fingerprint(black_box(&sdfg)).is_ok()));
        });
        group.finish();
    }
}

// Construction scaling vs number of sequential loops.
fn bench_loop_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction/loop_scaling");
    let options = BuildOptions::default();

    for n_loops in [1_usize, 5, 10, 20, 40] {
        let entry = entry(&generate_loop_chain(n_loops));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}loops", n_loops)),
            &entry,
            |b, entry| {
                b.iter(|| black_box(build(black_box(entry), &options)));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_full_construction,
    bench_stage_latency,
    bench_loop_scaling
);
criterion_main!(benches);
