// Integration tests for end-to-end SDFG construction.
//
// Each scenario feeds a kernel bundle entry (kernel definition plus its
// pre-parsed primitive tree) through the library pipeline and checks the
// shape of the resulting state machine and dataflow graphs.

use sdfgc::data::DType;
use sdfgc::diag::codes;
use sdfgc::pass::PassId;
use sdfgc::pipeline::{parse_from_kernel, BuildOptions, BundleEntry, PipelineError};
use sdfgc::program::{DefaultClassifier, TreeParser};
use sdfgc::sdfg::Sdfg;

// ── Test helpers ────────────────────────────────────────────────────────────

/// A kernel over float64 arrays `A`, `B`, `C` of length 16 and an int64
/// size symbol `N`, with the given primitive tree.
fn entry(name: &str, body: &str) -> BundleEntry {
    let json = format!(
        r#"{{
            "name": "{name}",
            "params": ["A", "B", "C", "N"],
            "annotations": {{
                "A": {{"value": "numeric_array", "dtype": "float64", "shape": [16]}},
                "B": {{"value": "numeric_array", "dtype": "float64", "shape": [16]}},
                "C": {{"value": "numeric_array", "dtype": "float64", "shape": [16]}},
                "N": {{"value": "symbol", "name": "N", "dtype": "int64"}}
            }},
            "program": {{"name": "{name}", "body": {body}}}
        }}"#
    );
    serde_json::from_str(&json).unwrap_or_else(|e| panic!("bad fixture: {e}"))
}

fn build_with(entry: &BundleEntry, options: &BuildOptions) -> Result<Sdfg, PipelineError> {
    let parser = TreeParser::new(entry.program.clone());
    parse_from_kernel(
        &entry.kernel,
        &entry.args,
        &DefaultClassifier,
        &parser,
        options,
    )
}

fn build(entry: &BundleEntry) -> Sdfg {
    build_with(entry, &BuildOptions::default()).unwrap_or_else(|e| panic!("{e}"))
}

fn edge_strings(sdfg: &Sdfg, edges: Vec<usize>) -> Vec<String> {
    edges
        .into_iter()
        .map(|i| sdfg.edges()[i].to_string())
        .collect()
}

// ── Scenarios ───────────────────────────────────────────────────────────────

/// Two dependent assignments stay in one state and share the access node of
/// the container written by the first and read by the second.
#[test]
fn straight_line_kernel_is_one_state() {
    let sdfg = build(&entry(
        "chain",
        r#"[{"kind": "assign", "target": "B[0]", "value": "A[0] + 1.0"},
            {"kind": "assign", "target": "C[0]", "value": "B[0] * 2.0"}]"#,
    ));
    assert_eq!(sdfg.num_states(), 1);
    assert!(sdfg.edges().is_empty());

    let g = &sdfg.state(sdfg.start_state().unwrap()).unwrap().graph;
    assert_eq!(g.tasklet_count(), 2);
    assert_eq!(g.access_nodes_of("B").count(), 1);
    let b = g.access_nodes_of("B").next().unwrap();
    assert_eq!(g.in_edges(b).len(), 1);
    assert_eq!(g.out_edges(b).len(), 1);
}

/// The loop runs through a guard state: the empty start initialises `i`,
/// and the guard leads to exactly two loop states, the body on `i < N`
/// (returning with `i = i + 1`) and the exit on `i >= N`.
#[test]
fn for_loop_lowers_through_a_guard_state() {
    let sdfg = build(&entry(
        "bump",
        r#"[{"kind": "for", "var": "i", "begin": "0", "end": "N", "body": [
                {"kind": "assign", "target": "A[i]", "value": "A[i] + 1.0"}]}]"#,
    ));
    assert_eq!(sdfg.num_states(), 4);
    let start = sdfg.start_state().unwrap();
    let guard = sdfg.find_state("guard_0").unwrap();

    assert_eq!(edge_strings(&sdfg, sdfg.out_edges(start)), vec!["[true] {i = 0}"]);
    assert_eq!(
        edge_strings(&sdfg, sdfg.out_edges(guard)),
        vec!["[i < N]", "[i >= N]"]
    );
    let back: Vec<String> = sdfg
        .in_edges(guard)
        .into_iter()
        .filter(|&i| sdfg.edges()[i].src != start)
        .map(|i| sdfg.edges()[i].to_string())
        .collect();
    assert_eq!(back, vec!["[true] {i = i + 1}"]);

    assert_eq!(sdfg.symbols().get("i"), Some(&DType::Int64));
    assert_eq!(sdfg.symbols().get("N"), Some(&DType::Int64));

    // Only the body state carries dataflow.
    let body = sdfg.edges()[sdfg.out_edges(guard)[0]].dst;
    let exit = sdfg.edges()[sdfg.out_edges(guard)[1]].dst;
    for (id, state) in sdfg.states() {
        assert_eq!(state.is_empty(), id != body, "state '{}'", state.label);
    }

    // Besides start and guard, the loop leaves exactly a body and an exit.
    let loop_states: Vec<_> = sdfg
        .states()
        .map(|(id, _)| id)
        .filter(|&id| id != start && id != guard)
        .collect();
    assert_eq!(loop_states.len(), 2);
    assert!(loop_states.contains(&body) && loop_states.contains(&exit));
    assert_eq!(edge_strings(&sdfg, sdfg.out_edges(body)), vec!["[true] {i = i + 1}"]);
    assert!(sdfg.out_edges(exit).is_empty());
}

#[test]
fn if_else_branches_and_joins() {
    let sdfg = build(&entry(
        "pick",
        r#"[{"kind": "if", "cond": "N > 2",
                "body": [{"kind": "assign", "target": "A[0]", "value": "1.0"}],
                "orelse": [{"kind": "assign", "target": "A[0]", "value": "2.0"}]},
            {"kind": "assign", "target": "B[0]", "value": "A[0]"}]"#,
    ));
    assert_eq!(sdfg.num_states(), 4);
    let start = sdfg.start_state().unwrap();
    let guards: Vec<String> = sdfg
        .out_edges(start)
        .into_iter()
        .map(|i| sdfg.edges()[i].guard.to_string())
        .collect();
    assert_eq!(guards, vec!["N > 2", "N <= 2"]);

    // Both branches flow unconditionally into the join, which holds the copy.
    let branches: Vec<_> = sdfg
        .out_edges(start)
        .into_iter()
        .map(|i| sdfg.edges()[i].dst)
        .collect();
    let joins: Vec<_> = branches
        .iter()
        .map(|&b| {
            let out = sdfg.out_edges(b);
            assert_eq!(out.len(), 1);
            assert!(sdfg.edges()[out[0]].is_unconditional());
            sdfg.edges()[out[0]].dst
        })
        .collect();
    assert_eq!(joins[0], joins[1]);
    let join = sdfg.state(joins[0]).unwrap();
    assert_eq!(join.graph.tasklet_count(), 1);
}

#[test]
fn map_memlets_are_propagated_outward() {
    let sdfg = build(&entry(
        "shift",
        r#"[{"kind": "map", "params": ["i"], "range": "0:15", "body": [
                {"kind": "assign", "target": "B[i]", "value": "A[i + 1]"}]}]"#,
    ));
    let g = &sdfg.state(sdfg.start_state().unwrap()).unwrap().graph;
    let a = g.access_nodes_of("A").next().unwrap();
    let outer = &g.edges[g.out_edges(a)[0].index()];
    assert_eq!(outer.memlet.subset.to_string(), "1:16");
    assert_eq!(outer.memlet.volume.to_string(), "15");

    let b = g.access_nodes_of("B").next().unwrap();
    let written = &g.edges[g.in_edges(b)[0].index()];
    assert_eq!(written.memlet.subset.to_string(), "0:15");
    assert_eq!(written.src_conn.as_deref(), Some("OUT_B"));
}

/// A value written earlier in a map body reaches a later read in the same
/// body through an inner access node, never the pre-map container.
#[test]
fn map_body_reads_its_own_writes() {
    let sdfg = build(&entry(
        "forward",
        r#"[{"kind": "map", "params": ["i"], "range": "0:16", "body": [
                {"kind": "assign", "target": "B[i]", "value": "A[i]"},
                {"kind": "assign", "target": "C[i]", "value": "B[i] + 1.0"}]}]"#,
    ));
    let g = &sdfg.state(sdfg.start_state().unwrap()).unwrap().graph;
    let read = g
        .edges
        .iter()
        .find(|e| e.dst_conn.as_deref() == Some("__in_B"))
        .unwrap();
    let inner = read.src;
    assert_eq!(g.nodes[inner.index()].data(), Some("B"));
    assert_eq!(g.in_edges(inner).len(), 1);
    assert_eq!(read.memlet.subset.to_string(), "i");

    // B never enters the map; it only leaves it, with the full range written.
    assert!(!g
        .edges
        .iter()
        .any(|e| e.memlet.data == "B" && g.nodes[e.dst.index()].is_scope_entry()));
    let outer = g
        .edges
        .iter()
        .find(|e| e.src_conn.as_deref() == Some("OUT_B"))
        .unwrap();
    assert_eq!(outer.memlet.subset.to_string(), "0:16");
    assert!(g.nodes[outer.dst.index()].is_access());
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn provably_out_of_bounds_write_fails_validation() {
    let err = build_with(
        &entry(
            "overflow",
            r#"[{"kind": "assign", "target": "A[16]", "value": "0.0"}]"#,
        ),
        &BuildOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.stage, PassId::Validate);
    assert_eq!(err.diagnostic.code, codes::E0404);
}

#[test]
fn unknown_container_fails_dataflow_construction() {
    let err = build_with(
        &entry(
            "typo",
            r#"[{"kind": "assign", "target": "A[0]", "value": "D[0]"}]"#,
        ),
        &BuildOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.stage, PassId::BuildDataflow);
    assert_eq!(err.diagnostic.code, codes::E0301);
    assert!(err.diagnostic.message.contains("'D'"));
}

#[test]
fn loop_inside_a_map_is_rejected() {
    let err = build_with(
        &entry(
            "nested",
            r#"[{"kind": "map", "params": ["i"], "range": "0:16", "body": [
                    {"kind": "for", "var": "j", "begin": "0", "end": "4", "body": [
                        {"kind": "assign", "target": "A[i]", "value": "1.0"}]}]}]"#,
        ),
        &BuildOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.diagnostic.code, codes::E0202);
}

#[test]
fn stop_after_skips_validation() {
    let mut options = BuildOptions::default();
    options.stop_after = Some(PassId::BuildDataflow);
    let sdfg = build_with(
        &entry(
            "overflow",
            r#"[{"kind": "assign", "target": "A[16]", "value": "0.0"}]"#,
        ),
        &options,
    )
    .unwrap();
    assert_eq!(sdfg.num_states(), 1);
}

// ── Strict transformations ──────────────────────────────────────────────────

/// The empty join after an `if` without `else` has two incoming edges, so
/// nothing fuses; turning strict mode off must leave the same state count.
#[test]
fn strict_mode_does_not_merge_branch_joins() {
    let e = entry(
        "maybe",
        r#"[{"kind": "assign", "target": "A[0]", "value": "0.0"},
            {"kind": "if", "cond": "N > 4", "body": [
                {"kind": "assign", "target": "B[0]", "value": "A[0]"}]},
            {"kind": "assign", "target": "C[0]", "value": "1.0"}]"#,
    );
    let strict = build(&e);
    let mut options = BuildOptions::default();
    options.strict = Some(false);
    let relaxed = build_with(&e, &options).unwrap();
    assert_eq!(strict.num_states(), 3);
    assert_eq!(relaxed.num_states(), 3);
}
