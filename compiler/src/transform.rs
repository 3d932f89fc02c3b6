// transform.rs — Strict transformations: state fusion
//
// Two states joined by a single unconditional, assignment-free transition
// (the only edge leaving the first and the only edge entering the second)
// are fused when the data they touch does not conflict: the second state's
// dataflow graph is appended to the first and its outgoing transitions move
// over. Fusion repeats until no candidate remains.
//
// Conflicts are judged on the union of what the graphs show and what the
// dependency summaries of the states' primitives record (reads and possible
// writes).
//
// Preconditions: interstate edges reference existing states.
// Postconditions: the set of reachable executions is unchanged; no
//   candidate pair remains.
// Failure modes: none.
// Side effects: removes fused states; state ids after a removed state shift.

use std::collections::{BTreeMap, BTreeSet};

use crate::depanalysis::DepSummary;
use crate::id::StateId;
use crate::sdfg::Sdfg;

/// Dependency summary of the primitives placed in each state.
pub type StateSummaries = BTreeMap<StateId, DepSummary>;

/// Apply every strict transformation to a fixpoint; returns the number of
/// fusions performed. `summaries` is kept keyed by the surviving state ids.
pub fn apply_strict_transformations(sdfg: &mut Sdfg, summaries: &mut StateSummaries) -> usize {
    let mut fused = 0;
    while let Some(edge) = find_fusion_candidate(sdfg, summaries) {
        fuse_states(sdfg, summaries, edge);
        fused += 1;
    }
    if fused > 0 {
        log::debug!("'{}': fused {} states", sdfg.name, fused);
    }
    fused
}

/// Index of the first interstate edge whose endpoints can be fused.
pub fn find_fusion_candidate(sdfg: &Sdfg, summaries: &StateSummaries) -> Option<usize> {
    (0..sdfg.edges().len()).find(|&i| can_fuse(sdfg, summaries, i))
}

/// Containers read and possibly written by a state.
fn data_sets(sdfg: &Sdfg, summaries: &StateSummaries, id: StateId) -> (BTreeSet<String>, BTreeSet<String>) {
    let (mut reads, mut writes) = sdfg
        .state(id)
        .map(|s| s.graph.read_write_sets())
        .unwrap_or_default();
    if let Some(summary) = summaries.get(&id) {
        reads.extend(summary.reads.iter().cloned());
        writes.extend(summary.maybe_writes.iter().cloned());
    }
    (reads, writes)
}

fn can_fuse(sdfg: &Sdfg, summaries: &StateSummaries, index: usize) -> bool {
    let e = &sdfg.edges()[index];
    let (a, b) = (e.src, e.dst);
    if a == b || !e.is_unconditional() || !e.assignments.is_empty() {
        return false;
    }
    if sdfg.out_edges(a).len() != 1 || sdfg.in_edges(b).len() != 1 {
        return false;
    }
    let (Some(first), Some(second)) = (sdfg.state(a), sdfg.state(b)) else {
        return false;
    };
    if first.is_empty() || second.is_empty() {
        return true;
    }
    let (r1, w1) = data_sets(sdfg, summaries, a);
    let (r2, w2) = data_sets(sdfg, summaries, b);
    let conflict = |x: &BTreeSet<String>, y: &BTreeSet<String>| x.intersection(y).next().is_some();
    // Fusing places both graphs side by side with no ordering between them.
    !(conflict(&w1, &r2) || conflict(&w1, &w2) || conflict(&r1, &w2))
}

/// Fuse the two endpoints of edge `index` into its source.
fn fuse_states(sdfg: &mut Sdfg, summaries: &mut StateSummaries, index: usize) {
    let Some(edge) = sdfg.remove_edge(index) else {
        return;
    };
    let (a, b) = (edge.src, edge.dst);
    let graph = match sdfg.state_mut(b) {
        Some(state) => std::mem::take(&mut state.graph),
        None => return,
    };
    let (a_label, b_label) = (
        sdfg.state(a).map(|s| s.label.clone()).unwrap_or_default(),
        sdfg.state(b).map(|s| s.label.clone()).unwrap_or_default(),
    );
    if let Some(state) = sdfg.state_mut(a) {
        state.graph.absorb(graph);
    }
    for i in sdfg.out_edges(b) {
        if let Some(e) = sdfg.edge_mut(i) {
            e.src = a;
        }
    }
    let was_start = sdfg.start_state() == Some(b);
    sdfg.remove_state(b);
    let shift = |s: StateId| if s > b { StateId(s.0 - 1) } else { s };
    let a = shift(a);
    if was_start {
        sdfg.set_start_state(a);
    }

    let moved = summaries.remove(&b);
    *summaries = std::mem::take(summaries)
        .into_iter()
        .map(|(s, summary)| (shift(s), summary))
        .collect();
    if let Some(moved) = moved {
        summaries.entry(a).or_default().absorb(&moved);
    }
    log::trace!("fused state '{}' into '{}'", b_label, a_label);
}
