// propagate.rs — Memlet propagation across map and consume scopes
//
// The builder leaves full-container placeholders on the outer side of every
// scope. This pass replaces them, innermost scope first, with the union of
// the inner memlets over every value of the scope's parameters.
//
// Preconditions: every state graph is acyclic (otherwise that state is
//   skipped and left for the validator to reject).
// Postconditions: outer memlets of map scopes cover exactly the elements the
//   body can touch when every index is affine with an integer coefficient;
//   otherwise they over-approximate with the container's declared bounds.
//   Consume scopes yield dynamic full-range memlets.
// Failure modes: none; imprecision falls back to full bounds.
// Side effects: rewrites memlets in place.

use std::collections::BTreeMap;

use crate::data::DataDesc;
use crate::dataflow::{DataflowGraph, Memlet, NodeKind};
use crate::id::{EdgeId, NodeId};
use crate::sdfg::Sdfg;
use crate::symbolic::{gcd, Expr, Range, Subset};

/// Propagate memlets in every state of `sdfg`.
pub fn propagate_sdfg(sdfg: &mut Sdfg) {
    let arrays = sdfg.arrays().clone();
    let ids: Vec<_> = sdfg.state_ids().collect();
    for id in ids {
        if let Some(state) = sdfg.state_mut(id) {
            if let Err(node) = propagate_graph(&mut state.graph, &arrays) {
                log::warn!(
                    "state '{}': dataflow cycle through n{}, memlets left unpropagated",
                    state.label,
                    node.0
                );
            }
        }
    }
}

/// Propagate memlets of one dataflow graph. `Err(node)` names a node on a
/// cycle; nothing is rewritten in that case.
pub fn propagate_graph(
    graph: &mut DataflowGraph,
    arrays: &BTreeMap<String, DataDesc>,
) -> Result<(), NodeId> {
    for entry in graph.scopes_innermost_first()? {
        let Some(exit) = graph.exit_of(entry) else {
            continue;
        };
        let scope = match &graph.nodes[entry.index()].kind {
            NodeKind::MapEntry { params, range, .. } => Scope::Map {
                params: params.clone(),
                range: range.clone(),
            },
            NodeKind::ConsumeEntry { .. } => Scope::Consume,
            _ => continue,
        };

        // Reads: outer edges into the entry, inner edges out of it.
        for outer in graph.in_edges(entry) {
            let inner = graph.out_edges(entry);
            propagate_edge(graph, arrays, &scope, outer, &inner);
        }
        // Writes: outer edges out of the exit, inner edges into it.
        for outer in graph.out_edges(exit) {
            let inner = graph.in_edges(exit);
            propagate_edge(graph, arrays, &scope, outer, &inner);
        }
    }
    Ok(())
}

enum Scope {
    Map { params: Vec<String>, range: Subset },
    Consume,
}

fn propagate_edge(
    graph: &mut DataflowGraph,
    arrays: &BTreeMap<String, DataDesc>,
    scope: &Scope,
    outer: EdgeId,
    inner: &[EdgeId],
) {
    let data = graph.edges[outer.index()].memlet.data.clone();
    if data.is_empty() {
        return;
    }
    let Some(desc) = arrays.get(&data) else {
        return;
    };
    let inner: Vec<&Memlet> = inner
        .iter()
        .map(|e| &graph.edges[e.index()].memlet)
        .filter(|m| m.data == data)
        .collect();
    if inner.is_empty() {
        return;
    }

    let wcr = inner.iter().find_map(|m| m.wcr.clone());
    let dynamic = inner.iter().any(|m| m.dynamic);
    let volume = inner
        .iter()
        .map(|m| m.volume.clone())
        .reduce(Expr::add)
        .unwrap_or(Expr::Int(0));

    let memlet = match scope {
        Scope::Map { params, range } => {
            let subsets: Vec<Subset> = inner
                .iter()
                .map(|m| propagate_subset(&m.subset, params, range, desc))
                .collect();
            let subset = union_or_full(&subsets, desc);
            Memlet {
                data: data.clone(),
                subset,
                wcr,
                volume: Expr::mul(volume, range.num_elements()).simplify(),
                dynamic,
            }
        }
        Scope::Consume => {
            let mut m = Memlet::new(data.clone(), desc.full_subset()).with_wcr(wcr);
            m.dynamic = true;
            m
        }
    };
    log::trace!("propagated {} -> {}", data, memlet);
    graph.edges[outer.index()].memlet = memlet;
}

fn union_or_full(subsets: &[Subset], desc: &DataDesc) -> Subset {
    let mut iter = subsets.iter();
    let Some(first) = iter.next() else {
        return desc.full_subset();
    };
    iter.try_fold(first.clone(), |acc, s| acc.union(s))
        .map(|s| s.simplify())
        .unwrap_or_else(|| desc.full_subset())
}

// ── Per-subset propagation ──────────────────────────────────────────────────

/// The image of `inner` over every value of the map parameters `params`
/// ranging over `range` (one dimension per parameter).
pub fn propagate_subset(
    inner: &Subset,
    params: &[String],
    range: &Subset,
    desc: &DataDesc,
) -> Subset {
    if inner.ndim() != desc.shape.len() {
        log::warn!(
            "memlet '{}' does not match a {}-dimensional container, using full bounds",
            inner,
            desc.shape.len()
        );
        return desc.full_subset();
    }
    let mut dims = inner.dims.clone();
    for (param, prange) in params.iter().zip(&range.dims) {
        for (d, r) in dims.iter_mut().enumerate() {
            *r = match propagate_range(r, param, prange) {
                Some(propagated) => propagated,
                None => {
                    log::warn!(
                        "index '{}' is not affine in '{}', using full bounds",
                        r,
                        param
                    );
                    Range::full(desc.shape[d].clone())
                }
            };
        }
    }
    Subset::new(dims).simplify()
}

/// Sweep one range over one parameter. `None` when the bounds are not
/// affine in the parameter with an integer coefficient.
fn propagate_range(r: &Range, param: &str, prange: &Range) -> Option<Range> {
    let mentions = |e: &Expr| e.free_names().contains(param);
    if !mentions(&r.begin) && !mentions(&r.end) {
        return Some(r.clone());
    }
    if mentions(&r.step) {
        return None;
    }
    let (cb, rb) = r.begin.affine_in(param)?;
    let (ce, re) = r.end.affine_in(param)?;

    // Extreme parameter values; a step of unknown sign leaves them undecided.
    let first = prange.begin.clone();
    let last = Expr::add(
        prange.begin.clone(),
        Expr::mul(
            Expr::sub(prange.num_elements(), Expr::Int(1)),
            prange.step.clone(),
        ),
    )
    .simplify();
    let (lo, hi) = match prange.step_sign()? {
        s if s > 0 => (first, last),
        s if s < 0 => (last, first),
        _ => return None,
    };
    let at = |c: i64, rest: Expr, p: &Expr| Expr::add(Expr::mul(Expr::Int(c), p.clone()), rest);

    let begin = if cb >= 0 { at(cb, rb, &lo) } else { at(cb, rb, &hi) };
    let end = if ce >= 0 { at(ce, re, &hi) } else { at(ce, re, &lo) };
    // Shifted copies of a strided range only line up on a common stride.
    let sweep = prange.step.as_int().map(|s| cb.abs() * s.abs());
    let step = match (r.is_index(), sweep) {
        (true, Some(s)) if s > 0 => Expr::Int(s),
        (true, _) => Expr::Int(1),
        (false, _) if cb == 0 => r.step.clone(),
        (false, Some(s)) => match r.step.as_int() {
            Some(rs) if rs > 0 => Expr::Int(gcd(rs, s)),
            _ => Expr::Int(1),
        },
        (false, None) => Expr::Int(1),
    };
    Some(Range::new(begin, end, step).simplify())
}
