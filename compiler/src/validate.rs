// validate.rs — Structural validation of a constructed SDFG
//
// Checks the state machine first (edge endpoints, start state and
// reachability, guard types, label uniqueness), then every state's dataflow
// graph (scope pairing, acyclicity, descriptors, memlet shape and bounds,
// connectors). The first violation aborts.
//
// Preconditions: none; any `Sdfg` value may be validated.
// Postconditions: on success no connector is dangling and no memlet is
//   provably out of its container's bounds.
// Failure modes: E0401–E0411, all structural.
// Side effects: none.

use std::collections::BTreeSet;

use crate::data::DataDesc;
use crate::dataflow::{DataflowGraph, Edge, NodeKind};
use crate::diag::{codes, Diagnostic};
use crate::id::{EdgeId, NodeId, StateId};
use crate::sdfg::{Sdfg, State};
use crate::symbolic::{compare_const, Expr};

/// Validate `sdfg`, returning the first violation found.
pub fn validate_sdfg(sdfg: &Sdfg) -> Result<(), Diagnostic> {
    check_edges(sdfg)?;
    check_reachability(sdfg)?;
    check_guards(sdfg)?;
    check_labels(sdfg)?;
    for (_, state) in sdfg.states() {
        validate_state(sdfg, state)
            .map_err(|d| d.with_related(format!("in state '{}'", state.label)))?;
    }
    log::debug!(
        "validated '{}': {} states, {} transitions",
        sdfg.name,
        sdfg.num_states(),
        sdfg.edges().len()
    );
    Ok(())
}

// ── State machine ───────────────────────────────────────────────────────────

fn check_edges(sdfg: &Sdfg) -> Result<(), Diagnostic> {
    let n = sdfg.num_states();
    for (i, e) in sdfg.edges().iter().enumerate() {
        for end in [e.src, e.dst] {
            if end.index() >= n {
                return Err(Diagnostic::structural(
                    codes::E0407,
                    format!(
                        "interstate edge {i} references state {} but only {n} states exist",
                        end.0
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_reachability(sdfg: &Sdfg) -> Result<(), Diagnostic> {
    let start = match sdfg.start_state() {
        Some(s) if s.index() < sdfg.num_states() => s,
        Some(s) => {
            return Err(Diagnostic::structural(
                codes::E0406,
                format!("start state {} does not exist", s.0),
            ))
        }
        None => {
            return Err(Diagnostic::structural(codes::E0406, "SDFG has no start state")
                .with_hint("every SDFG needs at least one state"))
        }
    };
    let reached: BTreeSet<StateId> = sdfg.bfs_order().into_iter().collect();
    for (id, state) in sdfg.states() {
        if !reached.contains(&id) {
            return Err(Diagnostic::structural(
                codes::E0406,
                format!("state '{}' is unreachable from the start state", state.label),
            )
            .with_related(format!("start state is '{}'", label_of(sdfg, start))));
        }
    }
    Ok(())
}

fn check_guards(sdfg: &Sdfg) -> Result<(), Diagnostic> {
    for e in sdfg.edges() {
        if !e.guard.is_boolean() {
            return Err(Diagnostic::structural(
                codes::E0408,
                format!("guard '{}' is not a boolean expression", e.guard),
            )
            .with_related(format!(
                "on transition '{}' -> '{}'",
                label_of(sdfg, e.src),
                label_of(sdfg, e.dst)
            )));
        }
    }
    Ok(())
}

fn check_labels(sdfg: &Sdfg) -> Result<(), Diagnostic> {
    let mut seen = BTreeSet::new();
    for (_, state) in sdfg.states() {
        if !seen.insert(state.label.as_str()) {
            return Err(Diagnostic::structural(
                codes::E0409,
                format!("duplicate state label '{}'", state.label),
            ));
        }
    }
    Ok(())
}

fn label_of(sdfg: &Sdfg, id: StateId) -> String {
    sdfg.state(id)
        .map(|s| s.label.clone())
        .unwrap_or_else(|| format!("#{}", id.0))
}

// ── Dataflow graphs ─────────────────────────────────────────────────────────

fn validate_state(sdfg: &Sdfg, state: &State) -> Result<(), Diagnostic> {
    let g = &state.graph;
    check_endpoints(g)?;
    check_scope_pairs(g)?;
    if let Err(node) = g.topological_order() {
        return Err(Diagnostic::structural(
            codes::E0411,
            format!("dataflow cycle through node n{} ({})", node.0, node_desc(g, node)),
        ));
    }
    for node in &g.nodes {
        if let NodeKind::Access { data } = &node.kind {
            if !sdfg.arrays().contains_key(data) {
                return Err(Diagnostic::structural(
                    codes::E0401,
                    format!("access node '{data}' has no data descriptor"),
                ));
            }
        }
    }
    for id in g.edge_ids() {
        check_memlet(sdfg, g, id)?;
    }
    check_connectors(g)
}

/// Every memlet must join two nodes of its own graph; later checks index
/// nodes by these ids.
fn check_endpoints(g: &DataflowGraph) -> Result<(), Diagnostic> {
    let n = g.nodes.len();
    for (i, edge) in g.edges.iter().enumerate() {
        for end in [edge.src, edge.dst] {
            if end.index() >= n {
                return Err(Diagnostic::structural(
                    codes::E0403,
                    format!("memlet {i} references node n{} but only {n} nodes exist", end.0),
                )
                .with_related(format!("memlet carries {}", edge.memlet)));
            }
        }
    }
    Ok(())
}

fn check_scope_pairs(g: &DataflowGraph) -> Result<(), Diagnostic> {
    for id in g.node_ids() {
        let node = &g.nodes[id.index()];
        let partner = match node.kind {
            NodeKind::MapEntry { exit, .. } | NodeKind::ConsumeEntry { exit, .. } => {
                Some((exit, g.entry_of(exit)))
            }
            NodeKind::MapExit { entry } | NodeKind::ConsumeExit { entry } => {
                Some((entry, g.exit_of(entry)))
            }
            _ => None,
        };
        let Some((other, back)) = partner else {
            continue;
        };
        let same_family = matches!(
            (&node.kind, g.node(other).map(|n| &n.kind)),
            (NodeKind::MapEntry { .. }, Some(NodeKind::MapExit { .. }))
                | (NodeKind::MapExit { .. }, Some(NodeKind::MapEntry { .. }))
                | (NodeKind::ConsumeEntry { .. }, Some(NodeKind::ConsumeExit { .. }))
                | (NodeKind::ConsumeExit { .. }, Some(NodeKind::ConsumeEntry { .. }))
        );
        if !same_family || back != Some(id) {
            return Err(Diagnostic::structural(
                codes::E0410,
                format!("scope node n{} ({}) has no matching partner", id.0, node_desc(g, id)),
            ));
        }
    }
    Ok(())
}

fn check_memlet(sdfg: &Sdfg, g: &DataflowGraph, id: EdgeId) -> Result<(), Diagnostic> {
    let edge = &g.edges[id.index()];
    let memlet = &edge.memlet;
    if memlet.is_empty() {
        return Ok(());
    }
    let Some(desc) = sdfg.arrays().get(&memlet.data) else {
        return Err(Diagnostic::structural(
            codes::E0401,
            format!("memlet refers to unknown container '{}'", memlet.data),
        )
        .with_related(edge_desc(g, edge)));
    };
    if memlet.subset.ndim() != desc.shape.len() {
        return Err(Diagnostic::structural(
            codes::E0405,
            format!(
                "memlet '{}' has {} dimensions but '{}' has {}",
                memlet,
                memlet.subset.ndim(),
                memlet.data,
                desc.shape.len()
            ),
        )
        .with_related(edge_desc(g, edge)));
    }
    check_bounds(desc, edge).map_err(|d| d.with_related(edge_desc(g, edge)))
}

/// Flag a dimension only when the violation is provable.
fn check_bounds(desc: &DataDesc, edge: &Edge) -> Result<(), Diagnostic> {
    let memlet = &edge.memlet;
    for (d, (range, extent)) in memlet.subset.dims.iter().zip(&desc.shape).enumerate() {
        let below = compare_const(&range.begin, &Expr::Int(0)).is_some_and(|k| k < 0);
        let above = compare_const(&range.end, extent).is_some_and(|k| k > 0);
        if below || above {
            return Err(Diagnostic::structural(
                codes::E0404,
                format!(
                    "memlet '{}' is out of bounds in dimension {d} (extent {extent})",
                    memlet
                ),
            ));
        }
    }
    Ok(())
}

fn check_connectors(g: &DataflowGraph) -> Result<(), Diagnostic> {
    // Every endpoint either names a declared connector or is an access node
    // (or the memlet carries no data).
    for edge in &g.edges {
        let src = &g.nodes[edge.src.index()];
        let dst = &g.nodes[edge.dst.index()];
        let src_ok = match &edge.src_conn {
            Some(c) => src.out_connectors.contains(c),
            None => src.is_access() || edge.memlet.is_empty(),
        };
        let dst_ok = match &edge.dst_conn {
            Some(c) => dst.in_connectors.contains(c),
            None => dst.is_access() || edge.memlet.is_empty(),
        };
        if !src_ok || !dst_ok {
            return Err(Diagnostic::structural(
                codes::E0403,
                "memlet does not end on a declared connector or an access node",
            )
            .with_related(edge_desc(g, edge)));
        }
    }

    for id in g.node_ids() {
        let node = &g.nodes[id.index()];
        let in_count = |conn: &str| {
            g.edges
                .iter()
                .filter(|e| e.dst == id && e.dst_conn.as_deref() == Some(conn))
                .count()
        };
        let out_count = |conn: &str| {
            g.edges
                .iter()
                .filter(|e| e.src == id && e.src_conn.as_deref() == Some(conn))
                .count()
        };
        // (connector, count, fan allowed)
        let mut checks: Vec<(&str, usize, bool)> = Vec::new();
        match node.kind {
            NodeKind::Tasklet { .. } => {
                checks.extend(node.in_connectors.iter().map(|c| (c.as_str(), in_count(c), false)));
                checks.extend(node.out_connectors.iter().map(|c| (c.as_str(), out_count(c), false)));
            }
            NodeKind::MapEntry { .. } | NodeKind::ConsumeEntry { .. } => {
                checks.extend(node.in_connectors.iter().map(|c| (c.as_str(), in_count(c), false)));
                checks.extend(node.out_connectors.iter().map(|c| (c.as_str(), out_count(c), true)));
            }
            NodeKind::MapExit { .. } | NodeKind::ConsumeExit { .. } => {
                checks.extend(node.in_connectors.iter().map(|c| (c.as_str(), in_count(c), true)));
                checks.extend(node.out_connectors.iter().map(|c| (c.as_str(), out_count(c), false)));
            }
            NodeKind::Access { .. } => {}
        }
        for (conn, count, fan) in checks {
            let ok = if fan { count >= 1 } else { count == 1 };
            if !ok {
                return Err(Diagnostic::structural(
                    codes::E0402,
                    format!(
                        "connector '{conn}' of n{} ({}) has {count} memlets",
                        id.0,
                        node_desc(g, id)
                    ),
                )
                .with_hint(if fan {
                    "scope-side connectors need at least one memlet"
                } else {
                    "this connector needs exactly one memlet"
                }));
            }
        }
    }
    Ok(())
}

fn node_desc(g: &DataflowGraph, id: NodeId) -> String {
    g.node(id).map(|n| n.label()).unwrap_or_default()
}

fn edge_desc(g: &DataflowGraph, edge: &Edge) -> String {
    format!(
        "on memlet {} -> {}: {}",
        node_desc(g, edge.src),
        node_desc(g, edge.dst),
        edge.memlet
    )
}
