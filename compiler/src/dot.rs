// dot.rs — Graphviz DOT output for SDFGs
//
// Transforms an Sdfg into DOT format: one cluster per state holding its
// dataflow graph, plus interstate transitions drawn between clusters.
//
// Preconditions: none; partially built SDFGs render too.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::dataflow::{DataflowGraph, NodeKind};
use crate::id::StateId;
use crate::sdfg::{InterstateEdge, Sdfg};

/// Emit the SDFG as a Graphviz DOT string.
pub fn emit_dot(sdfg: &Sdfg) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph \"{}\" {{", escape(&sdfg.name)).unwrap();
    writeln!(buf, "    compound=true;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for (id, state) in sdfg.states() {
        let cluster = cluster_name(id);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph {cluster} {{").unwrap();
        writeln!(buf, "        label=\"state: {}\";", escape(&state.label)).unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        if sdfg.start_state() == Some(id) {
            writeln!(buf, "        color=black;").unwrap();
            writeln!(buf, "        penwidth=2;").unwrap();
        } else {
            writeln!(buf, "        color=gray50;").unwrap();
        }
        // Anchor for interstate edges; empty states need a node to exist.
        writeln!(buf, "        {} [shape=point, style=invis];", anchor(id)).unwrap();
        write_graph_contents(&mut buf, id, &state.graph, "        ");
        writeln!(buf, "    }}").unwrap();
    }

    if !sdfg.edges().is_empty() {
        writeln!(buf).unwrap();
        writeln!(buf, "    // Interstate edges").unwrap();
        for edge in sdfg.edges() {
            write_interstate_edge(&mut buf, edge);
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn cluster_name(id: StateId) -> String {
    format!("cluster_s{}", id.0)
}

fn anchor(id: StateId) -> String {
    format!("s{}_anchor", id.0)
}

/// DOT node ID: `s<state>_n<node>`.
fn dot_node_id(state: StateId, node: u32) -> String {
    format!("s{}_n{node}", state.0)
}

/// Escape text for use inside a quoted DOT string.
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn node_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Access { data } => data.clone(),
        NodeKind::Tasklet { label, code } => format!("{label}\\n{}", escape(code)),
        NodeKind::MapEntry {
            label,
            params,
            range,
            ..
        } => format!("{label}[{} = {range}]", params.join(", ")),
        NodeKind::MapExit { .. } => "map exit".to_string(),
        NodeKind::ConsumeEntry {
            label,
            stream,
            pe,
            num_pes,
            ..
        } => format!("{label}[{pe} = 0:{num_pes}] <- {stream}"),
        NodeKind::ConsumeExit { .. } => "consume exit".to_string(),
    }
}

/// Return DOT attributes string for a node kind.
fn node_attrs(kind: &NodeKind) -> String {
    let (shape, color) = match kind {
        NodeKind::Access { .. } => ("ellipse", "white"),
        NodeKind::Tasklet { .. } => ("octagon", "lightblue"),
        NodeKind::MapEntry { .. } => ("trapezium", "lightyellow"),
        NodeKind::MapExit { .. } => ("invtrapezium", "lightyellow"),
        NodeKind::ConsumeEntry { .. } => ("trapezium", "lightgreen"),
        NodeKind::ConsumeExit { .. } => ("invtrapezium", "lightgreen"),
    };
    let label = node_label(kind);
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

/// Write all nodes and memlet edges of one state's dataflow graph.
fn write_graph_contents(buf: &mut String, state: StateId, graph: &DataflowGraph, indent: &str) {
    for (i, node) in graph.nodes.iter().enumerate() {
        let id = dot_node_id(state, i as u32);
        writeln!(buf, "{indent}{id} [{}];", node_attrs(&node.kind)).unwrap();
    }
    if graph.edges.is_empty() {
        return;
    }
    writeln!(buf).unwrap();
    for edge in &graph.edges {
        let src = dot_node_id(state, edge.src.0);
        let dst = dot_node_id(state, edge.dst.0);
        if edge.memlet.is_empty() {
            writeln!(buf, "{indent}{src} -> {dst} [style=dotted, arrowhead=none];").unwrap();
            continue;
        }
        let mut attrs = format!("label=\"{}\"", escape(&edge.memlet.to_string()));
        if let Some(conn) = &edge.src_conn {
            write!(attrs, ", taillabel=\"{}\"", escape(conn)).unwrap();
        }
        if let Some(conn) = &edge.dst_conn {
            write!(attrs, ", headlabel=\"{}\"", escape(conn)).unwrap();
        }
        if edge.memlet.wcr.is_some() {
            attrs.push_str(", color=red");
        }
        writeln!(buf, "{indent}{src} -> {dst} [{attrs}];").unwrap();
    }
}

/// Unconditional transitions are solid; guarded ones dashed; back-edges
/// (to an earlier state) bold blue.
fn write_interstate_edge(buf: &mut String, edge: &InterstateEdge) {
    let mut attrs = format!(
        "ltail={}, lhead={}, label=\"{}\"",
        cluster_name(edge.src),
        cluster_name(edge.dst),
        escape(&edge.to_string())
    );
    if edge.dst <= edge.src {
        attrs.push_str(", style=bold, color=blue, constraint=false");
    } else if !edge.is_unconditional() {
        attrs.push_str(", style=dashed");
    }
    writeln!(buf, "    {} -> {} [{attrs}];", anchor(edge.src), anchor(edge.dst)).unwrap();
}
