// dataflow.rs — Per-state dataflow graph: nodes, connectors, memlet edges
//
// Each state owns one `DataflowGraph`: access nodes, tasklets and the
// entry/exit node pairs of map and consume scopes, connected by memlet edges
// that run from an (optional) source connector to an (optional) destination
// connector. Nodes and edges live in arenas addressed by `NodeId`/`EdgeId`.
//
// Preconditions: scope entry/exit pairs are created together (`add_map`,
//   `add_consume`) so each side knows its partner.
// Postconditions: `fill_scope_connectors` names every unnamed scope-boundary
//   edge endpoint `IN_<data>`/`OUT_<data>` and declares the pair on the node.
// Failure modes: `topological_order` reports a node on a cycle.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{EdgeId, NodeId};
use crate::symbolic::{Expr, Subset};

// ── Write-conflict resolution ───────────────────────────────────────────────

/// How concurrent writes to the same element are combined.
///
/// Serialized as `sum`, `product`, `min`, `max`, or the custom lambda text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Wcr {
    Sum,
    Product,
    Min,
    Max,
    Custom(String),
}

impl From<String> for Wcr {
    fn from(text: String) -> Wcr {
        match text.as_str() {
            "sum" | "+" => Wcr::Sum,
            "product" | "*" => Wcr::Product,
            "min" => Wcr::Min,
            "max" => Wcr::Max,
            _ => Wcr::Custom(text),
        }
    }
}

impl From<Wcr> for String {
    fn from(w: Wcr) -> String {
        w.to_string()
    }
}

impl fmt::Display for Wcr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wcr::Sum => write!(f, "sum"),
            Wcr::Product => write!(f, "product"),
            Wcr::Min => write!(f, "min"),
            Wcr::Max => write!(f, "max"),
            Wcr::Custom(code) => write!(f, "{code}"),
        }
    }
}

// ── Memlets ─────────────────────────────────────────────────────────────────

/// A data movement: which elements of which container travel along an edge.
///
/// An empty memlet (no container) only expresses scope membership or
/// ordering and carries no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memlet {
    pub data: String,
    pub subset: Subset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wcr: Option<Wcr>,
    pub volume: Expr,
    #[serde(default)]
    pub dynamic: bool,
}

impl Memlet {
    /// A memlet moving `subset` of `data`; volume is the subset size.
    pub fn new(data: impl Into<String>, subset: Subset) -> Memlet {
        let volume = subset.num_elements();
        Memlet {
            data: data.into(),
            subset,
            wcr: None,
            volume,
            dynamic: false,
        }
    }

    pub fn empty() -> Memlet {
        Memlet {
            data: String::new(),
            subset: Subset::new(Vec::new()),
            wcr: None,
            volume: Expr::Int(0),
            dynamic: false,
        }
    }

    pub fn with_wcr(mut self, wcr: Option<Wcr>) -> Memlet {
        self.wcr = wcr;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for Memlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "()");
        }
        write!(f, "{}[{}]", self.data, self.subset)?;
        if let Some(wcr) = &self.wcr {
            write!(f, " (CR: {wcr})")?;
        }
        if self.dynamic {
            write!(f, " (dyn)")?;
        }
        Ok(())
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Access {
        data: String,
    },
    Tasklet {
        label: String,
        code: String,
    },
    MapEntry {
        label: String,
        params: Vec<String>,
        range: Subset,
        exit: NodeId,
    },
    MapExit {
        entry: NodeId,
    },
    ConsumeEntry {
        label: String,
        stream: String,
        pe: String,
        num_pes: Expr,
        exit: NodeId,
    },
    ConsumeExit {
        entry: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub in_connectors: BTreeSet<String>,
    #[serde(default)]
    pub out_connectors: BTreeSet<String>,
}

impl Node {
    fn new(kind: NodeKind) -> Node {
        Node {
            kind,
            in_connectors: BTreeSet::new(),
            out_connectors: BTreeSet::new(),
        }
    }

    pub fn is_access(&self) -> bool {
        matches!(self.kind, NodeKind::Access { .. })
    }

    pub fn is_scope_entry(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::MapEntry { .. } | NodeKind::ConsumeEntry { .. }
        )
    }

    pub fn is_scope_exit(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::MapExit { .. } | NodeKind::ConsumeExit { .. }
        )
    }

    /// Container name of an access node.
    pub fn data(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Access { data } => Some(data),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> String {
        match &self.kind {
            NodeKind::Access { data } => data.clone(),
            NodeKind::Tasklet { label, .. } => label.clone(),
            NodeKind::MapEntry { label, .. } => format!("{label}[entry]"),
            NodeKind::ConsumeEntry { label, .. } => format!("{label}[entry]"),
            NodeKind::MapExit { entry } | NodeKind::ConsumeExit { entry } => {
                format!("exit({})", entry.0)
            }
        }
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    #[serde(default)]
    pub src_conn: Option<String>,
    pub dst: NodeId,
    #[serde(default)]
    pub dst_conn: Option<String>,
    pub memlet: Memlet,
}

// ── Graph ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataflowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl DataflowGraph {
    pub fn new() -> DataflowGraph {
        DataflowGraph::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn add_access(&mut self, data: impl Into<String>) -> NodeId {
        self.push(Node::new(NodeKind::Access { data: data.into() }))
    }

    pub fn add_tasklet(
        &mut self,
        label: impl Into<String>,
        inputs: impl IntoIterator<Item = String>,
        outputs: impl IntoIterator<Item = String>,
        code: impl Into<String>,
    ) -> NodeId {
        let mut node = Node::new(NodeKind::Tasklet {
            label: label.into(),
            code: code.into(),
        });
        node.in_connectors.extend(inputs);
        node.out_connectors.extend(outputs);
        self.push(node)
    }

    /// Add a map entry/exit pair.
    pub fn add_map(
        &mut self,
        label: impl Into<String>,
        params: Vec<String>,
        range: Subset,
    ) -> (NodeId, NodeId) {
        let entry = NodeId(self.nodes.len() as u32);
        let exit = NodeId(entry.0 + 1);
        self.push(Node::new(NodeKind::MapEntry {
            label: label.into(),
            params,
            range,
            exit,
        }));
        self.push(Node::new(NodeKind::MapExit { entry }));
        (entry, exit)
    }

    /// Add a consume entry/exit pair.
    pub fn add_consume(
        &mut self,
        label: impl Into<String>,
        stream: impl Into<String>,
        pe: impl Into<String>,
        num_pes: Expr,
    ) -> (NodeId, NodeId) {
        let entry = NodeId(self.nodes.len() as u32);
        let exit = NodeId(entry.0 + 1);
        self.push(Node::new(NodeKind::ConsumeEntry {
            label: label.into(),
            stream: stream.into(),
            pe: pe.into(),
            num_pes,
            exit,
        }));
        self.push(Node::new(NodeKind::ConsumeExit { entry }));
        (entry, exit)
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_conn: Option<String>,
        dst: NodeId,
        dst_conn: Option<String>,
        memlet: Memlet,
    ) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            src,
            src_conn,
            dst,
            dst_conn,
            memlet,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edges.len() as u32).map(EdgeId)
    }

    pub fn in_edges(&self, id: NodeId) -> Vec<EdgeId> {
        self.edge_ids()
            .filter(|e| self.edges[e.index()].dst == id)
            .collect()
    }

    pub fn out_edges(&self, id: NodeId) -> Vec<EdgeId> {
        self.edge_ids()
            .filter(|e| self.edges[e.index()].src == id)
            .collect()
    }

    pub fn tasklet_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Tasklet { .. }))
            .count()
    }

    /// Access nodes of `data`, in creation order.
    pub fn access_nodes_of<'a>(&'a self, data: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.node_ids()
            .filter(move |id| self.nodes[id.index()].data() == Some(data))
    }

    /// The exit paired with a scope entry.
    pub fn exit_of(&self, entry: NodeId) -> Option<NodeId> {
        match self.node(entry).map(|n| &n.kind) {
            Some(NodeKind::MapEntry { exit, .. }) | Some(NodeKind::ConsumeEntry { exit, .. }) => {
                Some(*exit)
            }
            _ => None,
        }
    }

    /// The entry paired with a scope exit.
    pub fn entry_of(&self, exit: NodeId) -> Option<NodeId> {
        match self.node(exit).map(|n| &n.kind) {
            Some(NodeKind::MapExit { entry }) | Some(NodeKind::ConsumeExit { entry }) => {
                Some(*entry)
            }
            _ => None,
        }
    }

    /// Containers read (access nodes with outgoing data) and written
    /// (access nodes with incoming data) at the top level of this graph.
    pub fn read_write_sets(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut reads = BTreeSet::new();
        let mut writes = BTreeSet::new();
        for edge in &self.edges {
            if edge.memlet.is_empty() {
                continue;
            }
            if let Some(data) = self.nodes[edge.src.index()].data() {
                reads.insert(data.to_string());
            }
            if let Some(data) = self.nodes[edge.dst.index()].data() {
                writes.insert(data.to_string());
            }
        }
        (reads, writes)
    }

    // ── Ordering ──

    /// Kahn topological order. `Err(node)` names a node on a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, NodeId> {
        let mut indegree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            indegree[edge.dst.index()] += 1;
        }
        let mut queue: VecDeque<NodeId> = self
            .node_ids()
            .filter(|id| indegree[id.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for edge in &self.edges {
                if edge.src == id {
                    let d = &mut indegree[edge.dst.index()];
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.dst);
                    }
                }
            }
        }
        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let stuck = self
                .node_ids()
                .find(|id| indegree[id.index()] > 0)
                .unwrap_or(NodeId(0));
            Err(stuck)
        }
    }

    /// Innermost enclosing scope entry of every node (`None` = top level).
    /// A scope exit belongs to the scope enclosing its entry.
    pub fn scope_dict(&self) -> Result<BTreeMap<NodeId, Option<NodeId>>, NodeId> {
        let order = self.topological_order()?;
        let mut scope: BTreeMap<NodeId, Option<NodeId>> = BTreeMap::new();
        for id in order {
            let parent = if let Some(entry) = self.entry_of(id) {
                scope.get(&entry).copied().flatten()
            } else {
                match self.in_edges(id).first() {
                    None => None,
                    Some(&e) => {
                        let pred = self.edges[e.index()].src;
                        let pred_node = &self.nodes[pred.index()];
                        if pred_node.is_scope_entry() {
                            Some(pred)
                        } else if pred_node.is_scope_exit() {
                            self.entry_of(pred)
                                .and_then(|entry| scope.get(&entry).copied().flatten())
                        } else {
                            scope.get(&pred).copied().flatten()
                        }
                    }
                }
            };
            scope.insert(id, parent);
        }
        Ok(scope)
    }

    /// Scope entries ordered innermost first (deepest nesting first, then
    /// by id for determinism).
    pub fn scopes_innermost_first(&self) -> Result<Vec<NodeId>, NodeId> {
        let scope = self.scope_dict()?;
        let depth = |mut id: NodeId| {
            let mut d = 0usize;
            while let Some(Some(parent)) = scope.get(&id) {
                d += 1;
                id = *parent;
            }
            d
        };
        let mut entries: Vec<NodeId> = self
            .node_ids()
            .filter(|id| self.nodes[id.index()].is_scope_entry())
            .collect();
        entries.sort_by_key(|&id| (std::cmp::Reverse(depth(id)), id));
        Ok(entries)
    }

    // ── Connectors ──

    /// Name every unnamed, non-empty edge endpoint on a scope node after the
    /// container it carries (`IN_A` into a scope node, `OUT_A` out of it) and
    /// declare the connectors so each `IN_x` has a matching `OUT_x`.
    pub fn fill_scope_connectors(&mut self) {
        for idx in 0..self.edges.len() {
            let (src, dst, data) = {
                let e = &self.edges[idx];
                (e.src, e.dst, e.memlet.data.clone())
            };
            if data.is_empty() {
                continue;
            }
            let src_scope = {
                let n = &self.nodes[src.index()];
                n.is_scope_entry() || n.is_scope_exit()
            };
            if src_scope && self.edges[idx].src_conn.is_none() {
                self.edges[idx].src_conn = Some(format!("OUT_{data}"));
            }
            let dst_scope = {
                let n = &self.nodes[dst.index()];
                n.is_scope_entry() || n.is_scope_exit()
            };
            if dst_scope && self.edges[idx].dst_conn.is_none() {
                self.edges[idx].dst_conn = Some(format!("IN_{data}"));
            }
        }

        for edge in &self.edges {
            if let Some(conn) = &edge.src_conn {
                self.nodes[edge.src.index()].out_connectors.insert(conn.clone());
            }
            if let Some(conn) = &edge.dst_conn {
                self.nodes[edge.dst.index()].in_connectors.insert(conn.clone());
            }
        }

        for node in &mut self.nodes {
            if !(node.is_scope_entry() || node.is_scope_exit()) {
                continue;
            }
            let ins: Vec<String> = node
                .in_connectors
                .iter()
                .filter_map(|c| c.strip_prefix("IN_").map(|s| format!("OUT_{s}")))
                .collect();
            let outs: Vec<String> = node
                .out_connectors
                .iter()
                .filter_map(|c| c.strip_prefix("OUT_").map(|s| format!("IN_{s}")))
                .collect();
            node.out_connectors.extend(ins);
            node.in_connectors.extend(outs);
        }
    }

    /// Append every node and edge of `other`; returns the id offset applied.
    pub fn absorb(&mut self, other: DataflowGraph) -> u32 {
        let offset = self.nodes.len() as u32;
        let shift = |id: NodeId| NodeId(id.0 + offset);
        for mut node in other.nodes {
            match &mut node.kind {
                NodeKind::MapEntry { exit, .. } | NodeKind::ConsumeEntry { exit, .. } => {
                    *exit = shift(*exit)
                }
                NodeKind::MapExit { entry } | NodeKind::ConsumeExit { entry } => {
                    *entry = shift(*entry)
                }
                _ => {}
            }
            self.nodes.push(node);
        }
        for mut edge in other.edges {
            edge.src = shift(edge.src);
            edge.dst = shift(edge.dst);
            self.edges.push(edge);
        }
        offset
    }
}

impl fmt::Display for DataflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            let kind = match &node.kind {
                NodeKind::Access { .. } => "access",
                NodeKind::Tasklet { .. } => "tasklet",
                NodeKind::MapEntry { .. } => "map_entry",
                NodeKind::MapExit { .. } => "map_exit",
                NodeKind::ConsumeEntry { .. } => "consume_entry",
                NodeKind::ConsumeExit { .. } => "consume_exit",
            };
            write!(f, "    n{i}: {kind} {}", node.label())?;
            if let NodeKind::MapEntry { params, range, .. } = &node.kind {
                write!(f, " [{} = {}]", params.join(", "), range)?;
            }
            writeln!(f)?;
        }
        for edge in &self.edges {
            writeln!(
                f,
                "    n{}{} -> n{}{}: {}",
                edge.src.0,
                edge.src_conn.as_deref().map(|c| format!(".{c}")).unwrap_or_default(),
                edge.dst.0,
                edge.dst_conn.as_deref().map(|c| format!(".{c}")).unwrap_or_default(),
                edge.memlet
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::Range;

    fn idx(name: &str) -> Subset {
        Subset::new(vec![Range::index(Expr::sym(name))])
    }

    /// A[i] -> map[i] -> tasklet -> map exit -> B[i]
    fn mapped_copy() -> (DataflowGraph, NodeId, NodeId, NodeId) {
        let mut g = DataflowGraph::new();
        let a = g.add_access("A");
        let (entry, exit) = g.add_map(
            "copy",
            vec!["i".into()],
            Subset::new(vec![Range::full(Expr::sym("N"))]),
        );
        let t = g.add_tasklet("t", ["__in_A".to_string()], ["__out".to_string()], "__out = __in_A");
        let b = g.add_access("B");
        g.add_edge(a, None, entry, None, Memlet::new("A", Subset::full(&[Expr::sym("N")])));
        g.add_edge(entry, None, t, Some("__in_A".into()), Memlet::new("A", idx("i")));
        g.add_edge(t, Some("__out".into()), exit, None, Memlet::new("B", idx("i")));
        g.add_edge(exit, None, b, None, Memlet::new("B", Subset::full(&[Expr::sym("N")])));
        (g, entry, t, exit)
    }

    #[test]
    fn scope_dict_nests_tasklet_in_map() {
        let (g, entry, t, exit) = mapped_copy();
        let scope = g.scope_dict().unwrap();
        assert_eq!(scope[&t], Some(entry));
        assert_eq!(scope[&entry], None);
        assert_eq!(scope[&exit], None);
        assert_eq!(scope[&NodeId(4)], None);
    }

    #[test]
    fn fill_scope_connectors_pairs_in_and_out() {
        let (mut g, entry, _, exit) = mapped_copy();
        g.fill_scope_connectors();
        let entry_node = g.node(entry).unwrap();
        assert!(entry_node.in_connectors.contains("IN_A"));
        assert!(entry_node.out_connectors.contains("OUT_A"));
        let exit_node = g.node(exit).unwrap();
        assert!(exit_node.in_connectors.contains("IN_B"));
        assert!(exit_node.out_connectors.contains("OUT_B"));
        assert_eq!(g.edges[0].dst_conn.as_deref(), Some("IN_A"));
        assert_eq!(g.edges[1].src_conn.as_deref(), Some("OUT_A"));
    }

    #[test]
    fn topological_order_detects_cycles() {
        let mut g = DataflowGraph::new();
        let a = g.add_access("A");
        let b = g.add_access("B");
        g.add_edge(a, None, b, None, Memlet::empty());
        assert!(g.topological_order().is_ok());
        g.add_edge(b, None, a, None, Memlet::empty());
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn absorb_shifts_scope_links() {
        let (g1, ..) = mapped_copy();
        let (g2, ..) = mapped_copy();
        let mut merged = g1.clone();
        let offset = merged.absorb(g2);
        assert_eq!(offset, 5);
        assert_eq!(merged.exit_of(NodeId(6)), Some(NodeId(7)));
        assert_eq!(merged.edges[4].src, NodeId(5));
    }

    #[test]
    fn wcr_text_forms() {
        assert_eq!(Wcr::from("sum".to_string()), Wcr::Sum);
        assert_eq!(
            Wcr::from("lambda a, b: a + b".to_string()),
            Wcr::Custom("lambda a, b: a + b".into())
        );
        let m = Memlet::new("B", idx("i")).with_wcr(Some(Wcr::Max));
        assert_eq!(m.to_string(), "B[i] (CR: max)");
    }
}
