// builder.rs — Build each state's dataflow graph from its primitives
//
// Assignments and tasklets become tasklet nodes wired to access nodes by
// memlets; maps and consumes become entry/exit pairs around their bodies.
// Data crossing a scope boundary is routed through the enclosing entry and
// exit nodes; outer memlets start as full-container placeholders and are
// tightened later by propagation.
//
// Access-node sharing at the top level of a state: a read reuses the most
// recent access node of its container; a write reuses it only if nothing
// has read it since, otherwise it creates a fresh node. Inside a scope,
// writes go to the exit; a later read of the same container in that body
// pulls those writes through an inner access node instead of the entry.
//
// Preconditions: the SDFG's descriptors and symbols are registered.
// Postconditions: the state's graph is acyclic; every tasklet connector is
//   the endpoint of exactly one memlet.
// Failure modes: unknown container → E0301; consume over a non-stream →
//   E0302; loops or branches inside a scope → E0202.
// Side effects: replaces the dataflow graph of the target state only.

use std::collections::{BTreeMap, BTreeSet};

use crate::data::{DType, DataDesc};
use crate::dataflow::{DataflowGraph, Memlet, Wcr};
use crate::diag::{codes, Diagnostic};
use crate::id::{EdgeId, NodeId, PrimId, StateId};
use crate::pdp::{Access, Pdp, PrimKind};
use crate::program::ModuleAliases;
use crate::sdfg::Sdfg;
use crate::symbolic::{Expr, Range, Subset};

/// Build the dataflow graph of `state` from `prims`.
pub fn build_dataflow_graph(
    sdfg: &mut Sdfg,
    state: StateId,
    prims: &[PrimId],
    pdp: &Pdp,
    modules: &ModuleAliases,
) -> Result<(), Diagnostic> {
    let label = sdfg
        .state(state)
        .map(|s| s.label.clone())
        .ok_or_else(|| {
            Diagnostic::structural(codes::E0202, format!("state {} does not exist", state.0))
        })?;

    let mut builder = GraphBuilder {
        arrays: sdfg.arrays(),
        symbols: sdfg.symbols(),
        pdp,
        modules,
        graph: DataflowGraph::new(),
        frames: Vec::new(),
        top: BTreeMap::new(),
    };
    for &id in prims {
        builder
            .build_prim(id)
            .map_err(|d| d.with_related(format!("in state '{label}'")))?;
    }
    let graph = builder.graph;
    log::debug!(
        "state '{}': {} nodes, {} memlets",
        label,
        graph.nodes.len(),
        graph.edges.len()
    );

    if let Some(s) = sdfg.state_mut(state) {
        s.graph = graph;
    }
    Ok(())
}

// ── Builder state ───────────────────────────────────────────────────────────

/// Most recent top-level access node of a container.
struct TopAccess {
    node: NodeId,
    read_since_write: bool,
}

/// A container written inside a scope body.
#[derive(Default)]
struct InnerWrite {
    /// Access node holding the written value once something reads it.
    node: Option<NodeId>,
    /// Writes still wired straight to the exit.
    pending: Vec<EdgeId>,
    read_since_write: bool,
}

/// An open map or consume scope.
struct Frame {
    entry: NodeId,
    exit: NodeId,
    bound: Vec<String>,
    /// Containers already routed in through the entry.
    reads: BTreeSet<String>,
    /// Containers leaving through the exit, in first-write order.
    writes: Vec<(String, Option<Wcr>)>,
    inner: BTreeMap<String, InnerWrite>,
}

struct GraphBuilder<'a> {
    arrays: &'a BTreeMap<String, DataDesc>,
    symbols: &'a BTreeMap<String, DType>,
    pdp: &'a Pdp,
    modules: &'a ModuleAliases,
    graph: DataflowGraph,
    frames: Vec<Frame>,
    top: BTreeMap<String, TopAccess>,
}

/// One container read by a tasklet, with every subset it touches.
struct Operand {
    data: String,
    conn: String,
    subsets: Vec<Subset>,
}

impl GraphBuilder<'_> {
    fn build_prim(&mut self, id: PrimId) -> Result<(), Diagnostic> {
        let pdp = self.pdp;
        let prim = pdp.get(id).ok_or_else(|| {
            Diagnostic::structural(codes::E0202, format!("primitive {} does not exist", id.0))
        })?;
        match &prim.kind {
            PrimKind::Assign { target, value, wcr } => {
                self.build_assign(&prim.label, target, value, wcr.clone())
            }
            PrimKind::Tasklet {
                inputs,
                outputs,
                code,
            } => {
                let mut reads = Vec::new();
                for port in inputs {
                    let subset = self.resolve_access(&port.access)?;
                    reads.push((port.conn.clone(), port.access.data.clone(), subset));
                }
                let mut writes = Vec::new();
                for port in outputs {
                    let subset = self.resolve_access(&port.access)?;
                    writes.push((
                        port.conn.clone(),
                        port.access.data.clone(),
                        subset,
                        port.wcr.clone(),
                    ));
                }
                let tasklet = self.graph.add_tasklet(
                    prim.label.clone(),
                    reads.iter().map(|(c, ..)| c.clone()),
                    writes.iter().map(|(c, ..)| c.clone()),
                    code.clone(),
                );
                for (conn, data, subset) in reads {
                    let (src, src_conn) = self.read_source(self.frames.len(), &data);
                    self.graph
                        .add_edge(src, src_conn, tasklet, Some(conn), Memlet::new(data, subset));
                }
                self.attach_to_scope(tasklet, !inputs.is_empty(), !outputs.is_empty());
                for (conn, data, subset, wcr) in writes {
                    self.emit_write(tasklet, Some(conn), Memlet::new(data, subset).with_wcr(wcr));
                }
                Ok(())
            }
            PrimKind::Map { params, range } => {
                for name in range.free_names() {
                    self.check_symbol(&name)?;
                }
                let (entry, exit) =
                    self.graph
                        .add_map(prim.label.clone(), params.clone(), range.clone());
                self.open_scope(entry, exit, params.clone());
                for &child in &prim.children {
                    self.build_prim(child)?;
                }
                self.close_scope();
                Ok(())
            }
            PrimKind::Consume {
                stream,
                pe,
                num_pes,
            } => {
                let desc = self.container(stream)?;
                if !desc.is_stream() {
                    return Err(Diagnostic::usage(
                        codes::E0302,
                        format!("consume '{}' reads '{}', which is not a stream", prim.label, stream),
                    )
                    .with_related(format!("'{stream}' is declared as {desc}")));
                }
                for name in num_pes.free_names() {
                    self.check_symbol(&name)?;
                }
                let (entry, exit) = self.graph.add_consume(
                    prim.label.clone(),
                    stream.clone(),
                    pe.clone(),
                    num_pes.clone(),
                );
                self.open_scope(entry, exit, vec![pe.clone()]);
                for &child in &prim.children {
                    self.build_prim(child)?;
                }
                self.close_scope();
                Ok(())
            }
            PrimKind::Call { .. } => {
                for &child in &prim.children {
                    self.build_prim(child)?;
                }
                Ok(())
            }
            PrimKind::For { .. } | PrimKind::While { .. } | PrimKind::If { .. } => {
                Err(Diagnostic::structural(
                    codes::E0202,
                    format!(
                        "{} '{}' cannot appear inside a dataflow scope",
                        prim.kind.name(),
                        prim.label
                    ),
                ))
            }
        }
    }

    // ── Assignments ──

    fn build_assign(
        &mut self,
        label: &str,
        target: &Access,
        value: &Expr,
        wcr: Option<Wcr>,
    ) -> Result<(), Diagnostic> {
        let mut operands: Vec<Operand> = Vec::new();
        self.collect_operands(value, &mut operands)
            .map_err(|d| d.with_related(format!("in assignment '{label}'")))?;
        let target_subset = self
            .resolve_access(target)
            .map_err(|d| d.with_related(format!("in assignment '{label}'")))?;

        let unions: Vec<Subset> = operands
            .iter()
            .map(|op| union_all(&op.subsets, &self.arrays[&op.data]))
            .collect();
        let body = self.rewrite(value, &operands, &unions);
        let code = format!("__out = {body}");

        let tasklet = self.graph.add_tasklet(
            label.to_string(),
            operands.iter().map(|op| op.conn.clone()),
            ["__out".to_string()],
            code,
        );
        log::trace!("tasklet '{}' with {} inputs", label, operands.len());

        for (op, subset) in operands.iter().zip(unions) {
            let (src, src_conn) = self.read_source(self.frames.len(), &op.data);
            self.graph.add_edge(
                src,
                src_conn,
                tasklet,
                Some(op.conn.clone()),
                Memlet::new(op.data.clone(), subset),
            );
        }
        self.attach_to_scope(tasklet, !operands.is_empty(), true);

        self.emit_write(
            tasklet,
            Some("__out".to_string()),
            Memlet::new(target.data.clone(), target_subset).with_wcr(wcr),
        );
        Ok(())
    }

    /// Gather every container read by `e`, grouped by container in order of
    /// first appearance.
    fn collect_operands(&self, e: &Expr, out: &mut Vec<Operand>) -> Result<(), Diagnostic> {
        match e {
            Expr::Subscript(data, subset) => {
                self.container(data)?;
                push_operand(out, data, subset.clone());
            }
            Expr::Sym(name) => {
                if !self.is_symbol(name) {
                    let desc = self.container(name)?;
                    push_operand(out, name, desc.full_subset());
                }
            }
            Expr::Unary(_, inner) => self.collect_operands(inner, out)?,
            Expr::Binary(_, l, r) => {
                self.collect_operands(l, out)?;
                self.collect_operands(r, out)?;
            }
            Expr::Call(_, args) => {
                for a in args {
                    self.collect_operands(a, out)?;
                }
            }
            Expr::Int(_) | Expr::Float(_) | Expr::Bool(_) => {}
        }
        Ok(())
    }

    /// Tasklet code for `e`: container reads become connector references
    /// (indexed relative to the memlet when the connector covers several
    /// elements) and module-qualified calls use canonical module names.
    fn rewrite(&self, e: &Expr, operands: &[Operand], unions: &[Subset]) -> Expr {
        let find = |data: &str| operands.iter().position(|op| op.data == data);
        match e {
            Expr::Subscript(data, subset) => match find(data) {
                Some(k) if operands[k].subsets.len() == 1 => Expr::sym(operands[k].conn.clone()),
                Some(k) => {
                    let relative = subset
                        .dims
                        .iter()
                        .zip(&unions[k].dims)
                        .map(|(r, u)| {
                            Range::new(
                                Expr::sub(r.begin.clone(), u.begin.clone()).simplify(),
                                Expr::sub(r.end.clone(), u.begin.clone()).simplify(),
                                r.step.clone(),
                            )
                        })
                        .collect();
                    Expr::Subscript(operands[k].conn.clone(), Subset::new(relative))
                }
                None => e.clone(),
            },
            Expr::Sym(name) => match find(name) {
                Some(k) => Expr::sym(operands[k].conn.clone()),
                None => e.clone(),
            },
            Expr::Unary(op, inner) => {
                Expr::Unary(*op, Box::new(self.rewrite(inner, operands, unions)))
            }
            Expr::Binary(op, l, r) => Expr::binary(
                *op,
                self.rewrite(l, operands, unions),
                self.rewrite(r, operands, unions),
            ),
            Expr::Call(name, args) => Expr::Call(
                self.canonical_call(name),
                args.iter()
                    .map(|a| self.rewrite(a, operands, unions))
                    .collect(),
            ),
            _ => e.clone(),
        }
    }

    fn canonical_call(&self, name: &str) -> String {
        match name.split_once('.') {
            Some((alias, rest)) => match self.modules.get(alias) {
                Some(canonical) if canonical.is_empty() => rest.to_string(),
                Some(canonical) => format!("{canonical}.{rest}"),
                None => name.to_string(),
            },
            None => name.to_string(),
        }
    }

    // ── Names ──

    fn is_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name) || self.frames.iter().any(|f| f.bound.iter().any(|b| b == name))
    }

    fn container(&self, data: &str) -> Result<&DataDesc, Diagnostic> {
        self.arrays.get(data).ok_or_else(|| {
            Diagnostic::usage(codes::E0301, format!("unknown data container '{data}'"))
                .with_hint("declare the container or pass it as a parameter")
        })
    }

    fn check_symbol(&self, name: &str) -> Result<(), Diagnostic> {
        if self.is_symbol(name) || self.arrays.contains_key(name) {
            Ok(())
        } else {
            Err(Diagnostic::usage(
                codes::E0301,
                format!("unknown symbol or container '{name}'"),
            ))
        }
    }

    fn resolve_access(&self, access: &Access) -> Result<Subset, Diagnostic> {
        let desc = self.container(&access.data)?;
        Ok(access.resolved_subset(desc))
    }

    // ── Routing ──

    /// Where a read of `data` at nesting `level` comes from. Scope levels
    /// route through their entry, creating the outer edge on first use.
    fn read_source(&mut self, level: usize, data: &str) -> (NodeId, Option<String>) {
        if level == 0 {
            return match self.top.get_mut(data) {
                Some(t) => {
                    t.read_since_write = true;
                    (t.node, None)
                }
                None => {
                    let node = self.graph.add_access(data);
                    self.top.insert(
                        data.to_string(),
                        TopAccess {
                            node,
                            read_since_write: true,
                        },
                    );
                    (node, None)
                }
            };
        }
        if self.frames[level - 1].inner.contains_key(data) {
            return (self.inner_source(level - 1, data), None);
        }
        let entry = self.frames[level - 1].entry;
        if !self.frames[level - 1].reads.contains(data) {
            let (src, src_conn) = self.read_source(level - 1, data);
            let mut memlet = Memlet::new(data, self.arrays[data].full_subset());
            memlet.dynamic = self.arrays[data].is_stream();
            self.graph.add_edge(src, src_conn, entry, None, memlet);
            self.frames[level - 1].reads.insert(data.to_string());
        }
        (entry, None)
    }

    /// The access node inside scope `frame` that holds what its body wrote
    /// to `data`. Pending writes are rewired through a new node on first use.
    fn inner_source(&mut self, frame: usize, data: &str) -> NodeId {
        let exit = self.frames[frame].exit;
        let Some(inner) = self.frames[frame].inner.get_mut(data) else {
            return exit;
        };
        inner.read_since_write = true;
        if let Some(node) = inner.node {
            return node;
        }
        let pending = std::mem::take(&mut inner.pending);
        let node = self.graph.add_access(data);
        for e in pending {
            let edge = &mut self.graph.edges[e.index()];
            edge.dst = node;
            edge.dst_conn = None;
            let memlet = edge.memlet.clone();
            self.graph.add_edge(node, None, exit, None, memlet);
        }
        if let Some(inner) = self.frames[frame].inner.get_mut(data) {
            inner.node = Some(node);
        }
        log::trace!("'{}' read after write inside a scope, via n{}", data, node.0);
        node
    }

    /// Wire a write leaving `src` to the innermost level: an access node at
    /// the top level, the scope exit (or its unread inner node) otherwise.
    fn emit_write(&mut self, src: NodeId, src_conn: Option<String>, memlet: Memlet) {
        let data = memlet.data.clone();
        if self.frames.is_empty() {
            let dst = self.top_write(&data);
            self.graph.add_edge(src, src_conn, dst, None, memlet);
            return;
        }
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if !frame.writes.iter().any(|(d, _)| *d == data) {
            frame.writes.push((data.clone(), memlet.wcr.clone()));
        }
        let exit = frame.exit;
        let inner = frame.inner.entry(data).or_default();
        match inner.node {
            Some(node) if !inner.read_since_write => {
                self.graph.add_edge(src, src_conn, node, None, memlet.clone());
                self.graph.add_edge(node, None, exit, None, memlet);
            }
            _ => {
                if inner.node.is_some() {
                    *inner = InnerWrite::default();
                }
                let edge = self.graph.add_edge(src, src_conn, exit, None, memlet);
                inner.pending.push(edge);
            }
        }
    }

    fn top_write(&mut self, data: &str) -> NodeId {
        match self.top.get(data) {
            Some(t) if !t.read_since_write => t.node,
            _ => {
                let node = self.graph.add_access(data);
                self.top.insert(
                    data.to_string(),
                    TopAccess {
                        node,
                        read_since_write: false,
                    },
                );
                node
            }
        }
    }

    /// Keep a node without inputs or outputs inside the innermost scope.
    fn attach_to_scope(&mut self, node: NodeId, has_inputs: bool, has_outputs: bool) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let (entry, exit) = (frame.entry, frame.exit);
        if !has_inputs {
            self.graph.add_edge(entry, None, node, None, Memlet::empty());
        }
        if !has_outputs {
            self.graph.add_edge(node, None, exit, None, Memlet::empty());
        }
    }

    fn open_scope(&mut self, entry: NodeId, exit: NodeId, bound: Vec<String>) {
        self.frames.push(Frame {
            entry,
            exit,
            bound,
            reads: BTreeSet::new(),
            writes: Vec::new(),
            inner: BTreeMap::new(),
        });
    }

    /// Connect the scope's exit to the enclosing level once its body is
    /// complete.
    fn close_scope(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if self.graph.out_edges(frame.entry).is_empty() {
            self.graph
                .add_edge(frame.entry, None, frame.exit, None, Memlet::empty());
        }
        for (data, wcr) in &frame.writes {
            let memlet = Memlet::new(data.clone(), self.arrays[data].full_subset())
                .with_wcr(wcr.clone());
            self.emit_write(frame.exit, None, memlet);
        }
        if let Some(parent) = self.frames.last() {
            let (p_entry, p_exit) = (parent.entry, parent.exit);
            if self.graph.in_edges(frame.entry).is_empty() {
                self.graph
                    .add_edge(p_entry, None, frame.entry, None, Memlet::empty());
            }
            if frame.writes.is_empty() {
                self.graph
                    .add_edge(frame.exit, None, p_exit, None, Memlet::empty());
            }
        }
    }
}

fn push_operand(out: &mut Vec<Operand>, data: &str, subset: Subset) {
    match out.iter_mut().find(|op| op.data == data) {
        Some(op) => {
            if !op.subsets.contains(&subset) {
                op.subsets.push(subset);
            }
        }
        None => out.push(Operand {
            data: data.to_string(),
            conn: format!("__in_{data}"),
            subsets: vec![subset],
        }),
    }
}

fn union_all(subsets: &[Subset], desc: &DataDesc) -> Subset {
    let mut iter = subsets.iter();
    let Some(first) = iter.next() else {
        return desc.full_subset();
    };
    iter.try_fold(first.clone(), |acc, s| acc.union(s))
        .unwrap_or_else(|| desc.full_subset())
}
