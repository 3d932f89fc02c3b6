// sdfg.rs — Stateful dataflow multigraph: states, interstate edges, descriptors
//
// The top-level container produced by construction: a state machine whose
// states each own a dataflow graph, plus the container descriptors and
// symbol types shared by all states.
//
// Preconditions: none.
// Postconditions: `remove_state` keeps ids dense; edges touching the removed
//   state are dropped and later ids shift down by one.
// Failure modes: snapshot I/O and decoding (E0501).
// Side effects: `save` and `draw_to_file` write files.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::{DType, DataDesc};
use crate::dataflow::DataflowGraph;
use crate::diag::{codes, Diagnostic};
use crate::id::StateId;
use crate::symbolic::Expr;

// ── States and transitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub label: String,
    pub graph: DataflowGraph,
}

impl State {
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

/// A guarded transition. The guard is evaluated on the symbol values before
/// the transition; the assignments are then applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterstateEdge {
    pub src: StateId,
    pub dst: StateId,
    pub guard: Expr,
    #[serde(default)]
    pub assignments: Vec<(String, Expr)>,
}

impl InterstateEdge {
    pub fn is_unconditional(&self) -> bool {
        self.guard.is_true()
    }
}

impl fmt::Display for InterstateEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.guard)?;
        if !self.assignments.is_empty() {
            let parts: Vec<String> = self
                .assignments
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect();
            write!(f, " {{{}}}", parts.join("; "))?;
        }
        Ok(())
    }
}

// ── SDFG ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sdfg {
    pub name: String,
    arrays: BTreeMap<String, DataDesc>,
    symbols: BTreeMap<String, DType>,
    states: Vec<State>,
    edges: Vec<InterstateEdge>,
    start: Option<StateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl Sdfg {
    pub fn new(name: impl Into<String>) -> Sdfg {
        Sdfg {
            name: name.into(),
            arrays: BTreeMap::new(),
            symbols: BTreeMap::new(),
            states: Vec::new(),
            edges: Vec::new(),
            start: None,
            source: None,
        }
    }

    // ── Data ──

    pub fn arrays(&self) -> &BTreeMap<String, DataDesc> {
        &self.arrays
    }

    pub fn add_datadesc(&mut self, name: impl Into<String>, desc: DataDesc) {
        self.arrays.insert(name.into(), desc);
    }

    pub fn symbols(&self) -> &BTreeMap<String, DType> {
        &self.symbols
    }

    /// Register a symbol. An existing symbol keeps its type unless
    /// `override_dtype` is set. Returns whether the table changed.
    pub fn add_symbol(&mut self, name: impl Into<String>, dtype: DType, override_dtype: bool) -> bool {
        let name = name.into();
        match self.symbols.get(&name) {
            Some(&existing) if existing == dtype => false,
            Some(_) if !override_dtype => false,
            _ => {
                self.symbols.insert(name, dtype);
                true
            }
        }
    }

    pub fn clear_symbols(&mut self) {
        self.symbols.clear();
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    // ── States ──

    /// Add a state. The first state added becomes the start state.
    pub fn add_state(&mut self, label: impl Into<String>) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(State {
            label: label.into(),
            graph: DataflowGraph::new(),
        });
        if self.start.is_none() {
            self.start = Some(id);
        }
        id
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id.index())
    }

    pub fn state_mut(&mut self, id: StateId) -> Option<&mut State> {
        self.states.get_mut(id.index())
    }

    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        (0..self.states.len() as u32).map(StateId)
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(|(i, s)| (StateId(i as u32), s))
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn find_state(&self, label: &str) -> Option<StateId> {
        self.states().find(|(_, s)| s.label == label).map(|(id, _)| id)
    }

    pub fn start_state(&self) -> Option<StateId> {
        self.start
    }

    pub fn set_start_state(&mut self, id: StateId) {
        self.start = Some(id);
    }

    /// Remove a state and every edge touching it.
    pub fn remove_state(&mut self, id: StateId) {
        if id.index() >= self.states.len() {
            return;
        }
        self.states.remove(id.index());
        self.edges.retain(|e| e.src != id && e.dst != id);
        let shift = |s: StateId| if s > id { StateId(s.0 - 1) } else { s };
        for e in &mut self.edges {
            e.src = shift(e.src);
            e.dst = shift(e.dst);
        }
        self.start = match self.start {
            Some(s) if s == id => None,
            Some(s) => Some(shift(s)),
            None => None,
        };
    }

    // ── Edges ──

    pub fn add_edge(
        &mut self,
        src: StateId,
        dst: StateId,
        guard: Expr,
        assignments: Vec<(String, Expr)>,
    ) -> usize {
        self.edges.push(InterstateEdge {
            src,
            dst,
            guard,
            assignments,
        });
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[InterstateEdge] {
        &self.edges
    }

    pub fn edge_mut(&mut self, index: usize) -> Option<&mut InterstateEdge> {
        self.edges.get_mut(index)
    }

    pub fn remove_edge(&mut self, index: usize) -> Option<InterstateEdge> {
        (index < self.edges.len()).then(|| self.edges.remove(index))
    }

    pub fn in_edges(&self, id: StateId) -> Vec<usize> {
        (0..self.edges.len()).filter(|&i| self.edges[i].dst == id).collect()
    }

    pub fn out_edges(&self, id: StateId) -> Vec<usize> {
        (0..self.edges.len()).filter(|&i| self.edges[i].src == id).collect()
    }

    // ── Traversal ──

    /// Breadth-first order from the start state, following out-edges in
    /// insertion order. Unreachable states are not listed.
    pub fn bfs_order(&self) -> Vec<StateId> {
        let Some(start) = self.start else {
            return Vec::new();
        };
        if start.index() >= self.states.len() {
            return Vec::new();
        }
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut order = Vec::new();
        while let Some(s) = queue.pop_front() {
            order.push(s);
            for e in &self.edges {
                if e.src == s && e.dst.index() < self.states.len() && seen.insert(e.dst) {
                    queue.push_back(e.dst);
                }
            }
        }
        order
    }

    /// Label every unlabelled state `s<k>` by its breadth-first position.
    pub fn label_states(&mut self) {
        for (k, id) in self.bfs_order().into_iter().enumerate() {
            let state = &mut self.states[id.index()];
            if state.label.is_empty() {
                state.label = format!("s{k}");
            }
        }
    }

    // ── Persistence ──

    pub fn to_json(&self) -> Result<String, Diagnostic> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Diagnostic::usage(codes::E0501, format!("encoding SDFG '{}': {e}", self.name)))
    }

    pub fn from_json(text: &str) -> Result<Sdfg, Diagnostic> {
        serde_json::from_str(text)
            .map_err(|e| Diagnostic::usage(codes::E0501, format!("decoding SDFG snapshot: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), Diagnostic> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| {
            Diagnostic::usage(codes::E0501, format!("writing {}: {e}", path.display()))
        })
    }

    pub fn load(path: &Path) -> Result<Sdfg, Diagnostic> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::usage(codes::E0501, format!("reading {}: {e}", path.display()))
        })?;
        Sdfg::from_json(&text)
    }

    /// Write `<dir>/<name>.dot`.
    pub fn draw_to_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.dot", self.name));
        std::fs::write(&path, crate::dot::emit_dot(self))?;
        log::debug!("wrote {}", path.display());
        Ok(path)
    }
}

impl fmt::Display for Sdfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sdfg {}", self.name)?;
        if !self.arrays.is_empty() {
            writeln!(f, "  arrays:")?;
            for (name, desc) in &self.arrays {
                writeln!(f, "    {name}: {desc}")?;
            }
        }
        if !self.symbols.is_empty() {
            writeln!(f, "  symbols:")?;
            for (name, dtype) in &self.symbols {
                writeln!(f, "    {name}: {dtype}")?;
            }
        }
        if let Some(start) = self.start.and_then(|s| self.state(s)) {
            writeln!(f, "  start: {}", start.label)?;
        }
        for state in &self.states {
            writeln!(f, "  state {}:", state.label)?;
            write!(f, "{}", state.graph)?;
        }
        if !self.edges.is_empty() {
            writeln!(f, "  transitions:")?;
            for e in &self.edges {
                let label = |id: StateId| {
                    self.state(id)
                        .map(|s| s.label.clone())
                        .unwrap_or_else(|| format!("<missing {}>", id.0))
                };
                writeln!(f, "    {} -> {} {}", label(e.src), label(e.dst), e)?;
            }
        }
        Ok(())
    }
}
