// id.rs — Stable arena identifiers for primitives, states and dataflow nodes
//
// Every arena in the crate (primitive tree, state graph, per-state dataflow
// graph) is a `Vec` indexed by one of these newtypes. Identifiers are
// allocated in construction order, so identical inputs yield identical ids.

use serde::{Deserialize, Serialize};

/// Index of a primitive in the parsed-program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimId(pub u32);

/// Index of a state in an SDFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u32);

/// Index of a node within one state's dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Index of a memlet edge within one state's dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl PrimId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for construction-order labels. Produces monotonically
/// increasing suffixes so generated names (`guard_3`, `map_7`) are
/// deterministic across runs.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_label: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `<prefix>_<n>` with a fresh `n`.
    pub fn fresh_label(&mut self, prefix: &str) -> String {
        let n = self.next_label;
        self.next_label += 1;
        format!("{prefix}_{n}")
    }
}
