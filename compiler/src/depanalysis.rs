// depanalysis.rs — Read/write/symbol summaries over the primitive arena
//
// Computes, for every primitive, the containers it reads, definitely writes,
// possibly writes, and the free symbols it mentions. Summaries are stored in
// a side table keyed by `PrimId`; the primitive arena is never mutated.
//
// Preconditions: primitive ids are allocated in pre-order (children have
//   larger ids than their parent), as `Pdp::from_parsed` guarantees.
// Postconditions: `maybe_writes ⊇ writes` for every primitive; a loop
//   may run zero times, so its body's writes are only possible ones; loop
//   variables, map parameters and consume PE indices are not free symbols
//   of the block that binds them.
// Failure modes: a child whose summary is not yet available (out-of-range id
//   or a back-reference forming a cycle) → E0201.
// Side effects: none.

use std::collections::BTreeSet;

use crate::diag::{codes, Diagnostic};
use crate::id::PrimId;
use crate::pdp::{Access, Pdp, PrimKind};
use crate::symbolic::{Expr, Subset};

// ── Name classes ────────────────────────────────────────────────────────────

/// Which names denote data containers and which denote symbols.
///
/// Scalar parameters and declared symbols are symbols; every other declared
/// container is data. Unknown names are treated as symbols here and
/// rejected later by the dataflow builder if used as data.
#[derive(Debug, Clone, Default)]
pub struct NameClasses {
    pub containers: BTreeSet<String>,
    pub symbols: BTreeSet<String>,
}

impl NameClasses {
    pub fn of(pdp: &Pdp) -> NameClasses {
        let mut symbols: BTreeSet<String> = pdp.symbols.keys().cloned().collect();
        symbols.extend(
            pdp.argtypes
                .iter()
                .filter(|(_, desc)| desc.is_scalar())
                .map(|(name, _)| name.clone()),
        );
        let containers = pdp
            .arrays
            .keys()
            .chain(pdp.argtypes.keys())
            .filter(|name| !symbols.contains(*name))
            .cloned()
            .collect();
        NameClasses { containers, symbols }
    }

    pub fn is_container(&self, name: &str) -> bool {
        self.containers.contains(name)
    }
}

// ── Summaries ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepSummary {
    pub reads: BTreeSet<String>,
    /// Containers written on every path through the primitive.
    pub writes: BTreeSet<String>,
    /// Containers written on some path.
    pub maybe_writes: BTreeSet<String>,
    pub symbols: BTreeSet<String>,
}

impl DepSummary {
    /// Union `other` into this summary (sequential composition).
    pub fn absorb(&mut self, other: &DepSummary) {
        self.reads.extend(other.reads.iter().cloned());
        self.writes.extend(other.writes.iter().cloned());
        self.maybe_writes.extend(other.maybe_writes.iter().cloned());
        self.symbols.extend(other.symbols.iter().cloned());
    }

    fn absorb_loop_body(&mut self, body: &DepSummary) {
        self.reads.extend(body.reads.iter().cloned());
        self.maybe_writes.extend(body.maybe_writes.iter().cloned());
        self.symbols.extend(body.symbols.iter().cloned());
    }

    fn read_expr(&mut self, e: &Expr, names: &NameClasses) {
        for name in e.free_names() {
            if names.is_container(&name) {
                self.reads.insert(name);
            } else {
                self.symbols.insert(name);
            }
        }
    }

    fn read_subset(&mut self, s: &Subset, names: &NameClasses) {
        for name in s.free_names() {
            if names.is_container(&name) {
                self.reads.insert(name);
            } else {
                self.symbols.insert(name);
            }
        }
    }

    fn read_access(&mut self, a: &Access, names: &NameClasses) {
        self.reads.insert(a.data.clone());
        if let Some(s) = &a.subset {
            self.read_subset(s, names);
        }
    }

    fn write_access(&mut self, a: &Access, names: &NameClasses) {
        self.writes.insert(a.data.clone());
        self.maybe_writes.insert(a.data.clone());
        if let Some(s) = &a.subset {
            self.read_subset(s, names);
        }
    }

    fn bind(&mut self, names: &[String]) {
        for n in names {
            self.symbols.remove(n);
        }
    }
}

/// Dependency summaries keyed by primitive id.
#[derive(Debug, Clone, Default)]
pub struct DepTable {
    entries: Vec<Option<DepSummary>>,
}

impl DepTable {
    pub fn get(&self, id: PrimId) -> Option<&DepSummary> {
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    /// Union of the summaries of `ids` in sequence.
    pub fn merged(&self, ids: &[PrimId]) -> DepSummary {
        let mut out = DepSummary::default();
        for id in ids {
            if let Some(s) = self.get(*id) {
                out.absorb(s);
            }
        }
        out
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Compute summaries for every primitive, children before parents.
pub fn analyze(pdp: &Pdp) -> Result<DepTable, Diagnostic> {
    let names = NameClasses::of(pdp);
    let mut table = DepTable {
        entries: vec![None; pdp.prims.len()],
    };

    for index in (0..pdp.prims.len()).rev() {
        let prim = &pdp.prims[index];
        let id = PrimId(index as u32);

        let mut children = DepSummary::default();
        for &child in &prim.children {
            children.absorb(child_summary(&table, id, child, &prim.label)?);
        }

        let mut summary = DepSummary::default();
        match &prim.kind {
            PrimKind::Assign { target, value, wcr } => {
                summary.read_expr(value, &names);
                summary.write_access(target, &names);
                if wcr.is_some() {
                    summary.reads.insert(target.data.clone());
                }
            }
            PrimKind::Tasklet {
                inputs, outputs, ..
            } => {
                for port in inputs {
                    summary.read_access(&port.access, &names);
                }
                for port in outputs {
                    summary.write_access(&port.access, &names);
                    if port.wcr.is_some() {
                        summary.reads.insert(port.access.data.clone());
                    }
                }
            }
            PrimKind::For {
                var,
                begin,
                end,
                step,
            } => {
                summary.absorb_loop_body(&children);
                for e in [begin, end, step] {
                    summary.read_expr(e, &names);
                }
                summary.bind(std::slice::from_ref(var));
            }
            PrimKind::While { cond } => {
                summary.absorb_loop_body(&children);
                summary.read_expr(cond, &names);
            }
            PrimKind::If { cond } => {
                let mut orelse = DepSummary::default();
                for &child in &prim.orelse {
                    orelse.absorb(child_summary(&table, id, child, &prim.label)?);
                }
                summary.read_expr(cond, &names);
                summary.reads.extend(children.reads.iter().chain(&orelse.reads).cloned());
                summary
                    .symbols
                    .extend(children.symbols.iter().chain(&orelse.symbols).cloned());
                summary.writes = children.writes.intersection(&orelse.writes).cloned().collect();
                summary.maybe_writes = children
                    .maybe_writes
                    .union(&orelse.maybe_writes)
                    .cloned()
                    .collect();
            }
            PrimKind::Map { params, range } => {
                summary.absorb(&children);
                summary.bind(params);
                summary.read_subset(range, &names);
            }
            PrimKind::Consume {
                stream,
                pe,
                num_pes,
            } => {
                summary.absorb(&children);
                summary.bind(std::slice::from_ref(pe));
                summary.reads.insert(stream.clone());
                summary.read_expr(num_pes, &names);
            }
            PrimKind::Call { .. } => summary.absorb(&children),
        }

        log::trace!(
            "{} ({}): reads {:?}, writes {:?}, maybe {:?}",
            prim.label,
            prim.kind.name(),
            summary.reads,
            summary.writes,
            summary.maybe_writes
        );
        table.entries[index] = Some(summary);
    }

    for &root in &pdp.root {
        if table.get(root).is_none() {
            return Err(Diagnostic::structural(
                codes::E0201,
                format!("top-level primitive {} has no dependency summary", root.0),
            ));
        }
    }
    log::debug!("dependency analysis: {} primitives", pdp.prims.len());
    Ok(table)
}

fn child_summary<'t>(
    table: &'t DepTable,
    parent: PrimId,
    child: PrimId,
    label: &str,
) -> Result<&'t DepSummary, Diagnostic> {
    if child <= parent {
        return Err(Diagnostic::structural(
            codes::E0201,
            format!("primitive '{label}' refers back to primitive {}", child.0),
        )
        .with_hint("the primitive tree must not contain cycles"));
    }
    table.get(child).ok_or_else(|| {
        Diagnostic::structural(
            codes::E0201,
            format!("primitive '{label}' has a child {} without a dependency summary", child.0),
        )
    })
}
