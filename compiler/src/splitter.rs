// splitter.rs — Split the primitive sequence into states and transitions
//
// Straight-line primitives accumulate in the current state's bucket; loops
// and branches close the current state and open new ones connected by
// guarded interstate edges.
//
//   if c {T} else {E}   cur ─[c]→ T… ─→ join,  cur ─[not c]→ E… ─→ join
//   for v in b..e by s  cur ─{v = b}→ guard ─[v < e]→ body… ─{v = v + s}→ guard
//                                          guard ─[v >= e]→ exit
//   while c {B}         cur ─→ guard ─[c]→ B… ─→ guard,  guard ─[not c]→ exit
//
// A post-pass splices out every empty state whose only outgoing edge is
// unconditional, moving that edge's assignments onto the incoming edges.
//
// Preconditions: `sdfg` has no states yet.
// Postconditions: every primitive that is not a loop, branch, or call
//   containing control flow appears in exactly one bucket; no empty non-start
//   state with a single unconditional outgoing edge remains.
// Failure modes: a child id outside the arena → E0202.
// Side effects: populates the states and edges of `sdfg`.

use std::collections::BTreeMap;

use crate::diag::{codes, Diagnostic};
use crate::id::{IdAllocator, PrimId, StateId};
use crate::pdp::{Pdp, PrimKind};
use crate::sdfg::Sdfg;
use crate::symbolic::{BinOp, Expr};

/// Primitives assigned to each state, in program order.
pub type StateBuckets = BTreeMap<StateId, Vec<PrimId>>;

/// Create the state machine for `pdp` inside `sdfg`.
pub fn create_states(pdp: &Pdp, sdfg: &mut Sdfg) -> Result<StateBuckets, Diagnostic> {
    let mut splitter = Splitter {
        pdp,
        sdfg,
        buckets: BTreeMap::new(),
        labels: IdAllocator::new(),
    };
    let start = splitter.new_state("");
    splitter.split_seq(&pdp.root, start)?;
    let mut buckets = splitter.buckets;

    let removed = elide_empty_states(sdfg, &mut buckets);
    log::debug!(
        "state split: {} states, {} transitions ({} elided)",
        sdfg.num_states(),
        sdfg.edges().len(),
        removed
    );
    Ok(buckets)
}

struct Splitter<'a> {
    pdp: &'a Pdp,
    sdfg: &'a mut Sdfg,
    buckets: StateBuckets,
    labels: IdAllocator,
}

impl Splitter<'_> {
    fn new_state(&mut self, label: &str) -> StateId {
        let id = self.sdfg.add_state(label);
        self.buckets.insert(id, Vec::new());
        id
    }

    /// Split `ids` starting in `current`; returns the state control reaches
    /// after the last primitive.
    fn split_seq(&mut self, ids: &[PrimId], mut current: StateId) -> Result<StateId, Diagnostic> {
        for &id in ids {
            let prim = self.pdp.get(id).ok_or_else(|| {
                Diagnostic::structural(codes::E0202, format!("primitive {} does not exist", id.0))
            })?;
            match &prim.kind {
                PrimKind::If { cond } => {
                    let then_first = self.new_state("");
                    self.sdfg.add_edge(current, then_first, cond.clone(), vec![]);
                    let then_last = self.split_seq(&prim.children, then_first)?;

                    let join = if prim.orelse.is_empty() {
                        let join = self.new_state("");
                        self.sdfg.add_edge(current, join, cond.negate(), vec![]);
                        join
                    } else {
                        let else_first = self.new_state("");
                        self.sdfg.add_edge(current, else_first, cond.negate(), vec![]);
                        let else_last = self.split_seq(&prim.orelse, else_first)?;
                        let join = self.new_state("");
                        self.sdfg.add_edge(else_last, join, Expr::truth(), vec![]);
                        join
                    };
                    self.sdfg.add_edge(then_last, join, Expr::truth(), vec![]);
                    current = join;
                }
                PrimKind::For {
                    var,
                    begin,
                    end,
                    step,
                } => {
                    let label = self.labels.fresh_label("guard");
                    let guard = self.new_state(&label);
                    self.sdfg.add_edge(
                        current,
                        guard,
                        Expr::truth(),
                        vec![(var.clone(), begin.clone())],
                    );

                    let descending = step.as_int().is_some_and(|s| s < 0);
                    let op = if descending { BinOp::Gt } else { BinOp::Lt };
                    let cond = Expr::binary(op, Expr::sym(var.clone()), end.clone());

                    let body_first = self.new_state("");
                    self.sdfg.add_edge(guard, body_first, cond.clone(), vec![]);
                    let body_last = self.split_seq(&prim.children, body_first)?;
                    self.sdfg.add_edge(
                        body_last,
                        guard,
                        Expr::truth(),
                        vec![(var.clone(), Expr::add(Expr::sym(var.clone()), step.clone()))],
                    );

                    let exit = self.new_state("");
                    self.sdfg.add_edge(guard, exit, cond.negate(), vec![]);
                    current = exit;
                }
                PrimKind::While { cond } => {
                    let label = self.labels.fresh_label("guard");
                    let guard = self.new_state(&label);
                    self.sdfg.add_edge(current, guard, Expr::truth(), vec![]);

                    let body_first = self.new_state("");
                    self.sdfg.add_edge(guard, body_first, cond.clone(), vec![]);
                    let body_last = self.split_seq(&prim.children, body_first)?;
                    self.sdfg.add_edge(body_last, guard, Expr::truth(), vec![]);

                    let exit = self.new_state("");
                    self.sdfg.add_edge(guard, exit, cond.negate(), vec![]);
                    current = exit;
                }
                PrimKind::Call { .. } if self.pdp.contains_control_flow(id) => {
                    current = self.split_seq(&prim.children, current)?;
                }
                _ => {
                    self.buckets.entry(current).or_default().push(id);
                }
            }
        }
        Ok(current)
    }
}

// ── Empty-state elision ─────────────────────────────────────────────────────

/// Splice out empty pass-through states until none is left. Returns the
/// number of states removed.
fn elide_empty_states(sdfg: &mut Sdfg, buckets: &mut StateBuckets) -> usize {
    let mut removed = 0;
    while let Some(victim) = find_elidable(sdfg, buckets) {
        let out = sdfg.out_edges(victim)[0];
        let through = sdfg.edges()[out].clone();

        if sdfg.start_state() == Some(victim) {
            sdfg.remove_state(victim);
            let succ = if through.dst > victim {
                StateId(through.dst.0 - 1)
            } else {
                through.dst
            };
            sdfg.set_start_state(succ);
        } else {
            for idx in sdfg.in_edges(victim) {
                if let Some(edge) = sdfg.edge_mut(idx) {
                    edge.dst = through.dst;
                    edge.assignments.extend(through.assignments.iter().cloned());
                }
            }
            sdfg.remove_state(victim);
        }

        log::trace!("elided empty state {}", victim.0);
        *buckets = std::mem::take(buckets)
            .into_iter()
            .filter(|(id, _)| *id != victim)
            .map(|(id, prims)| {
                let id = if id > victim { StateId(id.0 - 1) } else { id };
                (id, prims)
            })
            .collect();
        removed += 1;
    }
    removed
}

fn find_elidable(sdfg: &Sdfg, buckets: &StateBuckets) -> Option<StateId> {
    sdfg.state_ids().find(|&id| {
        let empty = buckets.get(&id).map_or(true, Vec::is_empty);
        let out = sdfg.out_edges(id);
        if !empty || out.len() != 1 {
            return false;
        }
        let edge = &sdfg.edges()[out[0]];
        if !edge.is_unconditional() || edge.dst == id {
            return false;
        }
        if sdfg.start_state() == Some(id) {
            edge.assignments.is_empty() && sdfg.in_edges(id).is_empty()
        } else {
            true
        }
    })
}
