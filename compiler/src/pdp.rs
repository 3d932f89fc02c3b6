// pdp.rs — Parsed program primitives (the front end's output)
//
// The external parser hands over a nested tree of primitives (`ParsedProgram`,
// serde-compatible so trees can be stored as JSON). Construction flattens the
// tree into an arena (`Pdp`) addressed by `PrimId`; analysis results are kept
// in side tables keyed by the same ids and never written back into the tree.
//
// Preconditions: expression fields are well-formed text (checked by serde).
// Postconditions: `Pdp::from_parsed` allocates ids in pre-order, so parents
//   precede their children and ids are deterministic.
// Failure modes: none after deserialization.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{DType, DataDesc};
use crate::dataflow::Wcr;
use crate::id::{IdAllocator, PrimId};
use crate::symbolic::{Expr, Subset};

// ── Accesses ────────────────────────────────────────────────────────────────

/// A reference to a data container, optionally narrowed to a subset.
///
/// Serialized as text: `A`, `A[i]`, `B[0:N, j]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Access {
    pub data: String,
    pub subset: Option<Subset>,
}

impl Access {
    pub fn whole(data: impl Into<String>) -> Access {
        Access {
            data: data.into(),
            subset: None,
        }
    }

    pub fn subset(data: impl Into<String>, subset: Subset) -> Access {
        Access {
            data: data.into(),
            subset: Some(subset),
        }
    }

    /// The accessed subset, defaulting to the whole container.
    pub fn resolved_subset(&self, desc: &DataDesc) -> Subset {
        match &self.subset {
            Some(s) => s.clone(),
            None => desc.full_subset(),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subset {
            Some(s) => write!(f, "{}[{}]", self.data, s),
            None => write!(f, "{}", self.data),
        }
    }
}

impl From<Access> for String {
    fn from(a: Access) -> String {
        a.to_string()
    }
}

impl TryFrom<String> for Access {
    type Error = String;

    fn try_from(text: String) -> Result<Access, String> {
        match crate::parser::parse_expr(&text).map_err(|d| d.message)? {
            Expr::Sym(name) => Ok(Access::whole(name)),
            Expr::Subscript(name, subset) => Ok(Access::subset(name, subset)),
            other => Err(format!("'{other}' is not a data access")),
        }
    }
}

/// A named tasklet port bound to an access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub conn: String,
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wcr: Option<Wcr>,
}

// ── Nested (serialized) form ────────────────────────────────────────────────

/// A primitive as produced by the external parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedNode {
    /// `target = value` (or `target op= value` when `wcr` is set).
    Assign {
        target: Access,
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wcr: Option<Wcr>,
    },
    /// An explicit tasklet with named ports and opaque code.
    Tasklet {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        inputs: Vec<Port>,
        #[serde(default)]
        outputs: Vec<Port>,
        code: String,
    },
    /// `for var in range(begin, end, step)`.
    For {
        var: String,
        begin: Expr,
        end: Expr,
        #[serde(default = "unit_step")]
        step: Expr,
        body: Vec<ParsedNode>,
    },
    While {
        cond: Expr,
        body: Vec<ParsedNode>,
    },
    If {
        cond: Expr,
        body: Vec<ParsedNode>,
        #[serde(default)]
        orelse: Vec<ParsedNode>,
    },
    /// A parallel map over `params` ranging over `range` (one dim per param).
    Map {
        #[serde(default)]
        label: Option<String>,
        params: Vec<String>,
        range: Subset,
        body: Vec<ParsedNode>,
    },
    /// A consume scope: `num_pes` processing elements pop from `stream`.
    Consume {
        #[serde(default)]
        label: Option<String>,
        stream: String,
        pe: String,
        num_pes: Expr,
        body: Vec<ParsedNode>,
    },
    /// A call to another kernel, already inlined by the front end.
    Call { callee: String, body: Vec<ParsedNode> },
}

fn unit_step() -> Expr {
    Expr::Int(1)
}

impl Access {
    fn subs_all(&mut self, bindings: &BTreeMap<String, Expr>) {
        if let Some(s) = &mut self.subset {
            *s = s.subs_all(bindings);
        }
    }
}

impl ParsedNode {
    /// Replace free symbols in every expression of the subtree.
    pub fn subs_all(&mut self, bindings: &BTreeMap<String, Expr>) {
        let body = match self {
            ParsedNode::Assign { target, value, .. } => {
                target.subs_all(bindings);
                *value = value.subs_all(bindings);
                return;
            }
            ParsedNode::Tasklet {
                inputs, outputs, ..
            } => {
                for port in inputs.iter_mut().chain(outputs.iter_mut()) {
                    port.access.subs_all(bindings);
                }
                return;
            }
            ParsedNode::For {
                begin,
                end,
                step,
                body,
                ..
            } => {
                *begin = begin.subs_all(bindings);
                *end = end.subs_all(bindings);
                *step = step.subs_all(bindings);
                body
            }
            ParsedNode::While { cond, body } => {
                *cond = cond.subs_all(bindings);
                body
            }
            ParsedNode::If { cond, body, orelse } => {
                *cond = cond.subs_all(bindings);
                for node in orelse.iter_mut() {
                    node.subs_all(bindings);
                }
                body
            }
            ParsedNode::Map { range, body, .. } => {
                *range = range.subs_all(bindings);
                body
            }
            ParsedNode::Consume { num_pes, body, .. } => {
                *num_pes = num_pes.subs_all(bindings);
                body
            }
            ParsedNode::Call { body, .. } => body,
        };
        for node in body.iter_mut() {
            node.subs_all(bindings);
        }
    }
}

/// Root of the external parser's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedProgram {
    pub name: String,
    #[serde(default)]
    pub source: String,
    /// Every declared and nested container ("all arrays").
    #[serde(default)]
    pub arrays: BTreeMap<String, DataDesc>,
    /// Resolved parameter types.
    #[serde(default)]
    pub argtypes: BTreeMap<String, DataDesc>,
    /// Free symbols and their inferred types.
    #[serde(default)]
    pub symbols: BTreeMap<String, DType>,
    pub body: Vec<ParsedNode>,
}

// ── Arena form ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PrimKind {
    Assign {
        target: Access,
        value: Expr,
        wcr: Option<Wcr>,
    },
    Tasklet {
        inputs: Vec<Port>,
        outputs: Vec<Port>,
        code: String,
    },
    For {
        var: String,
        begin: Expr,
        end: Expr,
        step: Expr,
    },
    While {
        cond: Expr,
    },
    If {
        cond: Expr,
    },
    Map {
        params: Vec<String>,
        range: Subset,
    },
    Consume {
        stream: String,
        pe: String,
        num_pes: Expr,
    },
    Call {
        callee: String,
    },
}

impl PrimKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrimKind::Assign { .. } => "assign",
            PrimKind::Tasklet { .. } => "tasklet",
            PrimKind::For { .. } => "for",
            PrimKind::While { .. } => "while",
            PrimKind::If { .. } => "if",
            PrimKind::Map { .. } => "map",
            PrimKind::Consume { .. } => "consume",
            PrimKind::Call { .. } => "call",
        }
    }

    /// Loops and branches; these always force a state boundary.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            PrimKind::For { .. } | PrimKind::While { .. } | PrimKind::If { .. }
        )
    }
}

/// One primitive in the arena. `orelse` is only populated for `If`.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub label: String,
    pub kind: PrimKind,
    pub children: Vec<PrimId>,
    pub orelse: Vec<PrimId>,
}

/// The flattened parsed program ("PDP").
#[derive(Debug, Clone)]
pub struct Pdp {
    pub name: String,
    pub source: String,
    pub arrays: BTreeMap<String, DataDesc>,
    pub argtypes: BTreeMap<String, DataDesc>,
    pub symbols: BTreeMap<String, DType>,
    pub prims: Vec<Primitive>,
    pub root: Vec<PrimId>,
}

impl Pdp {
    /// Flatten a parsed tree into an arena, allocating ids in pre-order.
    pub fn from_parsed(program: ParsedProgram) -> Pdp {
        let mut pdp = Pdp {
            name: program.name,
            source: program.source,
            arrays: program.arrays,
            argtypes: program.argtypes,
            symbols: program.symbols,
            prims: Vec::new(),
            root: Vec::new(),
        };
        let mut labels = IdAllocator::new();
        pdp.root = program
            .body
            .into_iter()
            .map(|node| pdp.flatten(node, &mut labels))
            .collect();
        pdp
    }

    fn flatten(&mut self, node: ParsedNode, labels: &mut IdAllocator) -> PrimId {
        let id = PrimId(self.prims.len() as u32);
        // Reserve the slot so the parent precedes its children.
        self.prims.push(Primitive {
            label: String::new(),
            kind: PrimKind::Call {
                callee: String::new(),
            },
            children: Vec::new(),
            orelse: Vec::new(),
        });

        let (label, kind, body, orelse) = match node {
            ParsedNode::Assign { target, value, wcr } => (
                labels.fresh_label("assign"),
                PrimKind::Assign { target, value, wcr },
                Vec::new(),
                Vec::new(),
            ),
            ParsedNode::Tasklet {
                label,
                inputs,
                outputs,
                code,
            } => (
                label.unwrap_or_else(|| labels.fresh_label("tasklet")),
                PrimKind::Tasklet {
                    inputs,
                    outputs,
                    code,
                },
                Vec::new(),
                Vec::new(),
            ),
            ParsedNode::For {
                var,
                begin,
                end,
                step,
                body,
            } => (
                labels.fresh_label("for"),
                PrimKind::For {
                    var,
                    begin,
                    end,
                    step,
                },
                body,
                Vec::new(),
            ),
            ParsedNode::While { cond, body } => {
                (labels.fresh_label("while"), PrimKind::While { cond }, body, Vec::new())
            }
            ParsedNode::If { cond, body, orelse } => {
                (labels.fresh_label("if"), PrimKind::If { cond }, body, orelse)
            }
            ParsedNode::Map {
                label,
                params,
                range,
                body,
            } => (
                label.unwrap_or_else(|| labels.fresh_label("map")),
                PrimKind::Map { params, range },
                body,
                Vec::new(),
            ),
            ParsedNode::Consume {
                label,
                stream,
                pe,
                num_pes,
                body,
            } => (
                label.unwrap_or_else(|| labels.fresh_label("consume")),
                PrimKind::Consume {
                    stream,
                    pe,
                    num_pes,
                },
                body,
                Vec::new(),
            ),
            ParsedNode::Call { callee, body } => (
                labels.fresh_label(&format!("call_{callee}")),
                PrimKind::Call { callee },
                body,
                Vec::new(),
            ),
        };

        let children = body.into_iter().map(|n| self.flatten(n, labels)).collect();
        let orelse = orelse.into_iter().map(|n| self.flatten(n, labels)).collect();
        self.prims[id.index()] = Primitive {
            label,
            kind,
            children,
            orelse,
        };
        id
    }

    pub fn get(&self, id: PrimId) -> Option<&Primitive> {
        self.prims.get(id.index())
    }

    /// Every declared and nested container.
    pub fn all_arrays(&self) -> &BTreeMap<String, DataDesc> {
        &self.arrays
    }

    /// Whether the subtree rooted at `id` contains a loop or branch.
    pub fn contains_control_flow(&self, id: PrimId) -> bool {
        let Some(prim) = self.get(id) else {
            return false;
        };
        prim.kind.is_control_flow()
            || prim
                .children
                .iter()
                .chain(&prim.orelse)
                .any(|&c| self.contains_control_flow(c))
    }
}
