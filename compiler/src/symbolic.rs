// symbolic.rs — Symbolic integer/boolean expressions, ranges and subsets
//
// Expressions appear in memlet subsets, interstate guards, symbol assignments,
// map ranges and tasklet bodies. Arithmetic over integers is normalised via a
// linear form (sum of integer-weighted atoms plus a constant), which is what
// simplification, affine decomposition and structural comparison build on.
// Anything that is not linear (products of symbols, calls, subscripts) is an
// opaque atom keyed by its printed form.
//
// Preconditions: none.
// Postconditions: `simplify` is idempotent and never changes the value of an
//   expression under any symbol binding.
// Failure modes: text conversion (`TryFrom<String>`) reports parse errors.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => 6,
            BinOp::Pow => 8,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    /// The comparison that holds exactly when `self` does not.
    fn negated(self) -> Option<BinOp> {
        Some(match self {
            BinOp::Lt => BinOp::Ge,
            BinOp::Le => BinOp::Gt,
            BinOp::Gt => BinOp::Le,
            BinOp::Ge => BinOp::Lt,
            BinOp::Eq => BinOp::Ne,
            BinOp::Ne => BinOp::Eq,
            _ => return None,
        })
    }
}

// ── Expression ──────────────────────────────────────────────────────────────

/// A symbolic expression.
///
/// Serialized as its printed text; deserialized through `parser::parse_expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Sym(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    /// A data-container element or slice, e.g. `A[i, 0:N]`.
    Subscript(String, Subset),
}

impl Expr {
    pub fn sym(name: impl Into<String>) -> Expr {
        Expr::Sym(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, lhs, rhs)
    }

    pub fn truth() -> Expr {
        Expr::Bool(true)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Bool(true))
    }

    /// Logical negation, pushed through comparisons and double negations.
    pub fn negate(&self) -> Expr {
        match self {
            Expr::Bool(b) => Expr::Bool(!b),
            Expr::Unary(UnOp::Not, inner) => (**inner).clone(),
            Expr::Binary(op, l, r) if op.is_comparison() => match op.negated() {
                Some(neg) => Expr::Binary(neg, l.clone(), r.clone()),
                None => Expr::Unary(UnOp::Not, Box::new(self.clone())),
            },
            _ => Expr::Unary(UnOp::Not, Box::new(self.clone())),
        }
    }

    /// Whether the expression can only evaluate to a boolean (or is a symbol
    /// or call whose type is decided elsewhere).
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Bool(_) | Expr::Sym(_) | Expr::Call(..) | Expr::Subscript(..) => true,
            Expr::Unary(UnOp::Not, _) => true,
            Expr::Binary(op, ..) => {
                op.is_comparison() || matches!(op, BinOp::And | BinOp::Or)
            }
            _ => false,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Int(n) if *n < 0 => 7,
            Expr::Float(x) if *x < 0.0 => 7,
            Expr::Unary(UnOp::Neg, _) => 7,
            Expr::Unary(UnOp::Not, _) => 3,
            Expr::Binary(op, ..) => op.precedence(),
            _ => 9,
        }
    }

    // ── Traversal ──

    /// All names referenced: symbols, called functions excluded, subscripted
    /// containers included.
    pub fn free_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Bool(_) => {}
            Expr::Sym(s) => {
                out.insert(s.clone());
            }
            Expr::Unary(_, e) => e.collect_names(out),
            Expr::Binary(_, l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_names(out);
                }
            }
            Expr::Subscript(data, subset) => {
                out.insert(data.clone());
                out.extend(subset.free_names());
            }
        }
    }

    /// Subscripted container accesses in evaluation order.
    pub fn subscripts(&self) -> Vec<(&str, &Subset)> {
        let mut out = Vec::new();
        self.collect_subscripts(&mut out);
        out
    }

    fn collect_subscripts<'a>(&'a self, out: &mut Vec<(&'a str, &'a Subset)>) {
        match self {
            Expr::Subscript(data, subset) => out.push((data.as_str(), subset)),
            Expr::Unary(_, e) => e.collect_subscripts(out),
            Expr::Binary(_, l, r) => {
                l.collect_subscripts(out);
                r.collect_subscripts(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_subscripts(out);
                }
            }
            _ => {}
        }
    }

    /// Replace symbols according to `map`; unmapped symbols are kept.
    pub fn subs_all(&self, map: &BTreeMap<String, Expr>) -> Expr {
        self.map_syms(&|s| map.get(s).cloned())
    }

    fn map_syms(&self, f: &dyn Fn(&str) -> Option<Expr>) -> Expr {
        match self {
            Expr::Sym(s) => f(s).unwrap_or_else(|| self.clone()),
            Expr::Unary(op, e) => Expr::Unary(*op, Box::new(e.map_syms(f))),
            Expr::Binary(op, l, r) => {
                Expr::Binary(*op, Box::new(l.map_syms(f)), Box::new(r.map_syms(f)))
            }
            Expr::Call(name, args) => {
                Expr::Call(name.clone(), args.iter().map(|a| a.map_syms(f)).collect())
            }
            Expr::Subscript(data, subset) => Expr::Subscript(data.clone(), subset.map_syms(f)),
            _ => self.clone(),
        }
    }

    // ── Evaluation ──

    /// Evaluate under integer bindings. Booleans evaluate to 0/1.
    /// Returns `None` for unbound symbols, floats, calls other than
    /// `min`/`max`, subscripts, division by zero and overflow.
    pub fn eval(&self, env: &BTreeMap<String, i64>) -> Option<i64> {
        match self {
            Expr::Int(n) => Some(*n),
            Expr::Bool(b) => Some(*b as i64),
            Expr::Float(_) | Expr::Subscript(..) => None,
            Expr::Sym(s) => env.get(s).copied(),
            Expr::Unary(UnOp::Neg, e) => e.eval(env)?.checked_neg(),
            Expr::Unary(UnOp::Not, e) => Some((e.eval(env)? == 0) as i64),
            Expr::Call(name, args) if (name == "min" || name == "max") && !args.is_empty() => {
                let vals: Option<Vec<i64>> = args.iter().map(|a| a.eval(env)).collect();
                let vals = vals?;
                if name == "min" {
                    vals.into_iter().min()
                } else {
                    vals.into_iter().max()
                }
            }
            Expr::Call(..) => None,
            Expr::Binary(op, l, r) => {
                let a = l.eval(env)?;
                let b = r.eval(env)?;
                match op {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    BinOp::Mul => a.checked_mul(b),
                    BinOp::Div => {
                        if b == 0 || a % b != 0 {
                            None
                        } else {
                            Some(a / b)
                        }
                    }
                    BinOp::FloorDiv => {
                        if b == 0 {
                            None
                        } else {
                            let q = a.checked_div(b)?;
                            if a % b != 0 && ((a < 0) != (b < 0)) {
                                Some(q - 1)
                            } else {
                                Some(q)
                            }
                        }
                    }
                    BinOp::Mod => {
                        if b == 0 {
                            None
                        } else {
                            Some(a.rem_euclid(b))
                        }
                    }
                    BinOp::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
                    BinOp::Lt => Some((a < b) as i64),
                    BinOp::Le => Some((a <= b) as i64),
                    BinOp::Gt => Some((a > b) as i64),
                    BinOp::Ge => Some((a >= b) as i64),
                    BinOp::Eq => Some((a == b) as i64),
                    BinOp::Ne => Some((a != b) as i64),
                    BinOp::And => Some((a != 0 && b != 0) as i64),
                    BinOp::Or => Some((a != 0 || b != 0) as i64),
                }
            }
        }
    }

    // ── Simplification ──

    /// Simplify: normalise linear arithmetic, fold constants, decide
    /// comparisons whose difference is constant, resolve decidable min/max.
    pub fn simplify(&self) -> Expr {
        let e = match self {
            Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(inner.simplify())),
            Expr::Binary(op, l, r) => Expr::Binary(*op, Box::new(l.simplify()), Box::new(r.simplify())),
            Expr::Call(name, args) => {
                Expr::Call(name.clone(), args.iter().map(|a| a.simplify()).collect())
            }
            Expr::Subscript(data, subset) => Expr::Subscript(data.clone(), subset.simplify()),
            _ => return self.clone(),
        };
        match &e {
            Expr::Unary(UnOp::Neg, _)
            | Expr::Binary(BinOp::Add | BinOp::Sub | BinOp::Mul, ..) => {
                match Linear::from_expr(&e) {
                    Some(lin) => lin.to_expr(),
                    None => e.clone(),
                }
            }
            Expr::Unary(UnOp::Not, inner) => match inner.as_ref() {
                Expr::Bool(_) | Expr::Unary(UnOp::Not, _) => inner.negate(),
                Expr::Binary(op, ..) if op.is_comparison() => inner.negate().simplify(),
                _ => e.clone(),
            },
            Expr::Binary(op, l, r) => match (op, l.as_ref(), r.as_ref()) {
                (BinOp::And, Expr::Bool(a), _) => if *a { (**r).clone() } else { Expr::Bool(false) },
                (BinOp::And, _, Expr::Bool(b)) => if *b { (**l).clone() } else { Expr::Bool(false) },
                (BinOp::Or, Expr::Bool(a), _) => if *a { Expr::Bool(true) } else { (**r).clone() },
                (BinOp::Or, _, Expr::Bool(b)) => if *b { Expr::Bool(true) } else { (**l).clone() },
                (op, _, _) if op.is_comparison() => match compare_const(l, r) {
                    Some(diff) => Expr::Bool(match op {
                        BinOp::Lt => diff < 0,
                        BinOp::Le => diff <= 0,
                        BinOp::Gt => diff > 0,
                        BinOp::Ge => diff >= 0,
                        BinOp::Eq => diff == 0,
                        _ => diff != 0,
                    }),
                    None => e.clone(),
                },
                (BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow, Expr::Int(_), Expr::Int(_)) => {
                    match e.eval(&BTreeMap::new()) {
                        Some(v) => Expr::Int(v),
                        None => e.clone(),
                    }
                }
                (BinOp::FloorDiv | BinOp::Div, _, Expr::Int(1)) => (**l).clone(),
                _ => e.clone(),
            },
            Expr::Call(name, args) if (name == "min" || name == "max") && args.len() == 2 => {
                match compare_const(&args[0], &args[1]) {
                    Some(diff) => {
                        let first = if name == "min" { diff <= 0 } else { diff >= 0 };
                        if first {
                            args[0].clone()
                        } else {
                            args[1].clone()
                        }
                    }
                    None => e.clone(),
                }
            }
            _ => e.clone(),
        }
    }

    /// The integer value if the expression simplifies to a constant.
    pub fn as_int(&self) -> Option<i64> {
        match self.simplify() {
            Expr::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Decompose into `coeff * param + rest` with an integer `coeff` and a
    /// `rest` that does not mention `param`. `None` if not affine in `param`.
    pub fn affine_in(&self, param: &str) -> Option<(i64, Expr)> {
        if !self.free_names().contains(param) {
            return Some((0, self.clone()));
        }
        let mut lin = Linear::from_expr(self)?;
        let coeff = match lin.terms.remove(param) {
            Some((_, c)) => c,
            None => 0,
        };
        // Any remaining atom mentioning the parameter is non-linear in it.
        if lin.terms.values().any(|(atom, _)| atom.free_names().contains(param)) {
            return None;
        }
        Some((coeff, lin.to_expr()))
    }
}

/// `lhs - rhs` as a constant, if the difference is structurally decidable.
pub fn compare_const(lhs: &Expr, rhs: &Expr) -> Option<i64> {
    let diff = Linear::from_expr(&Expr::sub(lhs.clone(), rhs.clone()))?;
    if diff.terms.is_empty() {
        Some(diff.constant)
    } else {
        None
    }
}

/// `Some(true)` if `lhs <= rhs` provably holds, `Some(false)` if it provably
/// fails, `None` if undecidable from structure alone.
pub fn prove_le(lhs: &Expr, rhs: &Expr) -> Option<bool> {
    compare_const(lhs, rhs).map(|d| d <= 0)
}

/// Symbolic minimum: picks a side when decidable, else `min(a, b)`.
pub fn sym_min(a: &Expr, b: &Expr) -> Expr {
    match prove_le(a, b) {
        Some(true) => a.clone(),
        Some(false) => b.clone(),
        None if a == b => a.clone(),
        None => Expr::Call("min".into(), vec![a.clone(), b.clone()]),
    }
}

/// Symbolic maximum: picks a side when decidable, else `max(a, b)`.
pub fn sym_max(a: &Expr, b: &Expr) -> Expr {
    match prove_le(a, b) {
        Some(true) => b.clone(),
        Some(false) => a.clone(),
        None if a == b => a.clone(),
        None => Expr::Call("max".into(), vec![a.clone(), b.clone()]),
    }
}

// ── Linear normal form ──────────────────────────────────────────────────────

/// `sum(coeff * atom) + constant`, atoms keyed by their printed form.
#[derive(Debug, Clone, PartialEq)]
struct Linear {
    terms: BTreeMap<String, (Expr, i64)>,
    constant: i64,
}

impl Linear {
    fn constant(c: i64) -> Linear {
        Linear {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    fn atom(e: Expr) -> Linear {
        let mut terms = BTreeMap::new();
        terms.insert(e.to_string(), (e, 1));
        Linear { terms, constant: 0 }
    }

    fn from_expr(e: &Expr) -> Option<Linear> {
        match e {
            Expr::Int(n) => Some(Linear::constant(*n)),
            Expr::Sym(_) => Some(Linear::atom(e.clone())),
            Expr::Unary(UnOp::Neg, inner) => Linear::from_expr(inner)?.scale(-1),
            Expr::Binary(BinOp::Add, l, r) => Linear::from_expr(l)?.combine(&Linear::from_expr(r)?, 1),
            Expr::Binary(BinOp::Sub, l, r) => Linear::from_expr(l)?.combine(&Linear::from_expr(r)?, -1),
            Expr::Binary(BinOp::Mul, l, r) => {
                let a = Linear::from_expr(l)?;
                let b = Linear::from_expr(r)?;
                if a.terms.is_empty() {
                    b.scale(a.constant)
                } else if b.terms.is_empty() {
                    a.scale(b.constant)
                } else {
                    // Canonical operand order so `N*M` and `M*N` coincide.
                    let (x, y) = (a.to_expr(), b.to_expr());
                    let prod = if x.to_string() <= y.to_string() {
                        Expr::mul(x, y)
                    } else {
                        Expr::mul(y, x)
                    };
                    Some(Linear::atom(prod))
                }
            }
            Expr::Float(_) | Expr::Bool(_) => None,
            Expr::Binary(op, ..) if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) => None,
            Expr::Unary(UnOp::Not, _) => None,
            // Integer-valued but non-linear: opaque atom.
            _ => Some(Linear::atom(e.clone())),
        }
    }

    fn scale(mut self, k: i64) -> Option<Linear> {
        if k == 0 {
            return Some(Linear::constant(0));
        }
        for (_, c) in self.terms.values_mut() {
            *c = c.checked_mul(k)?;
        }
        self.constant = self.constant.checked_mul(k)?;
        Some(self)
    }

    fn combine(mut self, other: &Linear, sign: i64) -> Option<Linear> {
        for (key, (atom, c)) in &other.terms {
            let add = c.checked_mul(sign)?;
            let entry = self.terms.entry(key.clone()).or_insert((atom.clone(), 0));
            entry.1 = entry.1.checked_add(add)?;
        }
        self.terms.retain(|_, (_, c)| *c != 0);
        self.constant = self.constant.checked_add(other.constant.checked_mul(sign)?)?;
        Some(self)
    }

    fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        for (atom, c) in self.terms.values() {
            let magnitude = c.unsigned_abs() as i64;
            let term = if magnitude == 1 {
                atom.clone()
            } else {
                Expr::mul(Expr::Int(magnitude), atom.clone())
            };
            acc = Some(match acc {
                None if *c < 0 => Expr::Unary(UnOp::Neg, Box::new(term)),
                None => term,
                Some(prev) if *c < 0 => Expr::sub(prev, term),
                Some(prev) => Expr::add(prev, term),
            });
        }
        match acc {
            None => Expr::Int(self.constant),
            Some(e) if self.constant > 0 => Expr::add(e, Expr::Int(self.constant)),
            Some(e) if self.constant < 0 => Expr::sub(e, Expr::Int(-self.constant)),
            Some(e) => e,
        }
    }
}

// ── Ranges and subsets ──────────────────────────────────────────────────────

/// A half-open strided range `begin:end:step` (end exclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub begin: Expr,
    pub end: Expr,
    pub step: Expr,
}

impl Range {
    pub fn new(begin: Expr, end: Expr, step: Expr) -> Range {
        Range { begin, end, step }
    }

    /// A single index `i` (i.e. `i:i+1`).
    pub fn index(i: Expr) -> Range {
        let end = Expr::add(i.clone(), Expr::Int(1)).simplify();
        Range {
            begin: i,
            end,
            step: Expr::Int(1),
        }
    }

    /// The whole extent `0:size`.
    pub fn full(size: Expr) -> Range {
        Range {
            begin: Expr::Int(0),
            end: size,
            step: Expr::Int(1),
        }
    }

    pub fn is_index(&self) -> bool {
        self.step == Expr::Int(1) && compare_const(&self.end, &self.begin) == Some(1)
    }

    /// Number of elements covered, `ceil((end - begin) / step)`.
    pub fn num_elements(&self) -> Expr {
        let extent = Expr::sub(self.end.clone(), self.begin.clone()).simplify();
        if self.step == Expr::Int(1) {
            return extent;
        }
        // ceil(a / s) == (a + s - 1) // s for positive s, (a + s + 1) // s for negative s
        let bias = match self.step.as_int() {
            Some(s) if s < 0 => 1,
            _ => -1,
        };
        let padded = Expr::add(Expr::add(extent, self.step.clone()), Expr::Int(bias)).simplify();
        Expr::binary(BinOp::FloorDiv, padded, self.step.clone()).simplify()
    }

    /// Sign of the step when it is a known constant.
    pub fn step_sign(&self) -> Option<i64> {
        self.step.as_int().map(i64::signum)
    }

    pub fn simplify(&self) -> Range {
        Range {
            begin: self.begin.simplify(),
            end: self.end.simplify(),
            step: self.step.simplify(),
        }
    }

    fn map_syms(&self, f: &dyn Fn(&str) -> Option<Expr>) -> Range {
        Range {
            begin: self.begin.map_syms(f),
            end: self.end.map_syms(f),
            step: self.step.map_syms(f),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_index() {
            return write!(f, "{}", self.begin);
        }
        write!(f, "{}:{}", self.begin, self.end)?;
        if self.step != Expr::Int(1) {
            write!(f, ":{}", self.step)?;
        }
        Ok(())
    }
}

/// A multi-dimensional subset: one range per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subset {
    pub dims: Vec<Range>,
}

impl Subset {
    pub fn new(dims: Vec<Range>) -> Subset {
        Subset { dims }
    }

    /// The full extent of a container with the given shape.
    pub fn full(shape: &[Expr]) -> Subset {
        Subset {
            dims: shape.iter().cloned().map(Range::full).collect(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn num_elements(&self) -> Expr {
        let mut acc = Expr::Int(1);
        for r in &self.dims {
            acc = Expr::mul(acc, r.num_elements());
        }
        acc.simplify()
    }

    pub fn free_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for r in &self.dims {
            out.extend(r.begin.free_names());
            out.extend(r.end.free_names());
            out.extend(r.step.free_names());
        }
        out
    }

    pub fn simplify(&self) -> Subset {
        Subset {
            dims: self.dims.iter().map(Range::simplify).collect(),
        }
    }

    pub fn subs_all(&self, map: &BTreeMap<String, Expr>) -> Subset {
        self.map_syms(&|s| map.get(s).cloned())
    }

    fn map_syms(&self, f: &dyn Fn(&str) -> Option<Expr>) -> Subset {
        Subset {
            dims: self.dims.iter().map(|r| r.map_syms(f)).collect(),
        }
    }

    /// Bounding-box union with another subset of the same dimensionality.
    /// Undecidable bounds become `min`/`max` expressions.
    pub fn union(&self, other: &Subset) -> Option<Subset> {
        if self.ndim() != other.ndim() {
            return None;
        }
        let dims = self
            .dims
            .iter()
            .zip(&other.dims)
            .map(|(a, b)| {
                Range::new(
                    sym_min(&a.begin, &b.begin),
                    sym_max(&a.end, &b.end),
                    common_step(a, b),
                )
            })
            .collect();
        Some(Subset { dims })
    }
}

/// The coarsest stride on which both ranges lie: the shared step when the
/// begins are in phase, their gcd with the begin offset otherwise.
fn common_step(a: &Range, b: &Range) -> Expr {
    if a.step != b.step {
        return Expr::Int(1);
    }
    match (compare_const(&a.begin, &b.begin), a.step.as_int()) {
        (Some(0), _) => a.step.clone(),
        (Some(d), Some(s)) if s != 0 => Expr::Int(gcd(s.abs(), d.abs())),
        _ => Expr::Int(1),
    }
}

/// Greatest common divisor of two non-negative integers.
pub fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Expr::Bool(true) => write!(f, "true"),
            Expr::Bool(false) => write!(f, "false"),
            Expr::Sym(s) => write!(f, "{s}"),
            Expr::Unary(op, inner) => {
                let prefix = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "not ",
                };
                if inner.precedence() < self.precedence() {
                    write!(f, "{prefix}({inner})")
                } else {
                    write!(f, "{prefix}{inner}")
                }
            }
            Expr::Binary(op, l, r) => {
                let p = op.precedence();
                let (left_paren, right_paren) = if *op == BinOp::Pow {
                    (l.precedence() <= p, r.precedence() < p)
                } else {
                    (l.precedence() < p, r.precedence() <= p)
                };
                if left_paren {
                    write!(f, "({l})")?;
                } else {
                    write!(f, "{l}")?;
                }
                write!(f, " {} ", op.symbol())?;
                if right_paren {
                    write!(f, "({r})")
                } else {
                    write!(f, "{r}")
                }
            }
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Subscript(data, subset) => write!(f, "{data}[{subset}]"),
        }
    }
}

// ── Text conversions (serde) ────────────────────────────────────────────────

impl From<Expr> for String {
    fn from(e: Expr) -> String {
        e.to_string()
    }
}

impl TryFrom<String> for Expr {
    type Error = String;

    fn try_from(text: String) -> Result<Expr, String> {
        crate::parser::parse_expr(&text).map_err(|d| d.message)
    }
}

impl From<Subset> for String {
    fn from(s: Subset) -> String {
        s.to_string()
    }
}

impl TryFrom<String> for Subset {
    type Error = String;

    fn try_from(text: String) -> Result<Subset, String> {
        if text.trim().is_empty() {
            return Ok(Subset::new(Vec::new()));
        }
        crate::parser::parse_subset(&text).map_err(|d| d.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n() -> Expr {
        Expr::sym("N")
    }

    fn i() -> Expr {
        Expr::sym("i")
    }

    #[test]
    fn linear_terms_cancel() {
        let e = Expr::sub(Expr::add(i(), Expr::Int(1)), i());
        assert_eq!(e.simplify(), Expr::Int(1));
    }

    #[test]
    fn simplify_orders_terms_and_constant() {
        let e = Expr::add(Expr::Int(3), Expr::add(Expr::mul(Expr::Int(2), i()), n()));
        assert_eq!(e.simplify().to_string(), "N + 2 * i + 3");
    }

    #[test]
    fn negative_constant_prints_as_subtraction() {
        let e = Expr::add(n(), Expr::Int(-1));
        assert_eq!(e.simplify().to_string(), "N - 1");
    }

    #[test]
    fn product_of_symbols_is_commutative_atom() {
        let a = Expr::mul(n(), Expr::sym("M"));
        let b = Expr::mul(Expr::sym("M"), n());
        assert_eq!(compare_const(&a, &b), Some(0));
    }

    #[test]
    fn negate_comparison() {
        let cond = Expr::binary(BinOp::Lt, i(), n());
        assert_eq!(cond.negate().to_string(), "i >= N");
        assert_eq!(cond.negate().negate(), cond);
    }

    #[test]
    fn decidable_comparison_folds() {
        let cond = Expr::binary(BinOp::Le, n(), Expr::add(n(), Expr::Int(2)));
        assert_eq!(cond.simplify(), Expr::Bool(true));
        let open = Expr::binary(BinOp::Lt, i(), n());
        assert_eq!(open.simplify(), open);
    }

    #[test]
    fn affine_decomposition() {
        let e = Expr::add(Expr::mul(Expr::Int(2), i()), Expr::sub(n(), Expr::Int(1)));
        let (coeff, rest) = e.affine_in("i").unwrap();
        assert_eq!(coeff, 2);
        assert_eq!(rest.to_string(), "N - 1");
        assert!(Expr::mul(i(), i()).affine_in("i").is_none());
        assert!(Expr::Subscript("idx".into(), Subset::new(vec![Range::index(i())]))
            .affine_in("i")
            .is_none());
    }

    #[test]
    fn eval_with_bindings() {
        let mut env = BTreeMap::new();
        env.insert("N".to_string(), 10);
        env.insert("i".to_string(), 3);
        let e = Expr::binary(BinOp::FloorDiv, Expr::sub(n(), i()), Expr::Int(2));
        assert_eq!(e.eval(&env), Some(3));
        assert_eq!(Expr::sym("M").eval(&env), None);
    }

    #[test]
    fn range_display_and_size() {
        let r = Range::full(n());
        assert_eq!(r.to_string(), "0:N");
        assert_eq!(r.num_elements(), n());
        let idx = Range::index(i());
        assert!(idx.is_index());
        assert_eq!(idx.to_string(), "i");
        let strided = Range::new(Expr::Int(0), Expr::Int(10), Expr::Int(3));
        assert_eq!(strided.num_elements(), Expr::Int(4));
    }

    #[test]
    fn subset_union_takes_bounding_box() {
        let a = Subset::new(vec![Range::new(Expr::Int(0), Expr::Int(4), Expr::Int(1))]);
        let b = Subset::new(vec![Range::new(Expr::Int(2), Expr::Int(8), Expr::Int(1))]);
        assert_eq!(a.union(&b).unwrap().to_string(), "0:8");
        let c = Subset::new(vec![Range::full(n())]);
        assert_eq!(a.union(&c).unwrap().to_string(), "0:max(4, N)");
    }

    #[test]
    fn descending_range_counts_its_elements() {
        let r = Range::new(Expr::Int(10), Expr::Int(0), Expr::Int(-1));
        assert_eq!(r.num_elements(), Expr::Int(10));
        let r = Range::new(Expr::Int(9), Expr::Int(0), Expr::Int(-2));
        assert_eq!(r.num_elements(), Expr::Int(5));
        assert_eq!(r.step_sign(), Some(-1));
        assert_eq!(Range::new(Expr::Int(0), n(), Expr::sym("K")).step_sign(), None);
    }

    #[test]
    fn union_of_strided_ranges_keeps_every_phase() {
        let range = |b: i64, e: i64, s: i64| Range::new(Expr::Int(b), Expr::Int(e), Expr::Int(s));
        let even = Subset::new(vec![range(0, 31, 2)]);
        let odd = Subset::new(vec![range(1, 32, 2)]);
        assert_eq!(even.union(&odd).unwrap().to_string(), "0:32");
        // In phase: the stride survives.
        let later = Subset::new(vec![range(4, 41, 2)]);
        assert_eq!(even.union(&later).unwrap().to_string(), "0:41:2");
        // Offset by a multiple of a common divisor.
        let fours = Subset::new(vec![range(0, 29, 4)]);
        let shifted = Subset::new(vec![range(2, 31, 4)]);
        assert_eq!(fours.union(&shifted).unwrap().to_string(), "0:31:2");
        // Unknown offset falls back to unit stride.
        let sym = Subset::new(vec![Range::new(n(), Expr::add(n(), Expr::Int(9)), Expr::Int(2))]);
        assert_eq!(even.union(&sym).unwrap().dims[0].step, Expr::Int(1));
    }

    #[test]
    fn display_parenthesizes_by_precedence() {
        let e = Expr::mul(Expr::add(i(), Expr::Int(1)), n());
        assert_eq!(e.to_string(), "(i + 1) * N");
        let e = Expr::sub(n(), Expr::sub(i(), Expr::Int(1)));
        assert_eq!(e.to_string(), "N - (i - 1)");
    }
}
