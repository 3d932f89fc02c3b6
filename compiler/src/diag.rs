// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic type returned by every construction stage.
// Usage errors are reported by the adapter and the dataflow builder;
// structural errors by the dependency analyzer and the validator.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0102`, `E0404`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Program parser adapter (usage)
    pub const E0101: DiagCode = DiagCode("E0101"); // return type annotated
    pub const E0102: DiagCode = DiagCode("E0102"); // decorator args and annotations both given
    pub const E0103: DiagCode = DiagCode("E0103"); // argument count mismatch
    pub const E0104: DiagCode = DiagCode("E0104"); // partial annotations
    pub const E0105: DiagCode = DiagCode("E0105"); // no type source at all
    pub const E0106: DiagCode = DiagCode("E0106"); // external parser failure
    pub const E0107: DiagCode = DiagCode("E0107"); // malformed expression text

    // Dependency analysis (structural)
    pub const E0201: DiagCode = DiagCode("E0201"); // missing dependency summary
    pub const E0202: DiagCode = DiagCode("E0202"); // malformed primitive tree

    // Dataflow construction (usage)
    pub const E0301: DiagCode = DiagCode("E0301"); // unknown container
    pub const E0302: DiagCode = DiagCode("E0302"); // consume over a non-stream

    // Validation (structural)
    pub const E0401: DiagCode = DiagCode("E0401"); // access node without descriptor
    pub const E0402: DiagCode = DiagCode("E0402"); // connector without exactly one memlet
    pub const E0403: DiagCode = DiagCode("E0403"); // memlet on undeclared connector
    pub const E0404: DiagCode = DiagCode("E0404"); // memlet out of bounds
    pub const E0405: DiagCode = DiagCode("E0405"); // memlet dimensionality mismatch
    pub const E0406: DiagCode = DiagCode("E0406"); // bad start state / unreachable state
    pub const E0407: DiagCode = DiagCode("E0407"); // interstate edge to missing state
    pub const E0408: DiagCode = DiagCode("E0408"); // non-boolean guard
    pub const E0409: DiagCode = DiagCode("E0409"); // duplicate state label
    pub const E0410: DiagCode = DiagCode("E0410"); // scope entry/exit mismatch
    pub const E0411: DiagCode = DiagCode("E0411"); // cycle in a state's dataflow graph

    // Persistence
    pub const E0501: DiagCode = DiagCode("E0501"); // snapshot I/O or decode failure
    pub const E0502: DiagCode = DiagCode("E0502"); // configuration or bundle I/O or decode failure
}

// ── Kind ─────────────────────────────────────────────────────────────────

/// Which half of the error taxonomy a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    /// The caller supplied inconsistent input; construction did not proceed.
    Usage,
    /// An internal invariant of the primitive tree or the SDFG is broken.
    Structural,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any construction stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub kind: DiagKind,
    pub message: String,
    pub hint: Option<String>,
    /// Context lines, outermost first (e.g. `in state 's1'`).
    pub related: Vec<String>,
}

impl Diagnostic {
    pub fn usage(code: DiagCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: DiagKind::Usage,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn structural(code: DiagCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: DiagKind::Structural,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a context line.
    pub fn with_related(mut self, label: impl Into<String>) -> Self {
        self.related.push(label.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DiagKind::Usage => "usage error",
            DiagKind::Structural => "invalid SDFG",
        };
        write!(f, "{}[{}]: {}", kind, self.code, self.message)?;
        for label in &self.related {
            write!(f, "\n  note: {}", label)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_usage() {
        let d = Diagnostic::usage(codes::E0103, "expected 2 arguments");
        assert_eq!(format!("{d}"), "usage error[E0103]: expected 2 arguments");
    }

    #[test]
    fn display_structural_with_context() {
        let d = Diagnostic::structural(codes::E0402, "connector '__in_a' is dangling")
            .with_related("in state 's0'")
            .with_hint("run fill_scope_connectors before validation");
        assert_eq!(
            format!("{d}"),
            "invalid SDFG[E0402]: connector '__in_a' is dangling\n  note: in state 's0'\n  hint: run fill_scope_connectors before validation"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::usage(codes::E0301, "unknown container 'B'")
            .with_related("in state 's1'")
            .with_related("in tasklet 'assign_3'");
        assert_eq!(d.kind, DiagKind::Usage);
        assert_eq!(d.related.len(), 2);
        assert!(d.hint.is_none());
    }
}
