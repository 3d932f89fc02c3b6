// program.rs — Program parser adapter
//
// Resolves a kernel's parameter types (decorator arguments, inline
// annotations, or late-bound compilation arguments), classifies its host
// globals into constants and module aliases, and hands everything to an
// external parser that produces the primitive tree.
//
// Preconditions: none.
// Postconditions: on success the parser has been invoked exactly once and
//   the returned module aliases always map `builtins` to "".
// Failure modes: annotation rule violations (E0101–E0105) are reported
//   before the parser is invoked; parser failures become E0106.
// Side effects: none beyond the external parser's own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::DataDesc;
use crate::descriptor::{resolve_descriptor, HostValue};
use crate::diag::{codes, Diagnostic};
use crate::pdp::ParsedProgram;
use crate::symbolic::Expr;

/// Import alias → canonical module name (`np` → `numpy`).
pub type ModuleAliases = BTreeMap<String, String>;

/// A kernel as declared by the host program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KernelDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    /// Positional type arguments given to the kernel decorator.
    #[serde(default)]
    pub decorator_args: Vec<HostValue>,
    /// Inline parameter annotations, by parameter name.
    #[serde(default)]
    pub annotations: BTreeMap<String, HostValue>,
    #[serde(default)]
    pub return_annotation: Option<HostValue>,
    /// Names visible to the kernel body.
    #[serde(default)]
    pub globals: BTreeMap<String, HostValue>,
    /// Keyword constants bound at declaration time.
    #[serde(default)]
    pub kwargs: BTreeMap<String, HostValue>,
    #[serde(default)]
    pub source: String,
}

// ── Argument types ──────────────────────────────────────────────────────────

/// Resolve the descriptor of every parameter.
pub fn resolve_arg_types(
    kernel: &KernelDef,
    compilation_args: &[HostValue],
) -> Result<BTreeMap<String, DataDesc>, Diagnostic> {
    let has_args = !kernel.decorator_args.is_empty();
    let has_annotations = !kernel.annotations.is_empty();

    if kernel.return_annotation.is_some() {
        return Err(Diagnostic::usage(
            codes::E0101,
            format!("kernel '{}' declares a return type", kernel.name),
        )
        .with_hint("kernels return results by writing to output parameters"));
    }
    if has_args && has_annotations {
        return Err(Diagnostic::usage(
            codes::E0102,
            format!(
                "kernel '{}' has both decorator type arguments and parameter annotations",
                kernel.name
            ),
        )
        .with_hint("use either decorator arguments or annotations, not both"));
    }

    if has_args {
        if kernel.decorator_args.len() != kernel.params.len() {
            return Err(count_mismatch(kernel, "decorator arguments", kernel.decorator_args.len()));
        }
        return Ok(zip_descriptors(&kernel.params, &kernel.decorator_args));
    }

    if has_annotations {
        let complete = kernel.annotations.len() == kernel.params.len()
            && kernel.params.iter().all(|p| kernel.annotations.contains_key(p));
        if !complete {
            let missing: Vec<&str> = kernel
                .params
                .iter()
                .filter(|p| !kernel.annotations.contains_key(*p))
                .map(String::as_str)
                .collect();
            return Err(Diagnostic::usage(
                codes::E0104,
                format!(
                    "kernel '{}': either none or all parameters must be annotated",
                    kernel.name
                ),
            )
            .with_related(format!("unannotated: {}", missing.join(", "))));
        }
        return Ok(kernel
            .annotations
            .iter()
            .map(|(name, value)| (name.clone(), resolve_descriptor(value)))
            .collect());
    }

    if compilation_args.is_empty() {
        return Err(Diagnostic::usage(
            codes::E0105,
            format!("kernel '{}' has no parameter types", kernel.name),
        )
        .with_hint("annotate the parameters or supply compilation arguments"));
    }
    if compilation_args.len() != kernel.params.len() {
        return Err(count_mismatch(kernel, "compilation arguments", compilation_args.len()));
    }
    Ok(zip_descriptors(&kernel.params, compilation_args))
}

fn zip_descriptors(params: &[String], values: &[HostValue]) -> BTreeMap<String, DataDesc> {
    params
        .iter()
        .cloned()
        .zip(values.iter().map(resolve_descriptor))
        .collect()
}

fn count_mismatch(kernel: &KernelDef, what: &str, got: usize) -> Diagnostic {
    Diagnostic::usage(
        codes::E0103,
        format!(
            "kernel '{}': {} {} given, expecting {}",
            kernel.name,
            got,
            what,
            kernel.params.len()
        ),
    )
}

// ── Globals ─────────────────────────────────────────────────────────────────

/// How a host global is exposed to the kernel body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalClass {
    /// Injected as a compile-time constant.
    Constant,
    /// An imported module; the payload is its canonical name.
    Module(String),
    /// Not visible to the kernel.
    Ignored,
}

/// Decides which host globals a kernel may see.
pub trait GlobalClassifier {
    fn classify(&self, name: &str, value: &HostValue) -> GlobalClass;
}

/// Numeric scalars, symbols and type tags are constants; modules are
/// aliases; everything else is hidden.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl GlobalClassifier for DefaultClassifier {
    fn classify(&self, _name: &str, value: &HostValue) -> GlobalClass {
        match value {
            HostValue::Module { name } => GlobalClass::Module(name.clone()),
            v if v.is_constant() => GlobalClass::Constant,
            _ => GlobalClass::Ignored,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Globals {
    pub constants: BTreeMap<String, HostValue>,
    pub modules: ModuleAliases,
}

/// Split a kernel's globals into constants and module aliases.
pub fn collect_globals(kernel: &KernelDef, classifier: &dyn GlobalClassifier) -> Globals {
    let mut globals = Globals::default();
    for (name, value) in &kernel.globals {
        match classifier.classify(name, value) {
            GlobalClass::Constant => {
                globals.constants.insert(name.clone(), value.clone());
            }
            GlobalClass::Module(canonical) => {
                globals.modules.insert(name.clone(), canonical);
            }
            GlobalClass::Ignored => {}
        }
    }
    globals.modules.insert("builtins".to_string(), String::new());

    // Symbols are also reachable under their own name.
    let renamed: Vec<(String, HostValue)> = globals
        .constants
        .values()
        .filter_map(|v| match v {
            HostValue::Symbol { name, .. } => Some((name.clone(), v.clone())),
            _ => None,
        })
        .collect();
    globals.constants.extend(renamed);

    for (name, value) in &kernel.kwargs {
        if classifier.classify(name, value) == GlobalClass::Constant {
            globals.constants.insert(name.clone(), value.clone());
        }
    }
    globals
}

// ── External parser ─────────────────────────────────────────────────────────

/// Everything the front end needs to parse one kernel.
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub kernel: &'a KernelDef,
    pub argtypes: &'a BTreeMap<String, DataDesc>,
    pub constants: &'a BTreeMap<String, HostValue>,
    pub modules: &'a ModuleAliases,
}

/// A front end that turns a kernel into a primitive tree.
pub trait ExternalParser {
    fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedProgram, String>;
}

/// Serves a primitive tree that was parsed ahead of time, overlaying the
/// resolved parameter types and symbol constants.
#[derive(Debug, Clone)]
pub struct TreeParser {
    program: ParsedProgram,
}

impl TreeParser {
    pub fn new(program: ParsedProgram) -> TreeParser {
        TreeParser { program }
    }
}

impl ExternalParser for TreeParser {
    fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedProgram, String> {
        let mut program = self.program.clone();
        if program.name.is_empty() {
            program.name = request.kernel.name.clone();
        }
        if program.source.is_empty() {
            program.source = request.kernel.source.clone();
        }
        for (name, desc) in request.argtypes {
            program.arrays.insert(name.clone(), desc.clone());
        }
        program.argtypes = request.argtypes.clone();

        let mut bindings = BTreeMap::new();
        for (name, value) in request.constants {
            if let HostValue::Symbol { name: sym, dtype } = value {
                program.symbols.entry(sym.clone()).or_insert(*dtype);
            }
            // Parameters shadow globals of the same name.
            if request.argtypes.contains_key(name) {
                continue;
            }
            if let Some(e) = value.as_expr() {
                if e != Expr::sym(name.clone()) {
                    bindings.insert(name.clone(), e);
                }
            }
        }
        for node in &mut program.body {
            node.subs_all(&bindings);
        }
        Ok(program)
    }
}

/// Resolve types, collect globals and run the external parser.
pub fn generate_pdp(
    kernel: &KernelDef,
    compilation_args: &[HostValue],
    classifier: &dyn GlobalClassifier,
    parser: &dyn ExternalParser,
) -> Result<(ParsedProgram, ModuleAliases), Diagnostic> {
    let argtypes = resolve_arg_types(kernel, compilation_args)?;
    let globals = collect_globals(kernel, classifier);
    log::debug!(
        "kernel '{}': {} parameters, {} constants, {} module aliases",
        kernel.name,
        argtypes.len(),
        globals.constants.len(),
        globals.modules.len()
    );
    let request = ParseRequest {
        kernel,
        argtypes: &argtypes,
        constants: &globals.constants,
        modules: &globals.modules,
    };
    let program = parser.parse(&request).map_err(|msg| {
        Diagnostic::usage(codes::E0106, format!("parsing kernel '{}' failed: {}", kernel.name, msg))
    })?;
    Ok((program, globals.modules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DType;
    use crate::pdp::ParsedNode;
    use std::cell::Cell;

    fn f64_array(n: usize) -> HostValue {
        HostValue::NumericArray {
            dtype: DType::Float64,
            shape: vec![n],
        }
    }

    fn kernel(params: &[&str]) -> KernelDef {
        KernelDef {
            name: "k".into(),
            params: params.iter().map(|s| s.to_string()).collect(),
            ..KernelDef::default()
        }
    }

    struct CountingParser {
        calls: Cell<u32>,
    }

    impl ExternalParser for CountingParser {
        fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedProgram, String> {
            self.calls.set(self.calls.get() + 1);
            Ok(ParsedProgram {
                name: request.kernel.name.clone(),
                source: String::new(),
                arrays: BTreeMap::new(),
                argtypes: request.argtypes.clone(),
                symbols: BTreeMap::new(),
                body: Vec::new(),
            })
        }
    }

    #[test]
    fn decorator_args_resolve_positionally() {
        let mut k = kernel(&["A", "n"]);
        k.decorator_args = vec![f64_array(8), HostValue::TypeTag { dtype: DType::Int32 }];
        let types = resolve_arg_types(&k, &[]).unwrap();
        assert_eq!(types["A"], DataDesc::array(DType::Float64, vec![Expr::Int(8)]));
        assert!(types["n"].is_scalar());
    }

    #[test]
    fn both_sources_rejected_before_parsing() {
        let mut k = kernel(&["A"]);
        k.decorator_args = vec![f64_array(4)];
        k.annotations.insert("A".into(), f64_array(4));
        let parser = CountingParser { calls: Cell::new(0) };
        let err = generate_pdp(&k, &[], &DefaultClassifier, &parser).unwrap_err();
        assert_eq!(err.code, codes::E0102);
        assert_eq!(parser.calls.get(), 0);
    }

    #[test]
    fn return_annotation_rejected() {
        let mut k = kernel(&[]);
        k.return_annotation = Some(HostValue::TypeTag { dtype: DType::Float64 });
        assert_eq!(resolve_arg_types(&k, &[]).unwrap_err().code, codes::E0101);
    }

    #[test]
    fn count_and_partial_annotation_errors() {
        let mut k = kernel(&["A", "B"]);
        k.decorator_args = vec![f64_array(4)];
        assert_eq!(resolve_arg_types(&k, &[]).unwrap_err().code, codes::E0103);

        let mut k = kernel(&["A", "B"]);
        k.annotations.insert("A".into(), f64_array(4));
        let err = resolve_arg_types(&k, &[]).unwrap_err();
        assert_eq!(err.code, codes::E0104);
        assert_eq!(err.related, vec!["unannotated: B".to_string()]);
    }

    #[test]
    fn compilation_args_are_the_last_resort() {
        let k = kernel(&["A"]);
        assert_eq!(resolve_arg_types(&k, &[]).unwrap_err().code, codes::E0105);
        assert_eq!(
            resolve_arg_types(&k, &[f64_array(2), f64_array(2)]).unwrap_err().code,
            codes::E0103
        );
        let types = resolve_arg_types(&k, &[HostValue::Float { v: 1.0 }]).unwrap();
        assert_eq!(types["A"], DataDesc::scalar(DType::Float64));
    }

    #[test]
    fn globals_are_classified() {
        let mut k = kernel(&[]);
        k.globals.insert("np".into(), HostValue::Module { name: "numpy".into() });
        k.globals.insert("alpha".into(), HostValue::Float { v: 0.5 });
        k.globals.insert("msg".into(), HostValue::Str { v: "hi".into() });
        k.globals.insert(
            "size".into(),
            HostValue::Symbol {
                name: "N".into(),
                dtype: DType::Int32,
            },
        );
        k.kwargs.insert("alpha".into(), HostValue::Float { v: 2.0 });

        let g = collect_globals(&k, &DefaultClassifier);
        assert_eq!(g.modules["np"], "numpy");
        assert_eq!(g.modules["builtins"], "");
        assert!(!g.constants.contains_key("msg"));
        assert!(g.constants.contains_key("size"));
        assert!(g.constants.contains_key("N"));
        assert_eq!(g.constants["alpha"], HostValue::Float { v: 2.0 });
    }

    #[test]
    fn parser_failure_is_reported() {
        struct Failing;
        impl ExternalParser for Failing {
            fn parse(&self, _: &ParseRequest<'_>) -> Result<ParsedProgram, String> {
                Err("unsupported statement".into())
            }
        }
        let mut k = kernel(&["A"]);
        k.decorator_args = vec![f64_array(4)];
        let err = generate_pdp(&k, &[], &DefaultClassifier, &Failing).unwrap_err();
        assert_eq!(err.code, codes::E0106);
        assert!(err.message.contains("unsupported statement"));
    }

    #[test]
    fn tree_parser_overlays_argtypes() {
        let tree = ParsedProgram {
            name: String::new(),
            source: String::new(),
            arrays: BTreeMap::new(),
            argtypes: BTreeMap::new(),
            symbols: BTreeMap::new(),
            body: Vec::new(),
        };
        let mut k = kernel(&["A"]);
        k.source = "def k(A): pass".into();
        k.decorator_args = vec![f64_array(4)];
        let (program, modules) =
            generate_pdp(&k, &[], &DefaultClassifier, &TreeParser::new(tree)).unwrap();
        assert_eq!(program.name, "k");
        assert_eq!(program.source, "def k(A): pass");
        assert!(program.arrays.contains_key("A"));
        assert_eq!(program.argtypes.len(), 1);
        assert_eq!(modules["builtins"], "");
    }

    #[test]
    fn tree_parser_substitutes_constants() {
        let tree: ParsedProgram = serde_json::from_str(
            r#"{"name": "scale", "body": [
                {"kind": "assign", "target": "A[0]", "value": "A[0] * alpha"},
                {"kind": "assign", "target": "A[size - 1]", "value": "0.0"}
            ]}"#,
        )
        .unwrap();
        let mut k = kernel(&["A"]);
        k.decorator_args = vec![f64_array(4)];
        k.globals.insert("alpha".into(), HostValue::Float { v: 0.5 });
        k.globals.insert(
            "size".into(),
            HostValue::Symbol {
                name: "N".into(),
                dtype: DType::Int64,
            },
        );
        let (program, _) =
            generate_pdp(&k, &[], &DefaultClassifier, &TreeParser::new(tree)).unwrap();
        match &program.body[0] {
            ParsedNode::Assign { value, .. } => assert_eq!(value.to_string(), "A[0] * 0.5"),
            other => panic!("unexpected {other:?}"),
        }
        match &program.body[1] {
            ParsedNode::Assign { target, .. } => assert_eq!(target.to_string(), "A[N - 1]"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(program.symbols["N"], DType::Int64);
    }
}
