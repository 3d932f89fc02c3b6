// pipeline.rs — SDFG construction driver
//
// Runs the construction stages in order for one kernel:
//   parse_program → analyze_deps → split_states → build_dataflow →
//   propagate → transform → validate
// and for every kernel of a bundle.
//
// Preconditions: none.
// Postconditions: on success the returned SDFG has passed validation (unless
//   the caller stopped earlier with `BuildOptions::stop_after`).
// Failure modes: the first failing stage aborts; `PipelineError` names it and
//   carries its diagnostic.
// Side effects: optional DOT files (before and after strict transformations);
//   verbose timing lines on stderr.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::builder::build_dataflow_graph;
use crate::config::Config;
use crate::data::DType;
use crate::depanalysis::analyze;
use crate::descriptor::HostValue;
use crate::diag::{codes, Diagnostic};
use crate::pass::{required_passes, PassId};
use crate::pdp::{ParsedProgram, Pdp};
use crate::program::{generate_pdp, ExternalParser, GlobalClassifier, KernelDef, TreeParser};
use crate::propagate::propagate_sdfg;
use crate::sdfg::Sdfg;
use crate::splitter::create_states;
use crate::transform::{apply_strict_transformations, StateSummaries};
use crate::validate::validate_sdfg;

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Apply strict transformations; `None` defers to `automatic_state_fusion`.
    pub strict: Option<bool>,
    pub automatic_state_fusion: bool,
    pub propagate_memlets: bool,
    /// Directory for DOT drawings, if drawing is enabled.
    pub dot_dir: Option<PathBuf>,
    /// Last stage to run.
    pub stop_after: Option<PassId>,
    /// Print per-stage timing to stderr.
    pub verbose: bool,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> BuildOptions {
        BuildOptions {
            strict: None,
            automatic_state_fusion: config.optimizer.automatic_state_fusion,
            propagate_memlets: config.frontend.propagate_memlets,
            dot_dir: config
                .output
                .draw_dot
                .then(|| config.output.dot_dir.clone()),
            stop_after: None,
            verbose: false,
        }
    }

    pub fn strict_enabled(&self) -> bool {
        self.strict.unwrap_or(self.automatic_state_fusion)
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions::from_config(&Config::default())
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Construction failed in `stage`.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {diagnostic}")]
pub struct PipelineError {
    pub stage: PassId,
    #[source]
    pub diagnostic: Diagnostic,
}

// ── Stage timing ───────────────────────────────────────────────────────────

struct Stages {
    passes: Vec<PassId>,
    verbose: bool,
}

impl Stages {
    fn new(options: &BuildOptions) -> Stages {
        Stages {
            passes: required_passes(options.stop_after.unwrap_or(PassId::Validate)),
            verbose: options.verbose,
        }
    }

    fn wants(&self, stage: PassId) -> bool {
        self.passes.contains(&stage)
    }

    /// Run one stage: time it, report it, tag its failure.
    fn run<T>(
        &self,
        stage: PassId,
        f: impl FnOnce() -> Result<T, Diagnostic>,
    ) -> Result<T, PipelineError> {
        let t = Instant::now();
        let result = f();
        let elapsed = t.elapsed();
        if self.verbose {
            eprintln!(
                "sdfgc: {} complete, {:.1}ms",
                stage,
                elapsed.as_secs_f64() * 1000.0
            );
        }
        log::debug!("stage {} finished in {:?}", stage, elapsed);
        result.map_err(|diagnostic| PipelineError { stage, diagnostic })
    }
}

// ── Driver ─────────────────────────────────────────────────────────────────

/// Construct and validate the SDFG of one kernel.
pub fn parse_from_kernel(
    kernel: &KernelDef,
    compilation_args: &[HostValue],
    classifier: &dyn GlobalClassifier,
    parser: &dyn ExternalParser,
    options: &BuildOptions,
) -> Result<Sdfg, PipelineError> {
    let stages = Stages::new(options);

    let (pdp, modules, mut sdfg) = stages.run(PassId::ParseProgram, || {
        let (parsed, modules) = generate_pdp(kernel, compilation_args, classifier, parser)?;
        let pdp = Pdp::from_parsed(parsed);
        let mut sdfg = Sdfg::new(pdp.name.clone());
        if !pdp.source.is_empty() {
            sdfg.set_source(pdp.source.clone());
        }
        register_data(&mut sdfg, &pdp);
        Ok((pdp, modules, sdfg))
    })?;
    if !stages.wants(PassId::AnalyzeDeps) {
        return Ok(sdfg);
    }

    let deps = stages.run(PassId::AnalyzeDeps, || analyze(&pdp))?;
    if !stages.wants(PassId::SplitStates) {
        return Ok(sdfg);
    }

    let buckets = stages.run(PassId::SplitStates, || {
        let buckets = create_states(&pdp, &mut sdfg)?;
        register_loop_symbols(&mut sdfg);
        sdfg.label_states();
        Ok(buckets)
    })?;
    let mut summaries: StateSummaries = buckets
        .iter()
        .map(|(state, prims)| (*state, deps.merged(prims)))
        .collect();
    if !stages.wants(PassId::BuildDataflow) {
        return Ok(sdfg);
    }

    stages.run(PassId::BuildDataflow, || {
        for (state, prims) in &buckets {
            build_dataflow_graph(&mut sdfg, *state, prims, &pdp, &modules)?;
        }
        let ids: Vec<_> = sdfg.state_ids().collect();
        for id in ids {
            if let Some(state) = sdfg.state_mut(id) {
                state.graph.fill_scope_connectors();
            }
        }
        Ok(())
    })?;
    if !stages.wants(PassId::Propagate) {
        return Ok(sdfg);
    }

    if options.propagate_memlets {
        stages.run(PassId::Propagate, || {
            propagate_sdfg(&mut sdfg);
            Ok(())
        })?;
    }
    draw(&sdfg, options);
    if !stages.wants(PassId::Transform) {
        return Ok(sdfg);
    }

    if options.strict_enabled() {
        stages.run(PassId::Transform, || {
            apply_strict_transformations(&mut sdfg, &mut summaries);
            Ok(())
        })?;
        draw(&sdfg, options);
    }
    if !stages.wants(PassId::Validate) {
        return Ok(sdfg);
    }

    stages.run(PassId::Validate, || validate_sdfg(&sdfg))?;
    log::info!(
        "built '{}': {} states, {} transitions",
        sdfg.name,
        sdfg.num_states(),
        sdfg.edges().len()
    );
    Ok(sdfg)
}

/// Register every container and the symbol table. Scalar parameters and
/// parameters without a container are symbols, overriding earlier types.
fn register_data(sdfg: &mut Sdfg, pdp: &Pdp) {
    for (name, desc) in pdp.all_arrays() {
        sdfg.add_datadesc(name.clone(), desc.clone());
    }
    sdfg.clear_symbols();
    for (name, desc) in &pdp.argtypes {
        if !pdp.all_arrays().contains_key(name) || desc.is_scalar() {
            sdfg.add_symbol(name.clone(), desc.dtype, true);
        }
    }
    for (name, dtype) in &pdp.symbols {
        sdfg.add_symbol(name.clone(), *dtype, false);
    }
}

/// Loop variables assigned on transitions are integer symbols.
fn register_loop_symbols(sdfg: &mut Sdfg) {
    let targets: Vec<String> = sdfg
        .edges()
        .iter()
        .flat_map(|e| e.assignments.iter().map(|(name, _)| name.clone()))
        .collect();
    for name in targets {
        if !sdfg.arrays().contains_key(&name) {
            sdfg.add_symbol(name, DType::Int64, false);
        }
    }
}

fn draw(sdfg: &Sdfg, options: &BuildOptions) {
    let Some(dir) = &options.dot_dir else {
        return;
    };
    if let Err(e) = sdfg.draw_to_file(dir) {
        log::warn!("could not draw '{}' into {}: {}", sdfg.name, dir.display(), e);
    }
}

// ── Bundles ────────────────────────────────────────────────────────────────

/// One kernel with its compilation arguments and pre-parsed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(flatten)]
    pub kernel: KernelDef,
    #[serde(default)]
    pub args: Vec<HostValue>,
    pub program: ParsedProgram,
}

/// Every kernel of one host file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub kernels: Vec<BundleEntry>,
}

impl Bundle {
    pub fn from_json(text: &str) -> Result<Bundle, Diagnostic> {
        serde_json::from_str(text)
            .map_err(|e| Diagnostic::usage(codes::E0502, format!("malformed kernel bundle: {e}")))
    }
}

/// Construct every kernel of `bundle`, keyed by kernel name.
pub fn parse_bundle(
    bundle: &Bundle,
    classifier: &dyn GlobalClassifier,
    options: &BuildOptions,
) -> Result<BTreeMap<String, Sdfg>, PipelineError> {
    let mut out = BTreeMap::new();
    for entry in &bundle.kernels {
        let parser = TreeParser::new(entry.program.clone());
        let sdfg = parse_from_kernel(&entry.kernel, &entry.args, classifier, &parser, options)?;
        out.insert(entry.kernel.name.clone(), sdfg);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::DefaultClassifier;

    fn kernel() -> BundleEntry {
        serde_json::from_str(
            r#"{
                "name": "scale",
                "params": ["A", "B"],
                "annotations": {
                    "A": {"value": "numeric_array", "dtype": "float64", "shape": [8]},
                    "B": {"value": "numeric_array", "dtype": "float64", "shape": [8]}
                },
                "program": {
                    "name": "scale",
                    "body": [
                        {"kind": "map", "params": ["i"], "range": "0:8", "body": [
                            {"kind": "assign", "target": "B[i]", "value": "A[i] * 2.0"}]}
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    fn build(entry: &BundleEntry, options: &BuildOptions) -> Result<Sdfg, PipelineError> {
        let parser = TreeParser::new(entry.program.clone());
        parse_from_kernel(&entry.kernel, &entry.args, &DefaultClassifier, &parser, options)
    }

    #[test]
    fn builds_and_validates_a_map_kernel() {
        let sdfg = build(&kernel(), &BuildOptions::default()).unwrap();
        assert_eq!(sdfg.name, "scale");
        assert_eq!(sdfg.num_states(), 1);
        let g = &sdfg.state(sdfg.start_state().unwrap()).unwrap().graph;
        let outer = g
            .edges
            .iter()
            .find(|e| g.nodes[e.src.index()].is_access())
            .unwrap();
        assert_eq!(outer.memlet.subset.to_string(), "0:8");
        assert_eq!(outer.dst_conn.as_deref(), Some("IN_A"));
    }

    #[test]
    fn propagation_can_be_switched_off() {
        let mut options = BuildOptions::default();
        options.propagate_memlets = false;
        let sdfg = build(&kernel(), &options).unwrap();
        let g = &sdfg.state(sdfg.start_state().unwrap()).unwrap().graph;
        let outer = g
            .edges
            .iter()
            .find(|e| g.nodes[e.src.index()].is_access())
            .unwrap();
        // The placeholder already spans the whole container.
        assert_eq!(outer.memlet.volume.to_string(), "8");
    }

    #[test]
    fn stop_after_returns_a_partial_sdfg() {
        let mut options = BuildOptions::default();
        options.stop_after = Some(PassId::SplitStates);
        let sdfg = build(&kernel(), &options).unwrap();
        assert_eq!(sdfg.num_states(), 1);
        assert!(sdfg.state(sdfg.start_state().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn failing_stage_is_named() {
        let mut entry = kernel();
        entry.program.body = serde_json::from_str(
            r#"[{"kind": "assign", "target": "C[0]", "value": "A[0]"}]"#,
        )
        .unwrap();
        let err = build(&entry, &BuildOptions::default()).unwrap_err();
        assert_eq!(err.stage, PassId::BuildDataflow);
        assert_eq!(err.diagnostic.code, codes::E0301);
        assert!(err.to_string().starts_with("build_dataflow failed"));
    }

    #[test]
    fn strict_flag_overrides_config() {
        let mut options = BuildOptions::default();
        assert!(options.strict_enabled());
        options.strict = Some(false);
        assert!(!options.strict_enabled());
        options.automatic_state_fusion = false;
        options.strict = None;
        assert!(!options.strict_enabled());
    }

    #[test]
    fn bundle_builds_every_kernel() {
        let mut second = kernel();
        second.kernel.name = "scale2".into();
        second.program.name = "scale2".into();
        let bundle = Bundle {
            kernels: vec![kernel(), second],
        };
        let text = serde_json::to_string(&bundle).unwrap();
        let bundle = Bundle::from_json(&text).unwrap();
        let sdfgs = parse_bundle(&bundle, &DefaultClassifier, &BuildOptions::default()).unwrap();
        assert_eq!(sdfgs.keys().cloned().collect::<Vec<_>>(), vec!["scale", "scale2"]);
    }
}
