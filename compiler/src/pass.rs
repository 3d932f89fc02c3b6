// pass.rs — Stage descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the construction stages run by the pipeline driver, their
// dependency edges, and the artifacts they produce. The driver uses
// `required_passes` to run a prefix of the pipeline (`--stop-after`).

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each construction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    ParseProgram,
    AnalyzeDeps,
    SplitStates,
    BuildDataflow,
    Propagate,
    Transform,
    Validate,
}

/// Machine-readable artifact identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    ArgTypes,   // BTreeMap<String, DataDesc>
    Pdp,        // Pdp
    DepTable,   // DepTable
    States,     // Sdfg states + StateBuckets
    Dataflow,   // per-state DataflowGraph
    Memlets,    // propagated outer memlets
    Fused,      // fused Sdfg
    Validated,  // validated Sdfg
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a stage.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Stages whose outputs this stage consumes.
    pub inputs: &'static [PassId],
    /// Artifacts this stage produces.
    pub outputs: &'static [ArtifactId],
    /// Whether configuration can switch the stage off.
    pub optional: bool,
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given stage.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::ParseProgram => PassDescriptor {
            name: "parse_program",
            inputs: &[],
            outputs: &[ArtifactId::ArgTypes, ArtifactId::Pdp],
            optional: false,
            invariants: "argument types resolved, primitive ids in pre-order",
        },
        PassId::AnalyzeDeps => PassDescriptor {
            name: "analyze_deps",
            inputs: &[PassId::ParseProgram],
            outputs: &[ArtifactId::DepTable],
            optional: false,
            invariants: "every primitive has a read/write summary",
        },
        PassId::SplitStates => PassDescriptor {
            name: "split_states",
            inputs: &[PassId::AnalyzeDeps],
            outputs: &[ArtifactId::States],
            optional: false,
            invariants: "guards mutually exclusive, empty pass-through states elided",
        },
        PassId::BuildDataflow => PassDescriptor {
            name: "build_dataflow",
            inputs: &[PassId::SplitStates],
            outputs: &[ArtifactId::Dataflow],
            optional: false,
            invariants: "per-state graphs acyclic, scope connectors paired",
        },
        PassId::Propagate => PassDescriptor {
            name: "propagate",
            inputs: &[PassId::BuildDataflow],
            outputs: &[ArtifactId::Memlets],
            optional: true,
            invariants: "outer memlets cover every inner access",
        },
        PassId::Transform => PassDescriptor {
            name: "transform",
            inputs: &[PassId::Propagate],
            outputs: &[ArtifactId::Fused],
            optional: true,
            invariants: "no fusible state pair remains",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Transform],
            outputs: &[ArtifactId::Validated],
            optional: false,
            invariants: "no dangling connectors, no provably out-of-range memlets",
        },
    }
}

impl PassId {
    /// Look up a stage by its descriptor name.
    pub fn from_name(name: &str) -> Option<PassId> {
        ALL_PASSES.into_iter().find(|p| descriptor(*p).name == name)
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All stages in declaration order.
pub const ALL_PASSES: [PassId; 7] = [
    PassId::ParseProgram,
    PassId::AnalyzeDeps,
    PassId::SplitStates,
    PassId::BuildDataflow,
    PassId::Propagate,
    PassId::Transform,
    PassId::Validate,
];

/// Compute the minimal ordered set of stages needed to produce `terminal`.
/// Returns stages in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_validate_includes_all() {
        assert_eq!(required_passes(PassId::Validate), ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_split_is_minimal() {
        assert_eq!(
            required_passes(PassId::SplitStates),
            vec![
                PassId::ParseProgram,
                PassId::AnalyzeDeps,
                PassId::SplitStates
            ]
        );
    }

    #[test]
    fn names_round_trip() {
        for pass in ALL_PASSES {
            assert_eq!(PassId::from_name(descriptor(pass).name), Some(pass));
        }
        assert_eq!(PassId::from_name("codegen"), None);
    }

    #[test]
    fn only_propagate_and_transform_are_optional() {
        let optional: Vec<PassId> = ALL_PASSES
            .into_iter()
            .filter(|p| descriptor(*p).optional)
            .collect();
        assert_eq!(optional, vec![PassId::Propagate, PassId::Transform]);
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(!desc.outputs.is_empty(), "{:?} has no outputs", pass);
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass);
            for dep in desc.inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
