// config.rs — Construction settings
//
// Mirrors the sections a user can override in a JSON settings file. Every
// field has a default so partial files are accepted.
//
// Preconditions: none.
// Postconditions: `Config::default()` enables state fusion and memlet
//   propagation and disables drawing.
// Failure modes: unreadable or malformed settings file (E0502).
// Side effects: `load` reads a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub optimizer: OptimizerConfig,
    pub frontend: FrontendConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Apply strict transformations when the caller leaves `strict` unset.
    pub automatic_state_fusion: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            automatic_state_fusion: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub propagate_memlets: bool,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        FrontendConfig {
            propagate_memlets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write `<dot_dir>/<name>.dot` before and after strict transformations.
    pub draw_dot: bool,
    pub dot_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            draw_dot: false,
            dot_dir: PathBuf::from("_dotgraphs"),
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, Diagnostic> {
        serde_json::from_str(text)
            .map_err(|e| Diagnostic::usage(codes::E0502, format!("malformed settings: {e}")))
    }

    pub fn load(path: &Path) -> Result<Config, Diagnostic> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::usage(codes::E0502, format!("reading {}: {e}", path.display()))
        })?;
        Config::from_json(&text).map_err(|d| d.with_related(format!("in {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert!(c.optimizer.automatic_state_fusion);
        assert!(c.frontend.propagate_memlets);
        assert!(!c.output.draw_dot);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c = Config::from_json(r#"{"optimizer": {"automatic_state_fusion": false}}"#).unwrap();
        assert!(!c.optimizer.automatic_state_fusion);
        assert!(c.frontend.propagate_memlets);
        assert_eq!(c.output.dot_dir, PathBuf::from("_dotgraphs"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let err = Config::from_json("{optimizer: 1}").unwrap_err();
        assert_eq!(err.code, codes::E0502);
    }
}
