// sdfgc — SDFG construction core
//
// Library root. Construction stages in pipeline order:
//   descriptor → program → depanalysis → splitter → builder → propagate →
//   transform → validate
// with the IR (sdfg, dataflow, pdp), symbolic expressions (symbolic, lexer,
// parser) and outputs (dot, persist) alongside.

pub mod builder;
pub mod config;
pub mod data;
pub mod dataflow;
pub mod depanalysis;
pub mod descriptor;
pub mod diag;
pub mod dot;
pub mod id;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pdp;
pub mod persist;
pub mod pipeline;
pub mod program;
pub mod propagate;
pub mod sdfg;
pub mod splitter;
pub mod symbolic;
pub mod transform;
pub mod validate;
