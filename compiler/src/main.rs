use clap::Parser;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use sdfgc::config::Config;
use sdfgc::pass::PassId;
use sdfgc::pipeline::{parse_bundle, BuildOptions, Bundle};
use sdfgc::program::DefaultClassifier;
use sdfgc::sdfg::Sdfg;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Summary,
    Dot,
    Json,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "sdfgc",
    version,
    about = "SDFG construction — builds and validates stateful dataflow multigraphs from parsed kernels"
)]
struct Cli {
    /// Input kernel bundle (JSON)
    bundle: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// What to print for each kernel
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Apply strict transformations regardless of configuration
    #[arg(long, conflicts_with = "no_strict")]
    strict: bool,

    /// Never apply strict transformations
    #[arg(long)]
    no_strict: bool,

    /// Settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only build the named kernel
    #[arg(long)]
    kernel: Option<String>,

    /// Stop after the named stage (parse_program, analyze_deps, split_states,
    /// build_dataflow, propagate, transform, validate)
    #[arg(long)]
    stop_after: Option<String>,

    /// Print construction stages and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    if cli.verbose {
        eprintln!("sdfgc: bundle = {}", cli.bundle.display());
        eprintln!("sdfgc: emit   = {:?}", cli.emit);
    }

    // ── Settings ──
    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(d) => {
                eprintln!("sdfgc: {}", d);
                std::process::exit(2);
            }
        },
        None => Config::default(),
    };
    let mut options = BuildOptions::from_config(&config);
    options.verbose = cli.verbose;
    if cli.strict {
        options.strict = Some(true);
    } else if cli.no_strict {
        options.strict = Some(false);
    }
    if let Some(name) = &cli.stop_after {
        match PassId::from_name(name) {
            Some(p) => options.stop_after = Some(p),
            None => {
                eprintln!("sdfgc: error: unknown stage '{}'", name);
                std::process::exit(2);
            }
        }
    }

    // ── Read bundle ──
    let text = match std::fs::read_to_string(&cli.bundle) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sdfgc: error: {}: {}", cli.bundle.display(), e);
            std::process::exit(2);
        }
    };
    let mut bundle = match Bundle::from_json(&text) {
        Ok(b) => b,
        Err(d) => {
            eprintln!("sdfgc: {}: {}", cli.bundle.display(), d);
            std::process::exit(2);
        }
    };
    if let Some(name) = &cli.kernel {
        bundle.kernels.retain(|k| &k.kernel.name == name);
        if bundle.kernels.is_empty() {
            eprintln!("sdfgc: error: no kernel named '{}'", name);
            std::process::exit(2);
        }
    }
    if cli.verbose {
        eprintln!("sdfgc: {} kernels in bundle", bundle.kernels.len());
    }

    // ── Build ──
    let sdfgs = match parse_bundle(&bundle, &DefaultClassifier, &options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sdfgc: {}", e);
            std::process::exit(1);
        }
    };

    let rendered = match render(&sdfgs, &cli.emit) {
        Ok(r) => r,
        Err(d) => {
            eprintln!("sdfgc: {}", d);
            std::process::exit(1);
        }
    };

    // ── Output ──
    let written = match &cli.output {
        Some(path) => std::fs::write(path, rendered),
        None => std::io::stdout().write_all(rendered.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("sdfgc: error: writing output: {}", e);
        std::process::exit(2);
    }
}

fn render(
    sdfgs: &BTreeMap<String, Sdfg>,
    emit: &EmitStage,
) -> Result<String, sdfgc::diag::Diagnostic> {
    let mut out = String::new();
    match emit {
        EmitStage::Summary => {
            for sdfg in sdfgs.values() {
                out.push_str(&sdfg.to_string());
            }
        }
        EmitStage::Dot => {
            for sdfg in sdfgs.values() {
                out.push_str(&sdfgc::dot::emit_dot(sdfg));
            }
        }
        EmitStage::Json => {
            let mut snapshots = serde_json::Map::new();
            for (name, sdfg) in sdfgs {
                let value = serde_json::to_value(sdfg).map_err(|e| {
                    sdfgc::diag::Diagnostic::usage(
                        sdfgc::diag::codes::E0501,
                        format!("encoding SDFG '{name}': {e}"),
                    )
                })?;
                snapshots.insert(name.clone(), value);
            }
            out = serde_json::Value::Object(snapshots).to_string();
            out.push('\n');
        }
        EmitStage::Fingerprint => {
            for sdfg in sdfgs.values() {
                out.push_str(&sdfgc::persist::Provenance::of(sdfg)?.to_json());
                out.push('\n');
            }
        }
    }
    Ok(out)
}
