//! Find the hot spots of a tsc type-checking trace

#![deny(missing_docs)]

use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tsc_time_trace::{analyze_trace_file, PrintNode, Thresholds};

/// Exit status for command line misuse
const EXIT_USAGE: u8 = 1;
/// Exit status for a missing trace file
const EXIT_NO_TRACE: u8 = 2;
/// Exit status for a missing types dump
const EXIT_NO_TYPES: u8 = 3;
/// Exit status for any internal failure
const EXIT_INTERNAL: u8 = 4;

/// Turn a tsc --generateTrace dump into a tree of compilation hot spots
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Trace file produced by tsc --generateTrace
    trace_path: PathBuf,

    /// Companion types dump, for type-comparison context
    types_path: Option<PathBuf>,

    /// Write the hot spot tree as JSON to this path
    #[arg(long = "json")]
    json: Option<PathBuf>,

    /// Duration above which a span is always reported, in microseconds
    #[arg(long = "thresholdDuration", default_value_t = 500_000)]
    threshold_duration: u64,

    /// Duration below which a span is discarded outright, in microseconds
    #[arg(long = "minDuration", default_value_t = 100_000)]
    min_duration: u64,

    /// Fraction of its parent's duration a span must reach to be reported
    #[arg(long = "minPercentage", default_value_t = 0.6)]
    min_percentage: f64,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap already formats usage errors (and handles --help/--version)
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };
    if let Some(status) = validate(&args) {
        return ExitCode::from(status);
    }

    let thresholds = Thresholds {
        threshold_duration: args.threshold_duration,
        min_duration: args.min_duration,
        min_percentage: args.min_percentage,
    };
    let root = match analyze_trace_file(&args.trace_path, args.types_path.as_deref(), &thresholds) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    if root.children.is_empty() {
        println!("No hot spots found");
    } else {
        println!("Hot Spots");
        print_tree(&root.children, 0);
    }

    if let Some(json_path) = &args.json {
        if let Err(e) = write_json(json_path, &root) {
            eprintln!("failed to write {} ({e})", json_path.display());
            return ExitCode::from(EXIT_INTERNAL);
        }
    }
    ExitCode::SUCCESS
}

/// Check what clap cannot express: value ranges and input file presence
///
/// Returns the exit status to fail with, if any.
fn validate(args: &Args) -> Option<u8> {
    if !(args.min_percentage > 0.0 && args.min_percentage <= 1.0) {
        eprintln!(
            "minPercentage must lie within (0, 1], got {}",
            args.min_percentage
        );
        return Some(EXIT_USAGE);
    }
    if !args.trace_path.is_file() {
        eprintln!("trace file {} not found", args.trace_path.display());
        return Some(EXIT_NO_TRACE);
    }
    if let Some(types_path) = &args.types_path {
        if !types_path.is_file() {
            eprintln!("types file {} not found", types_path.display());
            return Some(EXIT_NO_TYPES);
        }
    }
    None
}

/// Print hot spots as an indented list, most expensive first
fn print_tree(nodes: &[PrintNode], depth: usize) {
    for node in nodes {
        let indent = "  ".repeat(depth + 1);
        match &node.time {
            Some(time) => println!("{indent}- {} ({time})", node.message),
            None => println!("{indent}- {}", node.message),
        }
        print_tree(&node.children, depth + 1);
    }
}

/// Persist the hot spot tree for downstream tooling
fn write_json(path: &PathBuf, root: &PrintNode) -> io::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, root)?;
    Ok(())
}
