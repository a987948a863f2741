//! Ergonomic representation of the output from tsc's `--generateTrace`
//! profiling mode, with a mechanism to distill it into compilation hot spots.
//!
//! A trace is reduced in four stages: the event stream is folded into a flat
//! list of closed spans, the spans worth looking at are arranged into a tree,
//! relation-check leaves are optionally enriched with type context from the
//! companion types dump, and every raw source position referenced by the
//! tree is rewritten to the nearest following non-trivia character.

#![deny(missing_docs)]

mod ctf;
mod ingest;
mod positions;
mod render;
mod span;
mod tree;
mod types;

use std::io;
use std::path::Path;
use thiserror::Error;

// Reexport types which appear in the public interface
pub use self::{
    ctf::{Duration, Timestamp},
    ingest::{parse_trace, parse_trace_file, IngestError, OpenSpan, ParseResult},
    positions::{
        collect_positions, normalize_positions, NormalizedPosition, PositionMap, PositionRequests,
        RawPosition,
    },
    render::{render, render_root, PrintLocation, PrintNode},
    span::{Span, SpanArgs, SpanEvent, SpanKind},
    tree::{SpanId, SpanNode, SpanTree, Thresholds, ROOT},
    types::{attach_type_trees, TypeIndex, TypeLocation, TypeNode, TypeTree},
};

/// Distill a trace file into a presentable tree of hot spots
///
/// This is the whole pipeline in one call: reduce the trace, build the span
/// tree, attach type context when a types dump is given, normalize source
/// positions, and render. A root without children means no span made it past
/// the duration-and-dominance policy.
pub fn analyze_trace_file(
    trace_path: impl AsRef<Path>,
    types_path: Option<&Path>,
    thresholds: &Thresholds,
) -> Result<PrintNode, AnalysisError> {
    let parsed = parse_trace_file(trace_path, thresholds.min_duration)?;
    let mut tree = SpanTree::build(parsed, thresholds);
    if let Some(types_path) = types_path {
        let index = TypeIndex::from_file(types_path).map_err(AnalysisError::TypesIo)?;
        attach_type_trees(&mut tree, &index);
    }
    let positions = PositionMap::resolve(collect_positions(&tree));
    Ok(render_root(&tree, &positions))
}

/// What can go wrong while analyzing a trace
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Failed to read or reduce the trace file
    #[error("failed to analyze trace ({0})")]
    Ingest(#[from] IngestError),

    /// Failed to read the types dump file
    #[error("failed to read types dump ({0})")]
    TypesIo(#[source] io::Error),
}
