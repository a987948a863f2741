//! Mapping of raw trace positions to human-meaningful source positions
//!
//! Check spans carry raw byte offsets into the file being checked, and type
//! descriptors carry raw line/column pairs. Both point at the start of a
//! construct, whitespace and comments included, so printing them verbatim is
//! misleading. This module gathers every position referenced by a span tree
//! and rewrites each one to the first non-trivia character at or after it.

mod scanner;

pub use scanner::normalize_positions;

use crate::span::{SpanArgs, SpanKind};
use crate::tree::{SpanId, SpanTree, ROOT};
use crate::types::TypeNode;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io;

/// Position as recorded in the trace, before normalization
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawPosition {
    /// Byte offset into the source file
    ///
    /// Negative values mark "end of the preceding token" requests. They are
    /// currently matched by absolute value like any other offset, but the
    /// sign is preserved so the policy can later be refined in one place.
    Offset(i64),

    /// 1-based line/column pair
    LineCol {
        /// 1-based line
        line: u64,

        /// 1-based column
        column: u64,
    },
}
//
impl RawPosition {
    /// Canonical key under which the normalized position is published
    pub fn key(&self) -> String {
        match *self {
            Self::Offset(offset) => offset.unsigned_abs().to_string(),
            Self::LineCol { line, column } => format!("{line},{column}"),
        }
    }
}

/// Position rewritten to the first non-trivia character at or after it
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NormalizedPosition {
    /// 1-based line of the target character
    pub line: u64,

    /// 1-based column of the target character
    pub column: u64,

    /// Byte offset of the target character
    pub offset: u64,
}

/// Raw positions referenced by a span tree, keyed by source file path
pub type PositionRequests = HashMap<Box<str>, Vec<RawPosition>>;

/// Gather every raw position that rendering the tree will need
pub fn collect_positions(tree: &SpanTree) -> PositionRequests {
    let mut requests = PositionRequests::new();
    collect_node(tree, ROOT, None, &mut requests);
    requests
}

fn collect_node(
    tree: &SpanTree,
    id: SpanId,
    current_file: Option<&str>,
    requests: &mut PositionRequests,
) {
    let node = tree.node(id);
    let mut current_file = current_file;
    if let Some(event) = node.event() {
        match event.args() {
            // A file check scopes its path over the whole subtree
            SpanArgs::SourcePath { path: Some(path) } if event.kind() == SpanKind::CheckSourceFile => {
                current_file = Some(path.as_ref());
            }
            &SpanArgs::Range { pos, end } => {
                if let Some(file) = current_file {
                    let entry = requests.entry(file.into()).or_default();
                    if let Some(pos) = pos {
                        entry.push(RawPosition::Offset(pos as i64));
                    }
                    if let Some(end) = end {
                        entry.push(RawPosition::Offset(-(end as i64)));
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(type_tree) = node.type_tree() {
        for root in &type_tree.0 {
            collect_type_locations(root, requests);
        }
    }
    for &child in node.children() {
        collect_node(tree, child, current_file, requests);
    }
}

fn collect_type_locations(node: &TypeNode, requests: &mut PositionRequests) {
    if let Some(location) = &node.location {
        requests
            .entry(location.path.clone())
            .or_default()
            .push(RawPosition::LineCol {
                line: location.line,
                column: location.column,
            });
    }
    for child in &node.children {
        collect_type_locations(child, requests);
    }
}

/// Normalized positions for every source file that could be read
#[derive(Debug, Default, PartialEq)]
pub struct PositionMap(HashMap<Box<str>, HashMap<String, NormalizedPosition>>);
//
impl PositionMap {
    /// Resolve gathered positions against the files on disk
    ///
    /// Files that cannot be opened or read are skipped: their positions stay
    /// unresolved and consumers fall back to printing raw offsets.
    pub fn resolve(requests: PositionRequests) -> Self {
        Self::resolve_with(requests, |path| fs::read_to_string(path))
    }

    /// Resolve gathered positions against an arbitrary source of file text
    pub fn resolve_with(
        requests: PositionRequests,
        read: impl Fn(&str) -> io::Result<String>,
    ) -> Self {
        let mut files = HashMap::with_capacity(requests.len());
        for (path, positions) in requests {
            let source = match read(&path) {
                Ok(source) => source,
                Err(e) => {
                    debug!("skipping {} positions of unreadable {path} ({e})", positions.len());
                    continue;
                }
            };
            let normalized = normalize_positions(&source, &positions);
            debug!("normalized {} positions in {path}", positions.len());
            files.insert(
                path,
                positions
                    .iter()
                    .map(RawPosition::key)
                    .zip(normalized)
                    .collect(),
            );
        }
        Self(files)
    }

    /// Look up the normalized equivalent of a raw position
    pub fn lookup(&self, file: &str, raw: &RawPosition) -> Option<&NormalizedPosition> {
        self.0.get(file)?.get(&raw.key())
    }
}
