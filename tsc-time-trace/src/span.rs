//! Handling of checker spans, that is, tsc-provided descriptions of what the
//! type checker was doing over an interval of time

use crate::ctf::{Duration, EventCategories, Timestamp};
use phf::phf_map;
use serde_json as json;
use std::collections::HashMap;

/// Event names that receive dedicated treatment downstream
static SPAN_KINDS: phf::Map<&'static str, SpanKind> = phf_map! {
    "checkSourceFile" => SpanKind::CheckSourceFile,
    "structuredTypeRelatedTo" => SpanKind::StructuredTypeRelatedTo,
    "getVariancesWorker" => SpanKind::GetVariancesWorker,
};

/// Checker operation which a trace event describes
#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    /// Name of the event, as featured in the JSON data
    name: Box<str>,

    /// Machine identifier for the operations we know how to interpret
    kind: SpanKind,

    /// Supplementary data received as arguments, if any
    args: SpanArgs,
}
//
impl SpanEvent {
    /// Decode the useful bits of a duration or complete event
    ///
    /// Unknown names and categories are not an error: they decode to
    /// [`SpanKind::Other`] with their raw arguments preserved, so that new
    /// tsc event types degrade gracefully.
    pub fn decode(
        name: Option<Box<str>>,
        cat: Option<EventCategories>,
        mut args: Option<HashMap<Box<str>, json::Value>>,
    ) -> Self {
        let name = name.unwrap_or_default();
        let kind = match SPAN_KINDS.get(&*name) {
            Some(kind) => *kind,
            None if cat.as_ref().is_some_and(|c| c.contains("check")) => SpanKind::Check,
            None => SpanKind::Other,
        };
        let args = match kind {
            SpanKind::CheckSourceFile => SpanArgs::SourcePath {
                path: take_str(&mut args, "path"),
            },
            SpanKind::StructuredTypeRelatedTo => SpanArgs::TypeIds {
                source_id: take_u64(&mut args, "sourceId"),
                target_id: take_u64(&mut args, "targetId"),
            },
            SpanKind::GetVariancesWorker => SpanArgs::TypeId {
                id: take_u64(&mut args, "id"),
            },
            SpanKind::Check => SpanArgs::Range {
                pos: take_u64(&mut args, "pos"),
                end: take_u64(&mut args, "end"),
            },
            SpanKind::Other => SpanArgs::Other(args),
        };
        Self { name, kind, args }
    }

    /// Textual name of the operation, as featured in the JSON data
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation identifier that is cheap to compare or dispatch on
    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Decoded arguments of the operation
    pub fn args(&self) -> &SpanArgs {
        &self.args
    }
}

/// Extract a string argument by key
fn take_str(args: &mut Option<HashMap<Box<str>, json::Value>>, key: &str) -> Option<Box<str>> {
    match args.as_mut()?.remove(key)? {
        json::Value::String(s) => Some(s.into_boxed_str()),
        _ => None,
    }
}

/// Extract an unsigned integer argument by key
///
/// tsc writes these as JSON numbers, but decimal strings are tolerated the
/// same way timestamps are.
fn take_u64(args: &mut Option<HashMap<Box<str>, json::Value>>, key: &str) -> Option<u64> {
    let value = args.as_mut()?.remove(key)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Checker operations that the analysis knows how to interpret
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SpanKind {
    /// Type-checking of one source file, scopes a file path over its subtree
    CheckSourceFile,

    /// Structural comparison of two types
    StructuredTypeRelatedTo,

    /// Variance computation for a generic type
    GetVariancesWorker,

    /// Any other operation of the "check" category, carries a byte range
    Check,

    /// Operation with no dedicated interpretation
    Other,
}

/// Supplementary argument data for each kind of span
#[derive(Clone, Debug, PartialEq)]
pub enum SpanArgs {
    /// Path of the source file being checked
    SourcePath {
        /// Absolute path as recorded by tsc
        path: Option<Box<str>>,
    },

    /// Byte range of the construct being checked
    Range {
        /// Offset of the first byte, whitespace and comments included
        pos: Option<u64>,

        /// Offset one past the last byte
        end: Option<u64>,
    },

    /// Identifiers of the two types being compared
    TypeIds {
        /// Source type of the comparison
        source_id: Option<u64>,

        /// Target type of the comparison
        target_id: Option<u64>,
    },

    /// Identifier of the type whose variance is being computed
    TypeId {
        /// Subject of the variance computation
        id: Option<u64>,
    },

    /// Raw key/value arguments of events we do not interpret
    Other(Option<HashMap<Box<str>, json::Value>>),
}

/// Closed time interval attributable to one checker operation
#[derive(Clone, Debug, PartialEq)]
pub struct Span {
    /// Operation that the time was spent on
    pub event: SpanEvent,

    /// When the operation started
    pub start: Timestamp,

    /// When the operation ended
    pub end: Timestamp,
}
//
impl Span {
    /// Wall-clock time spent on the operation, child operations included
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
