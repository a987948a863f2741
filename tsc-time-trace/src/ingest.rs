//! Streaming reduction of a trace into a flat list of closed spans
//!
//! tsc traces can reach hundreds of megabytes, so the top-level JSON array is
//! consumed through serde's `DeserializeSeed` machinery: one event is
//! materialized at a time, folded into the running reduction, and dropped.

use crate::ctf::{Duration, Timestamp, TraceEvent};
use crate::span::{Span, SpanEvent};
use log::warn;
use serde::de::{DeserializeSeed, SeqAccess, Visitor};
use serde_json as json;
use std::fmt::{self, Formatter};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Output of the trace reduction
#[derive(Debug, Default, PartialEq)]
pub struct ParseResult {
    /// Earliest span start observed
    pub min_time: Timestamp,

    /// Latest span end observed
    pub max_time: Timestamp,

    /// Closed spans whose duration reached the configured floor
    pub spans: Vec<Span>,

    /// Begin events still open at end of stream, in arrival order
    pub unclosed: Vec<OpenSpan>,
}

/// Begin event whose matching end was never seen
#[derive(Clone, Debug, PartialEq)]
pub struct OpenSpan {
    /// Operation that was started
    pub event: SpanEvent,

    /// When it was started
    pub start: Timestamp,
}

/// What can go wrong while reducing a trace
#[derive(Error, Debug)]
pub enum IngestError {
    /// Failed to open or read the trace file
    #[error("failed to read trace ({0})")]
    Io(#[from] io::Error),

    /// The stream was not a well-formed JSON array of event objects
    #[error("failed to parse trace JSON ({0})")]
    Json(#[from] json::Error),
}

/// Reduce a trace file into closed spans
///
/// Spans shorter than `min_duration` microseconds are dropped on the spot so
/// they never occupy memory.
pub fn parse_trace_file(
    path: impl AsRef<Path>,
    min_duration: Duration,
) -> Result<ParseResult, IngestError> {
    let reader = BufReader::new(File::open(path)?);
    parse_trace(reader, min_duration)
}

/// Reduce a trace byte stream into closed spans
pub fn parse_trace(reader: impl Read, min_duration: Duration) -> Result<ParseResult, IngestError> {
    let mut reducer = TraceReducer::new(min_duration);
    let mut deserializer = json::Deserializer::from_reader(reader);
    EventSink {
        reducer: &mut reducer,
    }
    .deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(reducer.finish())
}

/// Running reduction state
struct TraceReducer {
    /// Duration floor below which closed spans are discarded
    min_duration: Duration,

    /// Begin events awaiting their end event, in arrival order
    unclosed: Vec<OpenSpan>,

    /// Closed spans collected so far
    spans: Vec<Span>,

    /// Earliest span start observed
    min_time: Timestamp,

    /// Latest span end observed
    max_time: Timestamp,
}
//
impl TraceReducer {
    fn new(min_duration: Duration) -> Self {
        Self {
            min_duration,
            unclosed: Vec::new(),
            spans: Vec::new(),
            min_time: Timestamp::MAX,
            max_time: Timestamp::MIN,
        }
    }

    /// Fold one event into the reduction
    fn process(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::B(begin) => {
                self.unclosed.push(OpenSpan {
                    event: SpanEvent::decode(begin.name, begin.cat, begin.args),
                    start: begin.ts.0,
                });
            }

            TraceEvent::E(end) => match self.unclosed.pop() {
                Some(open) => self.record(open.event, open.start, end.ts.0),
                None => warn!("end event at {} µs with no matching begin", end.ts.0),
            },

            TraceEvent::X {
                duration_event: complete,
                dur,
            } => {
                let start = complete.ts.0;
                let event = SpanEvent::decode(complete.name, complete.cat, complete.args);
                self.record(event, start, start + dur.0);
            }

            // Metadata and instants carry no span information
            TraceEvent::M {} | TraceEvent::I {} => {}

            TraceEvent::Other => warn!("skipping event with unrecognized phase"),
        }
    }

    /// Close a span, keeping it only if it reaches the duration floor
    fn record(&mut self, event: SpanEvent, start: Timestamp, mut end: Timestamp) {
        if end < start {
            warn!(
                "span {:?} ends at {} µs before starting at {} µs, clamping",
                event.name(),
                end,
                start
            );
            end = start;
        }
        self.min_time = self.min_time.min(start);
        self.max_time = self.max_time.max(end);
        if end - start >= self.min_duration {
            self.spans.push(Span { event, start, end });
        }
    }

    /// Wrap up at end of stream
    fn finish(mut self) -> ParseResult {
        for open in &self.unclosed {
            warn!(
                "begin event {:?} at {} µs was never closed",
                open.event.name(),
                open.start
            );
            self.min_time = self.min_time.min(open.start);
            self.max_time = self.max_time.max(open.start);
        }
        if self.min_time > self.max_time {
            // Nothing was observed at all
            self.min_time = 0;
            self.max_time = 0;
        }
        ParseResult {
            min_time: self.min_time,
            max_time: self.max_time,
            spans: self.spans,
            unclosed: self.unclosed,
        }
    }
}

/// Seed that folds the top-level event array into a [`TraceReducer`]
///
/// Only values at the array's top level are delivered; each one is dropped as
/// soon as [`TraceReducer::process`] returns.
struct EventSink<'reducer> {
    reducer: &'reducer mut TraceReducer,
}
//
impl<'de> DeserializeSeed<'de> for EventSink<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}
//
impl<'de> Visitor<'de> for EventSink<'_> {
    type Value = ();

    fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("a JSON array of trace events")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(event) = seq.next_element::<TraceEvent>()? {
            self.reducer.process(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanKind;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn parse(json_str: &str, min_duration: Duration) -> ParseResult {
        parse_trace(json_str.as_bytes(), min_duration).expect("trace should parse")
    }

    #[test]
    fn empty_trace() {
        let result = parse("[]", 0);
        assert_eq!(result, ParseResult::default());
    }

    #[test]
    fn single_complete_event() {
        let result = parse(
            r#"[{"ph":"X","ts":0,"dur":1000000,"name":"root","cat":"x"}]"#,
            0,
        );
        assert_eq!(result.min_time, 0);
        assert_eq!(result.max_time, 1000000);
        assert_eq!(result.unclosed, vec![]);
        assert_matches!(&result.spans[..], [span] => {
            assert_eq!(span.event.name(), "root");
            assert_eq!(span.duration(), 1000000);
        });
    }

    #[test]
    fn nested_begin_end_pairs() {
        let result = parse(
            r#"[
                {"ph":"B","ts":0,"name":"outer","cat":"check"},
                {"ph":"B","ts":10,"name":"inner","cat":"check"},
                {"ph":"E","ts":50},
                {"ph":"E","ts":100}
            ]"#,
            0,
        );
        // Inner pairs close first, so the flat list is in end order
        assert_matches!(&result.spans[..], [inner, outer] => {
            assert_eq!((inner.event.name(), inner.start, inner.end), ("inner", 10, 50));
            assert_eq!((outer.event.name(), outer.start, outer.end), ("outer", 0, 100));
        });
        assert_eq!((result.min_time, result.max_time), (0, 100));
    }

    #[test]
    fn duration_floor() {
        let result = parse(
            r#"[
                {"ph":"X","ts":0,"dur":100,"name":"short","cat":"check"},
                {"ph":"X","ts":0,"dur":5000,"name":"long","cat":"check"}
            ]"#,
            1000,
        );
        assert_matches!(&result.spans[..], [span] => {
            assert_eq!(span.event.name(), "long");
        });
        // The discarded span still shaped the observed time range
        assert_eq!((result.min_time, result.max_time), (0, 5000));
    }

    #[test]
    fn unclosed_begin_at_eof() {
        let result = parse(r#"[{"ph":"B","ts":100,"name":"x","cat":"c"}]"#, 0);
        assert_eq!(result.spans, vec![]);
        assert_matches!(&result.unclosed[..], [open] => {
            assert_eq!(open.event.name(), "x");
            assert_eq!(open.start, 100);
        });
        assert_eq!((result.min_time, result.max_time), (100, 100));
    }

    #[test]
    fn stray_end_is_skipped() {
        let result = parse(
            r#"[
                {"ph":"E","ts":50},
                {"ph":"X","ts":0,"dur":10,"name":"a","cat":"check"}
            ]"#,
            0,
        );
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.unclosed, vec![]);
    }

    #[test]
    fn uninteresting_phases_are_dropped() {
        let result = parse(
            r#"[
                {"ph":"M","name":"process_name","ts":0,"args":{"name":"tsc"}},
                {"ph":"i","ts":5,"name":"mark"},
                {"ph":"C","ts":6,"name":"counter"},
                {"ph":"X","ts":0,"dur":10,"name":"a","cat":"check"}
            ]"#,
            0,
        );
        assert_eq!(result.spans.len(), 1);
    }

    #[test]
    fn textual_timestamps() {
        let result = parse(r#"[{"ph":"X","ts":"10","dur":"90","name":"a","cat":"check"}]"#, 0);
        assert_matches!(&result.spans[..], [span] => {
            assert_eq!((span.start, span.end), (10, 100));
        });
    }

    #[test]
    fn event_decoding_flows_through() {
        let result = parse(
            r#"[{"ph":"X","ts":0,"dur":700000,"name":"structuredTypeRelatedTo","cat":"check","args":{"sourceId":50,"targetId":60}}]"#,
            0,
        );
        assert_eq!(result.spans[0].event.kind(), SpanKind::StructuredTypeRelatedTo);
    }

    #[test]
    fn malformed_json() {
        assert_matches!(
            parse_trace(&br#"[{"ph":"X","ts":0"#[..], 0),
            Err(IngestError::Json(_))
        );
        assert_matches!(
            parse_trace(&br#"{"not":"an array"}"#[..], 0),
            Err(IngestError::Json(_))
        );
        assert_matches!(parse_trace(&b"[] trailing"[..], 0), Err(IngestError::Json(_)));
    }
}
