//! Parent/child tree of the spans worth looking at
//!
//! The flat span list from ingestion is arranged under a synthetic root with
//! a single sorted sweep, and spans that are neither long in absolute terms
//! nor dominant relative to their parent are dropped along the way.

use crate::ctf::{Duration, Timestamp};
use crate::ingest::ParseResult;
use crate::span::{Span, SpanEvent};
use crate::types::TypeTree;

/// Index of a node inside a [`SpanTree`]
pub type SpanId = usize;

/// Index of the synthetic root node
pub const ROOT: SpanId = 0;

/// Knobs of the duration-and-dominance promotion policy
#[derive(Clone, Debug, PartialEq)]
pub struct Thresholds {
    /// Duration above which a span is always promoted, in microseconds
    pub threshold_duration: Duration,

    /// Duration below which a span is discarded during ingestion
    pub min_duration: Duration,

    /// Fraction of the parent duration above which a span is promoted
    pub min_percentage: f64,
}
//
impl Default for Thresholds {
    fn default() -> Self {
        Self {
            threshold_duration: 500_000,
            min_duration: 100_000,
            min_percentage: 0.6,
        }
    }
}

/// Tree of the spans promoted by the duration-and-dominance policy
#[derive(Debug, PartialEq)]
pub struct SpanTree {
    /// All promoted nodes; index [`ROOT`] is the synthetic root
    nodes: Vec<SpanNode>,
}
//
impl SpanTree {
    /// Arrange reduced spans into a tree
    ///
    /// Begin events that were still open at end of stream are treated as if
    /// they ended when the trace did.
    pub fn build(result: ParseResult, thresholds: &Thresholds) -> Self {
        let ParseResult {
            min_time,
            max_time,
            mut spans,
            unclosed,
        } = result;
        for open in unclosed {
            spans.push(Span {
                event: open.event,
                start: open.start,
                end: max_time,
            });
        }
        // Stable, so arrival order breaks timestamp ties
        spans.sort_by_key(|span| span.start);

        let mut nodes = vec![SpanNode {
            start: min_time,
            end: max_time,
            event: None,
            children: Vec::new(),
            type_tree: None,
        }];

        // Spine of currently-open ancestors, root included
        let mut ancestors: Vec<SpanId> = vec![ROOT];
        for span in spans {
            while ancestors.len() > 1 {
                let top = ancestors[ancestors.len() - 1];
                if nodes[top].end <= span.start {
                    ancestors.pop();
                } else {
                    break;
                }
            }
            let parent = ancestors.last().copied().unwrap_or(ROOT);

            let duration = span.duration();
            let parent_duration = nodes[parent].end - nodes[parent].start;
            // A span with no extent dominates nothing, even a zero-length parent
            let dominant =
                duration > 0 && duration as f64 >= thresholds.min_percentage * parent_duration as f64;
            if duration >= thresholds.threshold_duration || dominant {
                let id = nodes.len();
                nodes.push(SpanNode {
                    start: span.start,
                    end: span.end,
                    event: Some(span.event),
                    children: Vec::new(),
                    type_tree: None,
                });
                nodes[parent].children.push(id);
                ancestors.push(id);
            }
        }

        Self { nodes }
    }

    /// Access a node by identifier
    pub fn node(&self, id: SpanId) -> &SpanNode {
        &self.nodes[id]
    }

    /// The synthetic root spanning the whole observed time range
    pub fn root(&self) -> &SpanNode {
        &self.nodes[ROOT]
    }

    /// Number of nodes, synthetic root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Truth that no span at all was promoted
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Attach type-comparison context to a node
    pub(crate) fn attach_type_tree(&mut self, id: SpanId, type_tree: TypeTree) {
        self.nodes[id].type_tree = Some(type_tree);
    }
}

/// One promoted span within the tree
#[derive(Debug, PartialEq)]
pub struct SpanNode {
    /// When the span started
    pub start: Timestamp,

    /// When the span ended
    pub end: Timestamp,

    /// Operation covered by the span; the synthetic root has none
    event: Option<SpanEvent>,

    /// Child spans in start-time order
    children: Vec<SpanId>,

    /// Type-comparison context, if attached
    type_tree: Option<TypeTree>,
}
//
impl SpanNode {
    /// Wall-clock extent of the span
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Operation covered by the span
    pub fn event(&self) -> Option<&SpanEvent> {
        self.event.as_ref()
    }

    /// Child spans in start-time order
    pub fn children(&self) -> &[SpanId] {
        &self.children
    }

    /// Type-comparison context, if attached
    pub fn type_tree(&self) -> Option<&TypeTree> {
        self.type_tree.as_ref()
    }

    /// Truth that no child span was promoted under this one
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
