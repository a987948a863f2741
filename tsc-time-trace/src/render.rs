//! Conversion of an annotated span tree into a presentable hot-spot tree
//!
//! Rendering resolves raw byte offsets through the position map, spells out
//! one human-readable message per span, and orders children by descending
//! duration so the most expensive work reads first.

use crate::ctf::Duration;
use crate::positions::{PositionMap, RawPosition};
use crate::span::{SpanArgs, SpanEvent};
use crate::tree::{SpanId, SpanTree, ROOT};
use crate::types::TypeNode;
use serde::Serialize;

/// One node of the presentable hot-spot tree
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PrintNode {
    /// Kind tag, the originating event name for span nodes
    #[serde(rename = "type")]
    pub kind: Box<str>,

    /// Human-readable description
    pub message: Box<str>,

    /// Shorter description for cramped displays
    #[serde(rename = "terseMessage")]
    pub terse_message: Box<str>,

    /// Rounded duration, such as "1000ms"; absent on type context nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Box<str>>,

    /// Where the described construct starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<PrintLocation>,

    /// Where the described construct ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<PrintLocation>,

    /// Nested hot spots, most expensive first
    pub children: Vec<PrintNode>,
}

/// File/offset pair naming one end of a construct
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PrintLocation {
    /// Path of the source file
    pub file: Box<str>,

    /// Byte offset of the nearest non-trivia character, or the raw offset
    /// when the file could not be scanned
    pub offset: u64,
}

/// Render the hot spots of a span tree, most expensive first
pub fn render(tree: &SpanTree, positions: &PositionMap) -> Vec<PrintNode> {
    render_children(tree, ROOT, None, positions)
}

/// Render the whole tree under a single serializable root
///
/// The root's duration covers the observed time range; a root without
/// children means no span made it past the promotion policy.
pub fn render_root(tree: &SpanTree, positions: &PositionMap) -> PrintNode {
    PrintNode {
        kind: "root".into(),
        message: "Hot Spots".into(),
        terse_message: "Hot Spots".into(),
        time: Some(format_time(tree.root().duration())),
        start: None,
        end: None,
        children: render(tree, positions),
    }
}

fn render_children(
    tree: &SpanTree,
    id: SpanId,
    current_file: Option<&str>,
    positions: &PositionMap,
) -> Vec<PrintNode> {
    let mut rendered = tree
        .node(id)
        .children()
        .iter()
        .map(|&child| render_node(tree, child, current_file, positions))
        .collect::<Vec<_>>();
    // Stable, so equal durations keep start-time order
    rendered.sort_by_key(|&(duration, _)| std::cmp::Reverse(duration));
    rendered.into_iter().map(|(_, node)| node).collect()
}

fn render_node(
    tree: &SpanTree,
    id: SpanId,
    current_file: Option<&str>,
    positions: &PositionMap,
) -> (Duration, PrintNode) {
    let node = tree.node(id);
    let event = node.event().expect("only the root node has no event");

    let mut current_file = current_file;
    if let SpanArgs::SourcePath { path: Some(path) } = event.args() {
        current_file = Some(path.as_ref());
    }
    let mut children = render_children(tree, id, current_file, positions);

    let mut start = None;
    let mut end = None;
    let (message, terse_message) = match *event.args() {
        SpanArgs::SourcePath { ref path } => {
            let path = path.as_deref().unwrap_or("(unknown file)");
            (format!("Check file {path}"), path.to_owned())
        }
        SpanArgs::TypeIds {
            source_id,
            target_id,
        } => {
            if let Some(type_tree) = node.type_tree() {
                children.extend(type_tree.0.iter().map(|root| render_type_node(root, positions)));
            }
            (
                format!(
                    "Compare types {} and {}",
                    display_id(source_id),
                    display_id(target_id)
                ),
                "Compare types".to_owned(),
            )
        }
        SpanArgs::TypeId { id } => (
            format!("Determine variance of type {}", display_id(id)),
            "Determine variance".to_owned(),
        ),
        SpanArgs::Range { pos, end: range_end } => {
            let subject = event_subject(event);
            let from = describe_position(current_file, pos.map(|p| p as i64), positions);
            let to = describe_position(
                current_file,
                range_end.map(|e| -(e as i64)),
                positions,
            );
            start = print_location(current_file, pos.map(|p| p as i64), positions);
            end = print_location(current_file, range_end.map(|e| -(e as i64)), positions);
            (format!("Check {subject} from ({from}) to ({to})"), format!("Check {subject}"))
        }
        SpanArgs::Other(_) => (event.name().to_owned(), event.name().to_owned()),
    };

    let duration = node.duration();
    let print_node = PrintNode {
        kind: event.name().into(),
        message: message.into_boxed_str(),
        terse_message: terse_message.into_boxed_str(),
        time: Some(format_time(duration)),
        start,
        end,
        children,
    };
    (duration, print_node)
}

/// Type context attached to a relation check, as a timeless node
fn render_type_node(node: &TypeNode, positions: &PositionMap) -> PrintNode {
    let name = node
        .descriptor
        .get("symbolName")
        .or_else(|| node.descriptor.get("intrinsicName"))
        .and_then(|value| value.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            format!(
                "type {}",
                node.descriptor
                    .get("id")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0)
            )
        });
    let message = match &node.location {
        Some(location) => {
            let raw = RawPosition::LineCol {
                line: location.line,
                column: location.column,
            };
            let (line, column) = match positions.lookup(&location.path, &raw) {
                Some(normalized) => (normalized.line, normalized.column),
                None => (location.line, location.column),
            };
            format!("{name} at {}:{line}:{column}", location.path)
        }
        None => name.clone(),
    };
    PrintNode {
        kind: "type".into(),
        message: message.into_boxed_str(),
        terse_message: name.into_boxed_str(),
        time: None,
        start: None,
        end: None,
        children: node
            .children
            .iter()
            .map(|child| render_type_node(child, positions))
            .collect(),
    }
}

/// Human wording of a checked construct: "checkVariableDeclaration" is
/// spelled "variable declaration"
fn event_subject(event: &SpanEvent) -> String {
    let name = event.name().strip_prefix("check").unwrap_or(event.name());
    let mut subject = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !subject.is_empty() {
                subject.push(' ');
            }
            subject.extend(c.to_lowercase());
        } else {
            subject.push(c);
        }
    }
    if subject.is_empty() {
        subject.push_str(event.name());
    }
    subject
}

/// Spell a raw offset as a resolved position when the scan produced one
fn describe_position(
    file: Option<&str>,
    offset: Option<i64>,
    positions: &PositionMap,
) -> String {
    let Some(offset) = offset else {
        return "unknown position".to_owned();
    };
    match file.and_then(|file| positions.lookup(file, &RawPosition::Offset(offset))) {
        Some(normalized) => format!("line {}, col {}", normalized.line, normalized.column),
        None => format!("offset {}", offset.unsigned_abs()),
    }
}

fn print_location(
    file: Option<&str>,
    offset: Option<i64>,
    positions: &PositionMap,
) -> Option<PrintLocation> {
    let file = file?;
    let offset = offset?;
    let resolved = match positions.lookup(file, &RawPosition::Offset(offset)) {
        Some(normalized) => normalized.offset,
        None => offset.unsigned_abs(),
    };
    Some(PrintLocation {
        file: file.into(),
        offset: resolved,
    })
}

fn display_id(id: Option<u64>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "(unknown)".to_owned(),
    }
}

/// Round a microsecond duration to a millisecond display string
fn format_time(duration: Duration) -> Box<str> {
    format!("{}ms", (duration + 500) / 1000).into_boxed_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctf::EventCategories;
    use crate::ingest::ParseResult;
    use crate::positions::{collect_positions, PositionMap};
    use crate::span::Span;
    use crate::tree::Thresholds;
    use crate::types::{attach_type_trees, TypeIndex};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn check_span(name: &str, args: serde_json::Value, start: u64, end: u64) -> Span {
        let args = match args {
            serde_json::Value::Object(map) => Some(
                map.into_iter()
                    .map(|(k, v)| (k.into_boxed_str(), v))
                    .collect(),
            ),
            _ => None,
        };
        Span {
            event: SpanEvent::decode(
                Some(name.into()),
                Some(EventCategories::from(Box::from("check"))),
                args,
            ),
            start,
            end,
        }
    }

    #[test]
    fn time_rounds_to_milliseconds() {
        assert_eq!(&*format_time(1_000_000), "1000ms");
        assert_eq!(&*format_time(1_499), "1ms");
        assert_eq!(&*format_time(1_500), "2ms");
        assert_eq!(&*format_time(0), "0ms");
    }

    #[test]
    fn subjects_are_decamelized() {
        let event = SpanEvent::decode(
            Some("checkVariableDeclaration".into()),
            Some(EventCategories::from(Box::from("check"))),
            None,
        );
        assert_eq!(event_subject(&event), "variable declaration");
    }

    #[test]
    fn empty_tree_renders_empty() {
        let tree = SpanTree::build(ParseResult::default(), &Thresholds::default());
        assert_eq!(render(&tree, &PositionMap::default()), vec![]);
    }

    #[test]
    fn unrecognized_span_renders_generically() {
        let result = ParseResult {
            min_time: 0,
            max_time: 1_000_000,
            spans: vec![Span {
                event: SpanEvent::decode(
                    Some("root".into()),
                    Some(EventCategories::from(Box::from("x"))),
                    None,
                ),
                start: 0,
                end: 1_000_000,
            }],
            unclosed: vec![],
        };
        let tree = SpanTree::build(result, &Thresholds::default());
        let rendered = render(&tree, &PositionMap::default());
        assert_eq!(
            rendered,
            vec![PrintNode {
                kind: "root".into(),
                message: "root".into(),
                terse_message: "root".into(),
                time: Some("1000ms".into()),
                start: None,
                end: None,
                children: vec![],
            }]
        );
    }

    #[test]
    fn children_sort_by_descending_duration() {
        let result = ParseResult {
            min_time: 0,
            max_time: 3_000_000,
            spans: vec![
                check_span("checkSourceFile", json!({"path": "/src/app.ts"}), 0, 3_000_000),
                check_span("checkExpression", json!({}), 0, 600_000),
                check_span("checkCallExpression", json!({}), 600_000, 2_600_000),
            ],
            unclosed: vec![],
        };
        let tree = SpanTree::build(result, &Thresholds::default());
        let rendered = render(&tree, &PositionMap::default());
        let names = rendered[0]
            .children
            .iter()
            .map(|child| &*child.kind)
            .collect::<Vec<_>>();
        assert_eq!(names, ["checkCallExpression", "checkExpression"]);
    }

    #[test]
    fn check_span_message_resolves_range() {
        let result = ParseResult {
            min_time: 0,
            max_time: 1_000_000,
            spans: vec![
                check_span("checkSourceFile", json!({"path": "/src/app.ts"}), 0, 1_000_000),
                check_span("checkExpression", json!({"pos": 0, "end": 9}), 0, 700_000),
            ],
            unclosed: vec![],
        };
        let tree = SpanTree::build(result, &Thresholds::default());
        let requests = collect_positions(&tree);
        let positions = PositionMap::resolve_with(requests, |_| Ok("// c\n  x+y".to_owned()));
        let rendered = render(&tree, &positions);

        let file_node = &rendered[0];
        assert_eq!(&*file_node.message, "Check file /src/app.ts");
        let check = &file_node.children[0];
        assert_eq!(
            &*check.message,
            "Check expression from (line 2, col 3) to (line 2, col 5)"
        );
        assert_eq!(
            check.start,
            Some(PrintLocation {
                file: "/src/app.ts".into(),
                offset: 7,
            })
        );
        assert_eq!(
            check.end,
            Some(PrintLocation {
                file: "/src/app.ts".into(),
                offset: 9,
            })
        );
    }

    #[test]
    fn unresolved_positions_fall_back_to_offsets() {
        let result = ParseResult {
            min_time: 0,
            max_time: 1_000_000,
            spans: vec![
                check_span("checkSourceFile", json!({"path": "/src/app.ts"}), 0, 1_000_000),
                check_span("checkExpression", json!({"pos": 10, "end": 42}), 0, 700_000),
            ],
            unclosed: vec![],
        };
        let tree = SpanTree::build(result, &Thresholds::default());
        let rendered = render(&tree, &PositionMap::default());
        let check = &rendered[0].children[0];
        assert_eq!(
            &*check.message,
            "Check expression from (offset 10) to (offset 42)"
        );
        assert_eq!(
            check.start,
            Some(PrintLocation {
                file: "/src/app.ts".into(),
                offset: 10,
            })
        );
    }

    #[test]
    fn type_context_renders_as_timeless_children() {
        let result = ParseResult {
            min_time: 0,
            max_time: 1_000_000,
            spans: vec![check_span(
                "structuredTypeRelatedTo",
                json!({"sourceId": 3, "targetId": 1}),
                0,
                1_000_000,
            )],
            unclosed: vec![],
        };
        let mut tree = SpanTree::build(result, &Thresholds::default());
        let types = TypeIndex::from_value(json!([
            {"id": 1, "intrinsicName": "string"},
            {"id": 3, "symbolName": "Dog", "unionTypes": [1]},
        ]));
        attach_type_trees(&mut tree, &types);
        let rendered = render(&tree, &PositionMap::default());

        let relation = &rendered[0];
        assert_eq!(&*relation.message, "Compare types 3 and 1");
        assert_eq!(relation.children.len(), 2);
        let dog = &relation.children[0];
        assert_eq!((&*dog.kind, &*dog.message), ("type", "Dog"));
        assert_eq!(dog.time, None);
        assert_eq!(&*dog.children[0].message, "string");
        assert_eq!(&*relation.children[1].message, "string");
    }

    #[test]
    fn json_shape() {
        let node = PrintNode {
            kind: "checkSourceFile".into(),
            message: "Check file /src/app.ts".into(),
            terse_message: "/src/app.ts".into(),
            time: Some("1000ms".into()),
            start: None,
            end: None,
            children: vec![],
        };
        assert_eq!(
            serde_json::to_value(&node).expect("print nodes always serialize"),
            json!({
                "type": "checkSourceFile",
                "message": "Check file /src/app.ts",
                "terseMessage": "/src/app.ts",
                "time": "1000ms",
                "children": [],
            })
        );
    }
}
