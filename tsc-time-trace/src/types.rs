//! Type-comparison context for structural relation checks
//!
//! tsc's trace mode writes a companion `types.json` dump next to the trace.
//! This module indexes that dump by type id and expands an id into a small
//! recursive tree of the type and its component types, which gets attached to
//! the relation-check spans that name it.

use crate::span::{SpanArgs, SpanKind};
use crate::tree::SpanTree;
use log::warn;
use serde::Deserialize;
use serde_json as json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Identifier of a type within the dump
pub type TypeId = u64;

/// Fields through which a dump entry references other types
const CHILD_REFS: &[&str] = &[
    "typeArguments",
    "unionTypes",
    "intersectionTypes",
    "aliasTypeArguments",
    "instantiatedType",
    "conditionalCheckType",
    "conditionalExtendsType",
    "conditionalTrueType",
    "conditionalFalseType",
    "indexedAccessObjectType",
    "indexedAccessIndexType",
    "keyofType",
    "substitutionBaseType",
    "constraintType",
];

/// Expansion depth at which cyclic type graphs are cut
const MAX_TYPE_DEPTH: usize = 5;

/// Table of type descriptors, indexed by id, with memoized tree expansion
#[derive(Debug, Default)]
pub struct TypeIndex {
    /// Raw dump entries by type id
    entries: HashMap<TypeId, json::Map<String, json::Value>>,

    /// Previously expanded trees
    ///
    /// Written once per id then only read; concurrent callers are not
    /// supported.
    cache: RefCell<HashMap<TypeId, Option<TypeNode>>>,
}
//
impl TypeIndex {
    /// Index a types dump file
    ///
    /// A dump that is not valid JSON, or not an array, is reported and
    /// treated as empty: analysis proceeds without type context.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        match json::from_reader::<_, json::Value>(reader) {
            Ok(value) => Ok(Self::from_value(value)),
            Err(e) => {
                warn!("malformed types dump, continuing without type context ({e})");
                Ok(Self::default())
            }
        }
    }

    /// Index an already-parsed types dump
    pub fn from_value(value: json::Value) -> Self {
        let json::Value::Array(raw_entries) = value else {
            warn!("types dump is not an array, continuing without type context");
            return Self::default();
        };
        let mut entries = HashMap::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let json::Value::Object(entry) = raw else {
                continue;
            };
            match entry.get("id").and_then(json::Value::as_u64) {
                Some(id) => {
                    entries.insert(id, entry);
                }
                None => warn!("ignoring types dump entry without an id"),
            }
        }
        Self {
            entries,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Number of indexed types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Truth that the dump contained no usable entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand a type id into a tree of the type and its component types
    ///
    /// Unknown ids expand to nothing. Expansion is cut at a fixed depth so
    /// that recursive types terminate.
    pub fn type_tree(&self, id: TypeId) -> Option<TypeNode> {
        if let Some(cached) = self.cache.borrow().get(&id) {
            return cached.clone();
        }
        let expanded = self.expand(id, 0);
        self.cache.borrow_mut().insert(id, expanded.clone());
        expanded
    }

    fn expand(&self, id: TypeId, depth: usize) -> Option<TypeNode> {
        let entry = self.entries.get(&id)?;
        let mut descriptor = entry.clone();
        let mut children = Vec::new();
        for key in CHILD_REFS {
            let Some(reference) = descriptor.remove(*key) else {
                continue;
            };
            if depth + 1 >= MAX_TYPE_DEPTH {
                continue;
            }
            for child_id in reference_ids(&reference) {
                children.extend(self.expand(child_id, depth + 1));
            }
        }
        let location = descriptor
            .get("location")
            .and_then(|loc| json::from_value::<TypeLocation>(loc.clone()).ok());
        Some(TypeNode {
            descriptor,
            location,
            children,
        })
    }
}

/// Type ids named by a child-reference field (a single id or an id array)
fn reference_ids(reference: &json::Value) -> Vec<TypeId> {
    match reference {
        json::Value::Number(_) => reference.as_u64().into_iter().collect(),
        json::Value::Array(ids) => ids.iter().filter_map(json::Value::as_u64).collect(),
        _ => Vec::new(),
    }
}

/// Recursive description of a type and its components
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeTree(pub Vec<TypeNode>);

/// One type within a [`TypeTree`]
#[derive(Clone, Debug, PartialEq)]
pub struct TypeNode {
    /// Raw dump entry, minus the child-reference fields expanded below
    pub descriptor: json::Map<String, json::Value>,

    /// Declaration site, when the dump records one
    pub location: Option<TypeLocation>,

    /// Component types
    pub children: Vec<TypeNode>,
}

/// Declaration site of a type
///
/// tsc dumps spell the column field `char`; normalized output spells it
/// `column`, and both are accepted on input.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TypeLocation {
    /// Path of the declaring source file
    pub path: Box<str>,

    /// 1-based line
    pub line: u64,

    /// 1-based column
    #[serde(alias = "char", alias = "character")]
    pub column: u64,
}

/// Attach type-comparison context to the relation-check leaves of a tree
///
/// Ids that the dump does not know yield an empty attachment rather than
/// none, so consumers can tell "no table" from "unknown types".
pub fn attach_type_trees(tree: &mut SpanTree, types: &TypeIndex) {
    for id in 0..tree.len() {
        let node = tree.node(id);
        if !node.is_leaf() {
            continue;
        }
        let Some(event) = node.event() else {
            continue;
        };
        if event.kind() != SpanKind::StructuredTypeRelatedTo {
            continue;
        }
        let &SpanArgs::TypeIds {
            source_id,
            target_id,
        } = event.args()
        else {
            continue;
        };
        let roots = [source_id, target_id]
            .into_iter()
            .flatten()
            .filter_map(|type_id| types.type_tree(type_id))
            .collect();
        tree.attach_type_tree(id, TypeTree(roots));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctf::EventCategories;
    use crate::ingest::ParseResult;
    use crate::span::{Span, SpanEvent};
    use crate::tree::Thresholds;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn index() -> TypeIndex {
        TypeIndex::from_value(json::json!([
            {"id": 1, "intrinsicName": "string"},
            {"id": 2, "intrinsicName": "number"},
            {
                "id": 3,
                "symbolName": "Dog",
                "unionTypes": [1, 2],
                "location": {"path": "/src/zoo.ts", "line": 10, "char": 7}
            },
            {"id": 4, "symbolName": "Ouroboros", "instantiatedType": 4},
        ]))
    }

    #[test]
    fn union_expansion() {
        let index = index();
        let tree = index.type_tree(3).expect("known ids should expand");
        assert_eq!(
            tree.location,
            Some(TypeLocation {
                path: "/src/zoo.ts".into(),
                line: 10,
                column: 7,
            })
        );
        assert!(!tree.descriptor.contains_key("unionTypes"));
        assert_eq!(tree.descriptor["symbolName"], json::json!("Dog"));
        assert_matches!(&tree.children[..], [a, b] => {
            assert_eq!(a.descriptor["intrinsicName"], json::json!("string"));
            assert_eq!(b.descriptor["intrinsicName"], json::json!("number"));
        });
    }

    #[test]
    fn unknown_id() {
        assert_eq!(index().type_tree(999), None);
    }

    #[test]
    fn recursive_type_terminates() {
        let index = index();
        let tree = index.type_tree(4).expect("known ids should expand");
        let mut depth = 0;
        let mut node = &tree;
        while let Some(child) = node.children.first() {
            node = child;
            depth += 1;
        }
        assert_eq!(depth, MAX_TYPE_DEPTH - 1);
    }

    #[test]
    fn expansion_is_memoized() {
        let index = index();
        let first = index.type_tree(3);
        let second = index.type_tree(3);
        assert_eq!(first, second);
        assert_eq!(index.cache.borrow().len(), 1);
    }

    #[test]
    fn column_spellings() {
        let with_column = json::json!({"path": "/a.ts", "line": 1, "column": 2});
        let with_char = json::json!({"path": "/a.ts", "line": 1, "char": 2});
        let parsed_column = json::from_value::<TypeLocation>(with_column).unwrap();
        let parsed_char = json::from_value::<TypeLocation>(with_char).unwrap();
        assert_eq!(parsed_column, parsed_char);
    }

    #[test]
    fn malformed_dump_is_empty() {
        assert!(TypeIndex::from_value(json::json!({"not": "an array"})).is_empty());
        assert!(TypeIndex::from_value(json::json!([42, "str"])).is_empty());
    }

    #[test]
    fn attachment_targets_relation_leaves() {
        let relation = |start, end| Span {
            event: SpanEvent::decode(
                Some("structuredTypeRelatedTo".into()),
                Some(EventCategories::from(Box::from("check"))),
                Some(maplit::hashmap! {
                    "sourceId".into() => json::json!(3),
                    "targetId".into() => json::json!(999),
                }),
            ),
            start,
            end,
        };
        let result = ParseResult {
            min_time: 0,
            max_time: 1_000_000,
            spans: vec![relation(0, 1_000_000), relation(0, 900_000)],
            unclosed: vec![],
        };
        let mut tree = SpanTree::build(result, &Thresholds::default());
        attach_type_trees(&mut tree, &index());

        let outer = tree.root().children()[0];
        let inner = tree.node(outer).children()[0];
        // Only the leaf relation check gets an attachment; the unknown
        // target id contributes nothing to it
        assert_eq!(tree.node(outer).type_tree(), None);
        assert_matches!(tree.node(inner).type_tree(), Some(TypeTree(roots)) => {
            assert_eq!(roots.len(), 1);
            assert_eq!(roots[0].descriptor["symbolName"], json::json!("Dog"));
        });
    }
}
