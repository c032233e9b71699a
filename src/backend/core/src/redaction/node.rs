//! Payload trees.
//!
//! Response payloads are converted into a closed set of node kinds before
//! redaction, so the filter is an exhaustive match instead of runtime type
//! inspection. Mapping entries keep their original order and may carry a
//! [`FieldTag`] attached from a [`FieldSchema`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ErrorCode, Result, VisorError};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// Capability tag attached to a field at the data-model level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTag {
    /// Monetary data; visible only to financial-access roles.
    Financial,
    /// Never redacted, whatever its name.
    General,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub tag: Option<FieldTag>,
    pub value: Node,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Node) -> Self {
        Self {
            key: key.into(),
            tag: None,
            value,
        }
    }

    pub fn tagged(mut self, tag: FieldTag) -> Self {
        self.tag = Some(tag);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(Vec<Entry>),
}

impl Node {
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Sequence(_) | Self::Mapping(_))
    }

    /// Every mapping key at any depth, siblings before descendants.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Mapping(entries) => {
                    for entry in entries.iter().rev() {
                        stack.push(&entry.value);
                    }
                    keys.extend(entries.iter().map(|e| e.key.as_str()));
                }
                Self::Sequence(items) => stack.extend(items.iter().rev()),
                Self::Null | Self::Scalar(_) => {}
            }
        }
        keys
    }

    /// Nesting depth; scalars and null are depth 0.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            match node {
                Self::Mapping(entries) => {
                    stack.extend(entries.iter().map(|e| (&e.value, depth + 1)));
                    max = max.max(depth + 1);
                }
                Self::Sequence(items) => {
                    stack.extend(items.iter().map(|n| (n, depth + 1)));
                    max = max.max(depth + 1);
                }
                Self::Null | Self::Scalar(_) => {}
            }
        }
        max
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON Conversion
// ═══════════════════════════════════════════════════════════════════════════════

impl Node {
    /// Convert an untagged JSON value. Composites nested `max_depth` or more
    /// levels down fail with a traversal error.
    pub fn from_json(value: Value, max_depth: usize) -> Result<Self> {
        FieldSchema::default().annotate(value, max_depth)
    }
}

pub(crate) fn too_deep(max_depth: usize) -> VisorError {
    warn!(max_depth, "Payload exceeds redaction depth limit");
    VisorError::validation(ErrorCode::TraversalFailed, "Payload is nested too deeply")
        .with_context("max_depth", max_depth)
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        match node {
            Node::Null => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            Node::Scalar(Scalar::Number(n)) => Value::Number(n),
            Node::Scalar(Scalar::String(s)) => Value::String(s),
            Node::Sequence(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Node::Mapping(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|entry| (entry.key, Value::from(entry.value)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Schema
// ═══════════════════════════════════════════════════════════════════════════════

/// Field tags keyed by field name (case-insensitive).
///
/// A tag applies wherever a field of that name appears in the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSchema {
    tags: HashMap<String, FieldTag>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, field: &str, tag: FieldTag) -> Self {
        self.tags.insert(field.trim().to_lowercase(), tag);
        self
    }

    pub fn financial(self, field: &str) -> Self {
        self.tag(field, FieldTag::Financial)
    }

    pub fn general(self, field: &str) -> Self {
        self.tag(field, FieldTag::General)
    }

    pub fn tag_for(&self, field: &str) -> Option<FieldTag> {
        if self.tags.is_empty() {
            return None;
        }
        self.tags.get(&field.to_lowercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Convert a JSON value into a node tree, tagging known fields.
    ///
    /// Fails with a traversal error on composites at depth `max_depth` or
    /// deeper, so conversion never recurses past the limit.
    pub fn annotate(&self, value: Value, max_depth: usize) -> Result<Node> {
        self.annotate_at(value, 0, max_depth)
    }

    fn annotate_at(&self, value: Value, depth: usize, max_depth: usize) -> Result<Node> {
        let composite = matches!(value, Value::Array(_) | Value::Object(_));
        if composite && depth >= max_depth {
            return Err(too_deep(max_depth));
        }

        Ok(match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Node::Scalar(Scalar::Number(n)),
            Value::String(s) => Node::Scalar(Scalar::String(s)),
            Value::Array(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(|v| self.annotate_at(v, depth + 1, max_depth))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => Node::Mapping(
                map.into_iter()
                    .map(|(key, value)| {
                        Ok(Entry {
                            tag: self.tag_for(&key),
                            value: self.annotate_at(value, depth + 1, max_depth)?,
                            key,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: Value) -> Node {
        Node::from_json(value, 16).unwrap()
    }

    #[test]
    fn test_json_conversion_preserves_order() {
        let value = json!({"zeta": 1, "alpha": [true, null, "x"], "mid": {"b": 2, "a": 1}});
        let node = node(value.clone());
        assert_eq!(node.keys(), vec!["zeta", "alpha", "mid", "b", "a"]);
        assert_eq!(Value::from(node), value);
    }

    #[test]
    fn test_depth() {
        assert_eq!(node(json!(1)).depth(), 0);
        assert_eq!(node(json!({"a": 1})).depth(), 1);
        assert_eq!(node(json!({"a": [{"b": null}]})).depth(), 3);
        assert_eq!(node(json!([])).depth(), 1);
    }

    #[test]
    fn test_schema_annotation() {
        let schema = FieldSchema::new().general("Total").financial("fee");
        let node = schema
            .annotate(json!({"total": 3, "fee": 10, "note": "x"}), 16)
            .unwrap();

        let Node::Mapping(entries) = node else {
            panic!("expected mapping");
        };
        assert_eq!(entries[0].tag, Some(FieldTag::General));
        assert_eq!(entries[1].tag, Some(FieldTag::Financial));
        assert_eq!(entries[2].tag, None);
    }

    #[test]
    fn test_conversion_stops_at_depth_limit() {
        assert!(Node::from_json(json!({"a": {"b": 1}}), 2).is_ok());

        let err = Node::from_json(json!({"a": {"b": {"c": 1}}}), 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TraversalFailed);

        let schema = FieldSchema::new().financial("fee");
        let err = schema.annotate(json!([[{"fee": [1]}]]), 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TraversalFailed);
    }
}
