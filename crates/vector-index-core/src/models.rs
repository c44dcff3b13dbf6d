//! Data models that flow through the indexing and retrieval pipeline.
//!
//! A [`Document`] is one chunk of an object's text plus flat scalar
//! metadata. An [`EmbeddedDocument`] pairs a document with the vector an
//! embedding transformer produced for it. Neither is persisted directly;
//! storage providers keep their own representation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar metadata value. Serializes to the matching JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Convert a JSON value into a scalar. Arrays and objects have no
    /// scalar form and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(MetadataValue::Null),
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(MetadataValue::Int(i)),
                None => n.as_f64().map(MetadataValue::Float),
            },
            serde_json::Value::String(s) => Some(MetadataValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataValue::Null => serde_json::Value::Null,
            MetadataValue::Bool(b) => serde_json::Value::Bool(*b),
            MetadataValue::Int(i) => serde_json::Value::from(*i),
            MetadataValue::Float(f) => serde_json::Value::from(*f),
            MetadataValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality as metadata filters apply it in every storage backend.
    /// Numbers compare by value, so `Int(1999)` matches `Float(1999.0)`;
    /// booleans, text, and null only match their own kind.
    pub fn filter_matches(&self, stored: &MetadataValue) -> bool {
        match (self, stored) {
            (MetadataValue::Int(a), MetadataValue::Float(b))
            | (MetadataValue::Float(b), MetadataValue::Int(a)) => *a as f64 == *b,
            _ => self == stored,
        }
    }
}

/// Renders the value the way it appears inside a document key: text
/// verbatim, numbers in their shortest form, null as the empty string.
impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Null => Ok(()),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<i32> for MetadataValue {
    fn from(i: i32) -> Self {
        MetadataValue::Int(i64::from(i))
    }
}

impl From<u32> for MetadataValue {
    fn from(i: u32) -> Self {
        MetadataValue::Int(i64::from(i))
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// String-keyed scalar metadata. Ordered so serialized output is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One text chunk, the atomic unit of embedding and storage.
///
/// `document_key` is unique within an index and conventionally
/// `{source_id}:{object_pk}:{chunk_index}`, which lets a source claim
/// ownership from the key alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_key: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(document_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_key: document_key.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a vector, producing the immutable embedded form.
    pub fn with_embedding(self, vector: Vec<f32>) -> EmbeddedDocument {
        EmbeddedDocument {
            document: self,
            vector,
        }
    }
}

/// A document plus its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDocument {
    pub document: Document,
    pub vector: Vec<f32>,
}

impl EmbeddedDocument {
    pub fn document_key(&self) -> &str {
        &self.document.document_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_json_roundtrip_scalars() {
        let json = serde_json::json!({"a": 1, "b": "x", "c": true, "d": null, "e": 1.5});
        let meta: Metadata = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(meta["a"], MetadataValue::Int(1));
        assert_eq!(meta["b"], MetadataValue::Text("x".into()));
        assert_eq!(meta["c"], MetadataValue::Bool(true));
        assert_eq!(meta["d"], MetadataValue::Null);
        assert_eq!(meta["e"], MetadataValue::Float(1.5));
        assert_eq!(serde_json::to_value(&meta).unwrap(), json);
    }

    #[test]
    fn test_from_json_rejects_compound() {
        assert!(MetadataValue::from_json(&serde_json::json!([1, 2])).is_none());
        assert!(MetadataValue::from_json(&serde_json::json!({"x": 1})).is_none());
    }

    #[test]
    fn test_display_for_keys() {
        assert_eq!(MetadataValue::Int(42).to_string(), "42");
        assert_eq!(MetadataValue::from("abc").to_string(), "abc");
        assert_eq!(MetadataValue::Null.to_string(), "");
    }
}
