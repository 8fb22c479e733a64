//! Dynamic values behind the `std` import namespace
//!
//! Imports historically accept any-typed values mirroring a scripting
//! object model. The host represents them as a tagged sum stored in the
//! unified resource table and dispatched through `typeof` / `read_*`.

use crate::html::HtmlDocument;
use ego_tree::NodeId;
use std::collections::BTreeMap;

/// Logical kind codes reported by `std.typeof`
pub mod kind {
    pub const NULL: i32 = 0;
    pub const INT: i32 = 1;
    pub const FLOAT: i32 = 2;
    pub const STRING: i32 = 3;
    pub const BOOL: i32 = 4;
    pub const ARRAY: i32 = 5;
    pub const OBJECT: i32 = 6;
    pub const DATE: i32 = 7;
    pub const NODE: i32 = 8;
    pub const UNKNOWN: i32 = 9;
}

/// A reference from a node descriptor into a document-owned node pool
///
/// The document owns all nodes; descriptors carry the document's rid and
/// the arena indices of the selected nodes. A descriptor holding one node
/// is simply a selection of size one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub doc: i32,
    pub nodes: Vec<NodeId>,
}

/// A stored dynamic value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Seconds since the Unix epoch.
    Date(f64),
    Node(NodeRef),
    /// A parsed HTML document owning its node arena.
    Document(Box<HtmlDocument>),
    /// Raw encoded bytes, as produced by `defaults.get`.
    Bytes(Vec<u8>),
}

impl Value {
    pub fn kind_code(&self) -> i32 {
        match self {
            Value::Null => kind::NULL,
            Value::Int(_) => kind::INT,
            Value::Float(_) => kind::FLOAT,
            Value::String(_) => kind::STRING,
            Value::Bool(_) => kind::BOOL,
            Value::Array(_) => kind::ARRAY,
            Value::Object(_) => kind::OBJECT,
            Value::Date(_) => kind::DATE,
            Value::Node(_) | Value::Document(_) => kind::NODE,
            Value::Bytes(_) => kind::UNKNOWN,
        }
    }

    /// Decode a raw-bytes payload into a concrete value.
    ///
    /// Settings come back from `defaults.get` as postcard bytes with no
    /// kind tag; readers opportunistically try string, then i64, then f32,
    /// then bool.
    pub fn from_setting_bytes(bytes: &[u8]) -> Option<Value> {
        if bytes.is_empty() {
            return Some(Value::Null);
        }
        if let Ok(s) = postcard::from_bytes::<String>(bytes) {
            return Some(Value::String(s));
        }
        if let Ok(i) = postcard::from_bytes::<i64>(bytes) {
            return Some(Value::Int(i));
        }
        if let Ok(f) = postcard::from_bytes::<f32>(bytes) {
            return Some(Value::Float(f as f64));
        }
        if let Ok(b) = postcard::from_bytes::<bool>(bytes) {
            return Some(Value::Bool(b));
        }
        None
    }

    fn decoded(&self) -> Option<Value> {
        match self {
            Value::Bytes(bytes) => Value::from_setting_bytes(bytes),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bytes(_) => self.decoded()?.as_int(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bytes(_) => self.decoded()?.as_float(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Bytes(_) => self.decoded()?.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Bytes(_) => self.decoded()?.to_display_string(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<f64> {
        match self {
            Value::Date(seconds) => Some(*seconds),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Byte length as reported by `std.buffer_len`, for payloads that have
    /// a natural byte form.
    pub fn byte_len(&self) -> Option<usize> {
        match self {
            Value::Bytes(bytes) => Some(bytes.len()),
            Value::String(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Convert a parsed JSON tree into a stored value.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(Value::Null.kind_code(), kind::NULL);
        assert_eq!(Value::Date(0.0).kind_code(), kind::DATE);
        assert_eq!(Value::Bytes(vec![]).kind_code(), kind::UNKNOWN);
    }

    #[test]
    fn test_setting_bytes_decode_string_first() {
        let bytes = postcard::to_allocvec(&"123".to_string()).unwrap();
        let value = Value::Bytes(bytes);
        // Decodes as a string, then coerces.
        assert_eq!(value.to_display_string().as_deref(), Some("123"));
        assert_eq!(value.as_int(), Some(123));
    }

    #[test]
    fn test_setting_bytes_decode_int() {
        let bytes = postcard::to_allocvec(&42i64).unwrap();
        let value = Value::Bytes(bytes);
        assert_eq!(value.as_int(), Some(42));
    }

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, 2.5, "x", null, true]}"#).unwrap();
        let value = Value::from_json(json);
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        let Some(Value::Array(items)) = map.get("a").cloned() else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 5);
        assert!(matches!(items[0], Value::Int(1)));
        assert!(matches!(items[4], Value::Bool(true)));
    }
}
