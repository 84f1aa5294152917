use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Document body of a record: field name to value.
///
/// Uses `BTreeMap` so rendered content has a deterministic field order.
pub type Content = BTreeMap<String, Value>;

/// Equality filters for a table lookup: field name to the value it must hold.
pub type Filters = BTreeMap<String, Value>;

/// Index declaration for a table: indexed field name to its uniqueness flag.
pub type IndexSpec = BTreeMap<String, bool>;

/// Runtime value held in a record field.
///
/// A closed set of JSON-compatible variants. Serialized untagged, so a
/// [`Content`] renders as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Nested JSON object.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the string slice if this is a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the hashable key this value is indexed under.
    #[must_use]
    pub fn index_key(&self) -> IndexKey {
        match self {
            Self::Null => IndexKey::Null,
            Self::Bool(b) => IndexKey::Bool(*b),
            Self::Int(i) => IndexKey::Int(*i),
            Self::Float(f) => IndexKey::Float(OrderedFloat(*f)),
            Self::String(s) => IndexKey::String(s.clone()),
            Self::Map(m) => IndexKey::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.index_key()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Self::Map(m)
    }
}

/// Totally ordered, hashable form of a [`Value`], used as an index key.
///
/// Floats are wrapped in [`OrderedFloat`] so `NaN` and signed zeros compare
/// consistently. `Int(1)` and `Float(1.0)` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Map(BTreeMap<String, IndexKey>),
}

/// Builds a [`Content`] map from `(field, value)` pairs.
///
/// ```
/// use tabula_core::{content, Value};
///
/// let c = content! { "reg_no" => "KA-01-1234", "seats" => 4_i64 };
/// assert_eq!(c["seats"], Value::Int(4));
/// ```
#[macro_export]
macro_rules! content {
    () => { $crate::Content::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Content::new();
        $( map.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_serializes_as_plain_json_object() {
        let mut nested = BTreeMap::new();
        nested.insert("city".to_string(), Value::from("Pune"));
        let c = crate::content! {
            "name" => "alice",
            "age" => 30_i64,
            "score" => 1.5,
            "active" => true,
            "address" => nested,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(
            json,
            r#"{"active":true,"address":{"city":"Pune"},"age":30,"name":"alice","score":1.5}"#
        );
    }

    #[test]
    fn content_deserializes_from_json() {
        let c: Content = serde_json::from_str(r#"{"a":null,"b":2,"c":"x","d":{"e":false}}"#).unwrap();
        assert_eq!(c["a"], Value::Null);
        assert_eq!(c["b"], Value::Int(2));
        assert_eq!(c["c"], Value::from("x"));
        assert!(matches!(c["d"], Value::Map(_)));
    }

    #[test]
    fn index_keys_distinguish_int_and_float() {
        assert_ne!(Value::Int(1).index_key(), Value::Float(1.0).index_key());
        assert_eq!(Value::Float(f64::NAN).index_key(), Value::Float(f64::NAN).index_key());
    }

    #[test]
    fn display_renders_strings_bare() {
        assert_eq!(Value::from("KA-01").to_string(), "KA-01");
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
