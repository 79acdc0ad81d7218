//! Dynamic extension values
//!
//! Chain-specific fields ride across `to_canonical`/`from_canonical` inside
//! the `extensions` map. The value space is a tagged sum over the JSON-like
//! scalars plus bytes, lists and nested maps, with explicit fallible
//! accessors so adapter code never downcasts blindly.
//!
//! Serialization is untagged JSON. `Bytes` serializes as base64 text, which
//! means a serialize/deserialize round trip yields `Text`; [`ExtensionValue::as_bytes`]
//! accepts base64 (and hex) text for exactly that reason.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// A single extension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ExtensionValue>),
    Map(BTreeMap<String, ExtensionValue>),
    #[serde(serialize_with = "bytes_as_b64")]
    Bytes(Vec<u8>),
}

fn bytes_as_b64<S: serde::Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(value))
}

impl ExtensionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtensionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ExtensionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ExtensionValue::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExtensionValue::Float(f) => Some(*f),
            ExtensionValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtensionValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes, accepting base64 (then hex) text as the encoded form.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            ExtensionValue::Bytes(b) => Some(b.clone()),
            ExtensionValue::Text(s) => STANDARD
                .decode(s.as_bytes())
                .ok()
                .or_else(|| hex::decode(s.trim_start_matches("0x")).ok()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ExtensionValue]> {
        match self {
            ExtensionValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ExtensionValue>> {
        match self {
            ExtensionValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ExtensionValue::Null)
    }
}

impl From<bool> for ExtensionValue {
    fn from(value: bool) -> Self {
        ExtensionValue::Bool(value)
    }
}

impl From<i32> for ExtensionValue {
    fn from(value: i32) -> Self {
        ExtensionValue::Int(value as i64)
    }
}

impl From<i64> for ExtensionValue {
    fn from(value: i64) -> Self {
        ExtensionValue::Int(value)
    }
}

impl From<u32> for ExtensionValue {
    fn from(value: u32) -> Self {
        ExtensionValue::Int(value as i64)
    }
}

impl From<f64> for ExtensionValue {
    fn from(value: f64) -> Self {
        ExtensionValue::Float(value)
    }
}

impl From<&str> for ExtensionValue {
    fn from(value: &str) -> Self {
        ExtensionValue::Text(value.to_string())
    }
}

impl From<String> for ExtensionValue {
    fn from(value: String) -> Self {
        ExtensionValue::Text(value)
    }
}

impl From<Vec<u8>> for ExtensionValue {
    fn from(value: Vec<u8>) -> Self {
        ExtensionValue::Bytes(value)
    }
}

impl From<Vec<ExtensionValue>> for ExtensionValue {
    fn from(value: Vec<ExtensionValue>) -> Self {
        ExtensionValue::List(value)
    }
}

impl From<BTreeMap<String, ExtensionValue>> for ExtensionValue {
    fn from(value: BTreeMap<String, ExtensionValue>) -> Self {
        ExtensionValue::Map(value)
    }
}
