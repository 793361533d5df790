//! # JSON Helpers
//!
//! Payload parsing with simd-json, plus the loose value tests the pipeline
//! relies on (blankness, truthiness, dotted lookup).
//!
//! ## Design Principles
//!
//! - **S**: Only handles JSON decoding and value inspection
//! - **D**: Depends on serde abstractions, not concrete parsers

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Parse a JSON string to a typed value using simd-json
///
/// # Errors
///
/// Returns `Error::JsonParse` if parsing fails
pub fn parse_json<T: DeserializeOwned>(json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(&mut bytes)
}

/// Parse JSON bytes in place using simd-json
///
/// # Errors
///
/// Returns `Error::JsonParse` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    Ok(simd_json::from_slice(bytes)?)
}

/// Serialize a value to a JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Whether a raw payload looks like a JSON document
#[must_use]
pub fn is_json_payload(payload: &str) -> bool {
    matches!(payload.trim_start().as_bytes().first(), Some(b'[' | b'{'))
}

/// Whether a value counts as empty
///
/// Null, `false`, zero, `""`, `"0"` and empty containers are blank.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Inverse of [`is_blank`]
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    !is_blank(value)
}

/// Scalar text form of a value: strings as-is, numbers and booleans printed
#[must_use]
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        _ => None,
    }
}

/// Walk a dotted path (`"a.b.0"`) through objects and arrays
#[must_use]
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
