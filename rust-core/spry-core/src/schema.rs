//! # Parameter Schema
//!
//! Declarative per-field rules attached to a route.
//!
//! ## Design Principles
//!
//! - **S**: Only describes rules; checking lives in `validator`
//! - **O**: Unknown type names are kept and ignored, not rejected

use crate::controller::ControllerRef;
use crate::json::is_truthy;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// Any string
    #[default]
    String,
    /// `int` / `integer`; coerces numeric strings
    Int,
    /// `number` / `num` / `float`; coerces numeric strings
    Float,
    /// Array or map
    Array,
    /// `cardNumber`: Luhn-valid card number
    CardNumber,
    /// Parsable date
    Date,
    /// Email address
    Email,
    /// Absolute URL
    Url,
    /// IPv4 or IPv6 address
    Ip,
    /// Domain name
    Domain,
    /// `boolean` / `bool`; coerces common string forms
    Boolean,
    /// String of length 10+ with a symbol, number, letter, lowercase and uppercase
    Password,
    /// Unrecognized type name; no check is applied
    Other(String),
}

impl ParamType {
    /// Parse a type name as written in route configuration
    #[must_use]
    pub fn from_specifier(s: &str) -> Self {
        match s {
            "int" | "integer" => Self::Int,
            "number" | "num" | "float" => Self::Float,
            "array" => Self::Array,
            "cardNumber" => Self::CardNumber,
            "date" => Self::Date,
            "email" => Self::Email,
            "url" => Self::Url,
            "ip" => Self::Ip,
            "domain" => Self::Domain,
            "string" => Self::String,
            "boolean" | "bool" => Self::Boolean,
            "password" => Self::Password,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Array => "array",
            Self::CardNumber => "cardNumber",
            Self::Date => "date",
            Self::Email => "email",
            Self::Url => "url",
            Self::Ip => "ip",
            Self::Domain => "domain",
            Self::Boolean => "boolean",
            Self::Password => "password",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_specifier(&name))
    }
}

/// Coerce a string to an integer value
#[must_use]
pub fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

/// Coerce a string to a float value; integers stay integers
#[must_use]
pub fn coerce_float(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
        }
        _ => None,
    }
}

/// Coerce common truthy/falsy forms to a boolean value
#[must_use]
pub fn coerce_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(Value::Bool(true)),
            Some(0) => Some(Value::Bool(false)),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a field must be present
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Required {
    /// Optional
    #[default]
    No,
    /// Always required
    Yes,
    /// Required only while every companion field equals the given value
    When(Map<String, Value>),
}

impl Required {
    /// Evaluate against the current input
    #[must_use]
    pub fn is_required(&self, input: &Map<String, Value>) -> bool {
        match self {
            Self::No => false,
            Self::Yes => true,
            Self::When(conditions) => conditions
                .iter()
                .all(|(field, expected)| input.get(field).is_some_and(|v| !v.is_null() && v == expected)),
        }
    }
}

impl Serialize for Required {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::No => serializer.serialize_bool(false),
            Self::Yes => serializer.serialize_bool(true),
            Self::When(conditions) => conditions.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Required {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(conditions) if !conditions.is_empty() => Self::When(conditions),
            other if is_truthy(&other) => Self::Yes,
            _ => Self::No,
        })
    }
}

/// Rule for a single parameter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ParamRule {
    /// Presence requirement
    pub required: Required,
    /// Declared type
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,
    /// Minimum length in characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum length in characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Exact length in characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Inclusive numeric minimum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric maximum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Inclusive numeric range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub between: Option<(f64, f64)>,
    /// Inclusive length range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub between_length: Option<(usize, usize)>,
    /// Must equal another field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
    /// Must differ from another field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_matches: Option<String>,
    /// Required prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    /// Forbidden prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_starts_with: Option<String>,
    /// Required suffix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    /// Forbidden suffix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_ends_with: Option<String>,
    /// Digits only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numbers_only: Option<Value>,
    /// Earliest allowed date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    /// Latest allowed date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
    /// Allow-list
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
    /// Required substring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has: Option<String>,
    /// Minimum count of symbol characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_symbols: Option<usize>,
    /// Minimum count of digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_numbers: Option<usize>,
    /// Minimum count of letters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_letters: Option<usize>,
    /// Minimum count of lowercase letters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_lowercase: Option<usize>,
    /// Minimum count of uppercase letters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_uppercase: Option<usize>,
    /// Predicate controller; a falsy result fails the field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<ControllerRef>,
    /// Transform controller; its result replaces the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ControllerRef>,
    /// Value used when the field is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Trim strings (and drop blank list items); unset defers to the route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim: Option<bool>,
    /// Deduplicate list values
    pub unique: bool,
    /// Store the value under meta instead of params
    pub meta: bool,
    /// Check only; the value is not passed on
    pub validate_only: bool,
    /// Custom messages keyed by check name
    pub messages: BTreeMap<String, String>,
}

impl ParamRule {
    /// Custom message for a check, matched case-insensitively
    #[must_use]
    pub fn message(&self, check: &str) -> Option<&str> {
        self.messages
            .iter()
            .find(|(key, message)| key.eq_ignore_ascii_case(check) && !message.is_empty())
            .map(|(_, message)| message.as_str())
    }
}

/// Ordered field rules for a route
///
/// Accepts either a map of `field -> rule` or a list of field names, each
/// getting an empty rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamsSchema(Vec<(String, ParamRule)>);

impl ParamsSchema {
    /// Create an empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field rule
    pub fn insert(&mut self, field: impl Into<String>, rule: ParamRule) {
        let field = field.into();
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = rule,
            None => self.0.push((field, rule)),
        }
    }

    /// Rule for a field
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&ParamRule> {
        self.0.iter().find(|(name, _)| name == field).map(|(_, rule)| rule)
    }

    /// Fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamRule)> {
        self.0.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ParamsSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, rule) in &self.0 {
            map.serialize_entry(field, rule)?;
        }
        map.end()
    }
}

struct SchemaVisitor;

impl<'de> Visitor<'de> for SchemaVisitor {
    type Value = ParamsSchema;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of field rules or a list of field names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut schema = ParamsSchema::new();
        while let Some((field, rule)) = access.next_entry::<String, Option<ParamRule>>()? {
            schema.insert(field, rule.unwrap_or_default());
        }
        Ok(schema)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut schema = ParamsSchema::new();
        while let Some(field) = access.next_element::<String>()? {
            if field.is_empty() {
                return Err(de::Error::invalid_value(de::Unexpected::Str(&field), &self));
            }
            schema.insert(field, ParamRule::default());
        }
        Ok(schema)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ParamsSchema::new())
    }
}

impl<'de> Deserialize<'de> for ParamsSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_type_from_specifier() {
        assert_eq!(ParamType::from_specifier("integer"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("num"), ParamType::Float);
        assert_eq!(ParamType::from_specifier("bool"), ParamType::Boolean);
        assert_eq!(ParamType::from_specifier("cardNumber"), ParamType::CardNumber);
        assert_eq!(
            ParamType::from_specifier("uuid"),
            ParamType::Other("uuid".to_string())
        );
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(coerce_int(&json!("42")), Some(json!(42)));
        assert_eq!(coerce_int(&json!(" -7 ")), Some(json!(-7)));
        assert_eq!(coerce_int(&json!(5.0)), Some(json!(5)));
        assert_eq!(coerce_int(&json!("4.2")), None);
        assert_eq!(coerce_int(&json!("abc")), None);
    }

    #[test]
    fn test_coerce_float() {
        assert_eq!(coerce_float(&json!("3.5")), Some(json!(3.5)));
        assert_eq!(coerce_float(&json!("3")), Some(json!(3)));
        assert_eq!(coerce_float(&json!("x")), None);
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool(&json!("true")), Some(json!(true)));
        assert_eq!(coerce_bool(&json!("0")), Some(json!(false)));
        assert_eq!(coerce_bool(&json!(1)), Some(json!(true)));
        assert_eq!(coerce_bool(&json!("maybe")), None);
    }

    #[test]
    fn test_required_forms() {
        let input = json!({"kind": "company"});
        let input = input.as_object().unwrap();

        let yes: Required = serde_json::from_value(json!(true)).unwrap();
        assert!(yes.is_required(input));

        let no: Required = serde_json::from_value(json!(false)).unwrap();
        assert!(!no.is_required(input));

        let when: Required = serde_json::from_value(json!({"kind": "company"})).unwrap();
        assert!(when.is_required(input));

        let other: Required = serde_json::from_value(json!({"kind": "person"})).unwrap();
        assert!(!other.is_required(input));
    }

    #[test]
    fn test_rule_deserialize() {
        let rule: ParamRule = serde_json::from_value(json!({
            "required": true,
            "type": "int",
            "between": [1, 10],
            "betweenLength": [1, 2],
            "in": [1, 2, 3],
            "callback": "Checks::even",
            "messages": {"minLength": "Too short"}
        }))
        .unwrap();

        assert_eq!(rule.required, Required::Yes);
        assert_eq!(rule.param_type, Some(ParamType::Int));
        assert_eq!(rule.between, Some((1.0, 10.0)));
        assert_eq!(rule.between_length, Some((1, 2)));
        assert_eq!(rule.callback, Some(ControllerRef::named("Checks", "even")));
        assert_eq!(rule.message("minlength"), Some("Too short"));
        assert_eq!(rule.message("maxlength"), None);
    }

    #[test]
    fn test_schema_from_map_keeps_order() {
        let schema: ParamsSchema = serde_json::from_value(json!({
            "zeta": {"required": true},
            "alpha": {}
        }))
        .unwrap();
        let fields: Vec<&str> = schema.iter().map(|(name, _)| name).collect();
        assert_eq!(fields, ["zeta", "alpha"]);
        assert_eq!(schema.get("zeta").unwrap().required, Required::Yes);
    }

    #[test]
    fn test_schema_from_list() {
        let schema: ParamsSchema = serde_json::from_value(json!(["id", "name"])).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("name"), Some(&ParamRule::default()));
    }
}
