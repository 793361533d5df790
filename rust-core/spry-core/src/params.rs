//! # Request Parameters
//!
//! Fetching raw parameters from the request, merging them into the context
//! and validating them against the matched route's schema.

use crate::codes::CoreCode;
use crate::context::RequestContext;
use crate::error::Result;
use crate::json::{is_blank, is_json_payload, is_truthy, lookup_path, parse_json};
use crate::response::Reply;
use crate::schema::{ParamRule, ParamType};
use crate::validator::{parse_date, Check, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Validated parameters split into params and meta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatedParams {
    /// Values passed to the controller as params
    pub params: Map<String, Value>,
    /// Values routed to meta
    pub meta: Map<String, Value>,
}

fn is_set(input: &Map<String, Value>, key: &str) -> bool {
    input.get(key).is_some_and(|v| !v.is_null())
}

/// Trim strings; lists lose blank items after trimming
#[must_use]
pub fn trim_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(trim_value)
                .filter(|item| !is_blank(item))
                .collect(),
        ),
        Value::Object(map) => Value::Array(
            map.into_iter()
                .map(|(_, item)| trim_value(item))
                .filter(|item| !is_blank(item))
                .collect(),
        ),
        other => other,
    }
}

/// Drop repeated list items, keeping first occurrences
#[must_use]
pub fn unique_value(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut seen: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !seen.contains(&item) {
                    seen.push(item);
                }
            }
            Value::Array(seen)
        }
        other => other,
    }
}

impl RequestContext {
    /// Current parameters
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// One parameter; `a.b.c` walks nested values
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        match name.find('.') {
            Some(dot) if dot > 0 => {
                let (head, rest) = name.split_at(dot);
                self.params.get(head).and_then(|root| lookup_path(root, &rest[1..]))
            }
            _ => self.params.get(name),
        }
    }

    /// Read raw parameters for the request
    ///
    /// Explicit params win. Otherwise the body is used, then standard input
    /// for CLI runs, then the query string (GET) or form fields (POST).
    /// JSON payloads are decoded; placeholder captures of the matched route
    /// are merged in; the `params` filter runs over a non-empty result.
    ///
    /// # Errors
    ///
    /// Halts with `MalformedParams` for undecodable payloads and for results
    /// that are not key/value maps.
    pub fn fetch_params(&self, explicit: Option<Value>) -> Result<Map<String, Value>> {
        let from_request = explicit.is_none();

        let data = match explicit {
            Some(data) => data,
            None => {
                if let Some(bytes) = self.input.body_bytes() {
                    if std::str::from_utf8(bytes).is_err() {
                        warn!("Request payload is not valid UTF-8");
                        return Err(self.halt(CoreCode::MalformedParams));
                    }
                }
                let mut raw = self.input.body_str().trim().to_string();
                if raw.is_empty() && self.is_cli() {
                    raw = self.input.stdin().trim().to_string();
                }
                if !raw.is_empty() {
                    Value::String(raw)
                } else if self.get_method() == Some("GET") && !self.input.query().is_empty() {
                    Value::Object(self.input.query().clone())
                } else if self.get_method() == Some("POST") && !self.input.form().is_empty() {
                    Value::Object(self.input.form().clone())
                } else {
                    Value::Object(Map::new())
                }
            }
        };

        let mut data = match data {
            Value::String(payload) if !payload.trim().is_empty() => {
                if !is_json_payload(&payload) {
                    warn!("Request payload is not JSON");
                    return Err(self.halt(CoreCode::MalformedParams));
                }
                parse_json::<Value>(&payload).map_err(|err| {
                    warn!(error = %err, "Request payload could not be decoded");
                    self.halt(CoreCode::MalformedParams)
                })?
            }
            other => other,
        };

        if from_request {
            if let Value::Object(map) = &mut data {
                for (name, value) in self.route_captures() {
                    map.insert(name, value);
                }
            }
        }

        if !is_blank(&data) {
            data = self.run_filter("params", data, &Value::Null)?;
        }

        match data {
            Value::Object(map) => Ok(map),
            other if is_blank(&other) => Ok(Map::new()),
            _ => Err(self.halt(CoreCode::MalformedParams)),
        }
    }

    /// Merge parameters into the context and run the `setParams` hook
    ///
    /// The `params` filter runs again over the merged parameters.
    ///
    /// # Errors
    ///
    /// Propagates halts raised by `params` filters and `setParams` hooks, and
    /// halts with `MalformedParams` if a filter returns something other than
    /// a key/value map.
    pub fn set_params(&mut self, params: Map<String, Value>) -> Result<()> {
        for (key, value) in params {
            self.params.insert(key, value);
        }
        let merged = Value::Object(std::mem::take(&mut self.params));
        self.params = match self.run_filter("params", merged, &Value::Null)? {
            Value::Object(map) => map,
            other if is_blank(&other) => Map::new(),
            _ => return Err(self.halt(CoreCode::MalformedParams)),
        };
        self.run_hook("setParams", &Value::Null, &Value::Null)
    }

    /// Validator seeded with `data`
    #[must_use]
    pub fn validator(&self, data: Map<String, Value>) -> Validator<'_> {
        Validator::new(data)
    }

    /// Validate current parameters against the matched route
    ///
    /// Fields run in declaration order. Optional absent fields are skipped;
    /// required absent fields take their default. The first failing field halts with
    /// `ValidationFailed` and its messages. The `validateParams` filter runs
    /// over the `{params, meta}` result.
    ///
    /// # Errors
    ///
    /// Halts with `ValidationFailed`, or propagates halts from callbacks,
    /// transforms and filters.
    pub fn validate_params(&self) -> Result<ValidatedParams> {
        let mut input = self.params.clone();

        let validated = match self.route.as_ref().filter(|route| !route.params.is_empty()) {
            None => ValidatedParams {
                params: input,
                meta: Map::new(),
            },
            Some(route) => {
                let mut validated = ValidatedParams::default();
                if let Some(test_data) = input.get("test_data").filter(|v| is_truthy(v)) {
                    validated.params.insert("test_data".to_string(), test_data.clone());
                }

                for (field, rule) in route.params.iter() {
                    let required = rule.required.is_required(&input);
                    if !required && !is_set(&input, field) {
                        continue;
                    }
                    if !is_set(&input, field) {
                        if let Some(default) = &rule.default {
                            input.insert(field.to_string(), default.clone());
                        }
                    }

                    let mut validator = self.validator(input.clone());
                    self.apply_rule(&mut validator, rule, required);
                    let value = validator.validate(field)?;

                    if validator.has_errors() {
                        return Err(self.stop(
                            Reply::new(CoreCode::ValidationFailed).messages(validator.errors().messages()),
                        ));
                    }
                    if rule.validate_only {
                        continue;
                    }

                    let mut value = value;
                    if rule.trim.unwrap_or(route.params_trim) {
                        value = trim_value(value);
                    }
                    if rule.unique {
                        value = unique_value(value);
                    }

                    let bucket = if rule.meta {
                        &mut validated.meta
                    } else {
                        &mut validated.params
                    };
                    bucket.insert(field.to_string(), value);
                }
                validated
            }
        };

        let filtered = self.run_filter("validateParams", serde_json::to_value(validated)?, &Value::Null)?;
        Ok(serde_json::from_value(filtered)?)
    }

    fn apply_rule<'a>(&'a self, validator: &mut Validator<'a>, rule: &ParamRule, required: bool) {
        let msg = |check: &str| rule.message(check);

        if required {
            validator.required(msg("required"));
        }

        if let Some(param_type) = &rule.param_type {
            match param_type {
                ParamType::Int => validator.rule(Check::Integer, msg("integer").or(msg("int"))),
                ParamType::Float => validator.rule(Check::Float, msg("float").or(msg("number"))),
                ParamType::Array => validator.rule(Check::Array, msg("array")),
                ParamType::CardNumber => validator.rule(Check::CardNumber, msg("ccnum")),
                ParamType::Date => validator.rule(Check::Date, msg("date")),
                ParamType::Email => validator.rule(Check::Email, msg("email")),
                ParamType::Url => validator.rule(Check::Url, msg("url")),
                ParamType::Ip => validator.rule(Check::Ip, msg("ip")),
                ParamType::Domain => validator.rule(Check::Domain, msg("domain")),
                ParamType::String => validator.rule(Check::Str, msg("string")),
                ParamType::Boolean => validator.rule(Check::Boolean, msg("boolean")),
                ParamType::Password => validator
                    .rule(Check::Str, msg("string"))
                    .rule(Check::MinLength(10), msg("minlength"))
                    .rule(Check::HasSymbols(1), msg("hassymbols"))
                    .rule(Check::HasNumbers(1), msg("hasnumbers"))
                    .rule(Check::HasLetters(1), msg("hasletters"))
                    .rule(Check::HasLowercase(1), msg("haslowercase"))
                    .rule(Check::HasUppercase(1), msg("hasuppercase")),
                ParamType::Other(name) => {
                    warn!(param_type = %name, "Unknown parameter type; no type check applied");
                    &mut *validator
                }
            };
        }

        if let Some(n) = rule.min_length {
            validator.rule(Check::MinLength(n), msg("minlength"));
        }
        if let Some(n) = rule.max_length {
            validator.rule(Check::MaxLength(n), msg("maxlength"));
        }
        if let Some(n) = rule.length {
            validator.rule(Check::Length(n), msg("length"));
        }
        if let Some(n) = rule.min {
            validator.rule(Check::Min(n), msg("min"));
        }
        if let Some(n) = rule.max {
            validator.rule(Check::Max(n), msg("max"));
        }
        if let Some((low, high)) = rule.between {
            validator.rule(Check::Between(low, high), msg("between"));
        }
        if let Some((low, high)) = rule.between_length {
            validator.rule(Check::BetweenLength(low, high), msg("betweenlength"));
        }
        if let Some(other) = &rule.matches {
            validator.rule(Check::Matches(other.clone()), msg("matches"));
        }
        if let Some(other) = &rule.not_matches {
            validator.rule(Check::NotMatches(other.clone()), msg("notmatches"));
        }
        if let Some(prefix) = &rule.starts_with {
            validator.rule(Check::StartsWith(prefix.clone()), msg("startswith"));
        }
        if let Some(prefix) = &rule.not_starts_with {
            validator.rule(Check::NotStartsWith(prefix.clone()), msg("notstartswith"));
        }
        if let Some(suffix) = &rule.ends_with {
            validator.rule(Check::EndsWith(suffix.clone()), msg("endswith"));
        }
        if let Some(suffix) = &rule.not_ends_with {
            validator.rule(Check::NotEndsWith(suffix.clone()), msg("notendswith"));
        }
        if rule.numbers_only.is_some() {
            validator.rule(Check::Digits, msg("digits"));
        }
        for (bound, is_min) in [(&rule.min_date, true), (&rule.max_date, false)] {
            let Some(bound) = bound else { continue };
            match parse_date(bound) {
                Some(date) if is_min => {
                    validator.rule(Check::MinDate(date), msg("mindate"));
                }
                Some(date) => {
                    validator.rule(Check::MaxDate(date), msg("maxdate"));
                }
                None => warn!(date = %bound, "Unreadable date bound; check skipped"),
            }
        }
        if let Some(allowed) = &rule.one_of {
            validator.rule(Check::In(allowed.clone()), msg("in"));
        }
        if let Some(needle) = &rule.has {
            validator.rule(Check::Has(needle.clone()), msg("has"));
        }
        if let Some(n) = rule.has_symbols {
            validator.rule(Check::HasSymbols(n), msg("hassymbols"));
        }
        if let Some(n) = rule.has_numbers {
            validator.rule(Check::HasNumbers(n), msg("hasnumbers"));
        }
        if let Some(n) = rule.has_letters {
            validator.rule(Check::HasLetters(n), msg("hasletters"));
        }
        if let Some(n) = rule.has_lowercase {
            validator.rule(Check::HasLowercase(n), msg("haslowercase"));
        }
        if let Some(n) = rule.has_uppercase {
            validator.rule(Check::HasUppercase(n), msg("hasuppercase"));
        }

        if let Some(reference) = rule.callback.clone() {
            validator.callback(
                move |value| {
                    let controller = self.get_controller(&reference)?;
                    let verdict = self.get_response(&controller, value.clone(), Value::Null, Value::Null)?;
                    Ok(is_truthy(&verdict))
                },
                msg("callback"),
            );
        }
        if let Some(reference) = rule.filter.clone() {
            validator.filter(move |value| {
                let controller = self.get_controller(&reference)?;
                self.get_response(&controller, value, Value::Null, Value::Null)
            });
        }
    }
}
