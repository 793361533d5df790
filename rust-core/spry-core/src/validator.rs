//! # Validation Module
//!
//! Rule-chain validator for a single field at a time, plus structured
//! validation errors.
//!
//! A [`Validator`] is seeded with the full input (so `matches` can compare
//! against other fields), given an ordered list of [`Check`]s, and then
//! asked to [`Validator::validate`] one field. Successful `int`, `float`
//! and `boolean` checks coerce the value.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Checks values; deciding what to check is the caller's job
//! - **O**: Custom predicates and transforms plug in as closures

use crate::error::Result;
use crate::json::text_of;
use crate::schema::{coerce_bool, coerce_float, coerce_int};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Custom predicate; `Ok(false)` fails the field
pub type Predicate<'a> = Box<dyn Fn(&Value) -> Result<bool> + 'a>;

/// Custom transform; the result replaces the value
pub type Transform<'a> = Box<dyn Fn(Value) -> Result<Value> + 'a>;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Value is invalid type
    InvalidType,
    /// Value is too short
    TooShort,
    /// Value is too long
    TooLong,
    /// Value is below minimum
    TooSmall,
    /// Value is above maximum
    TooLarge,
    /// Value doesn't match pattern
    InvalidFormat,
    /// Value doesn't equal (or equals) another field
    Mismatch,
    /// Value is not in allowed set
    InvalidChoice,
    /// Custom validation failed
    Custom,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a "required field" error
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("{field} is required"),
            field,
            code: ValidationCode::Required,
        }
    }

    /// Create an "invalid type" error
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field = field.into();
        Self {
            message: format!("{field} must be {expected}"),
            field,
            code: ValidationCode::InvalidType,
        }
    }
}

/// Collection of validation errors
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Messages in the order the checks failed
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

/// A single check in a rule chain
pub enum Check<'a> {
    /// Present and non-empty
    Required,
    /// Integer, coercing numeric strings
    Integer,
    /// Number, coercing numeric strings
    Float,
    /// Array or map
    Array,
    /// Luhn-valid card number
    CardNumber,
    /// Parsable date
    Date,
    /// Email address
    Email,
    /// Absolute URL with a host
    Url,
    /// IP address
    Ip,
    /// Domain name
    Domain,
    /// String
    Str,
    /// Boolean, coercing common string forms
    Boolean,
    /// Minimum character count
    MinLength(usize),
    /// Maximum character count
    MaxLength(usize),
    /// Exact character count
    Length(usize),
    /// Inclusive lower bound
    Min(f64),
    /// Inclusive upper bound
    Max(f64),
    /// Inclusive numeric range
    Between(f64, f64),
    /// Inclusive character count range
    BetweenLength(usize, usize),
    /// Equal to another field
    Matches(String),
    /// Not equal to another field
    NotMatches(String),
    /// Prefix
    StartsWith(String),
    /// Forbidden prefix
    NotStartsWith(String),
    /// Suffix
    EndsWith(String),
    /// Forbidden suffix
    NotEndsWith(String),
    /// Digits only
    Digits,
    /// On or after
    MinDate(NaiveDateTime),
    /// On or before
    MaxDate(NaiveDateTime),
    /// Allow-list
    In(Vec<Value>),
    /// Substring
    Has(String),
    /// Minimum symbol count
    HasSymbols(usize),
    /// Minimum digit count
    HasNumbers(usize),
    /// Minimum letter count
    HasLetters(usize),
    /// Minimum lowercase count
    HasLowercase(usize),
    /// Minimum uppercase count
    HasUppercase(usize),
    /// Custom predicate
    Callback(Predicate<'a>),
    /// Custom transform
    Filter(Transform<'a>),
}

impl Check<'_> {
    /// Lower-cased name used to look up custom messages
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Array => "array",
            Self::CardNumber => "ccnum",
            Self::Date => "date",
            Self::Email => "email",
            Self::Url => "url",
            Self::Ip => "ip",
            Self::Domain => "domain",
            Self::Str => "string",
            Self::Boolean => "boolean",
            Self::MinLength(_) => "minlength",
            Self::MaxLength(_) => "maxlength",
            Self::Length(_) => "length",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Between(..) => "between",
            Self::BetweenLength(..) => "betweenlength",
            Self::Matches(_) => "matches",
            Self::NotMatches(_) => "notmatches",
            Self::StartsWith(_) => "startswith",
            Self::NotStartsWith(_) => "notstartswith",
            Self::EndsWith(_) => "endswith",
            Self::NotEndsWith(_) => "notendswith",
            Self::Digits => "digits",
            Self::MinDate(_) => "mindate",
            Self::MaxDate(_) => "maxdate",
            Self::In(_) => "in",
            Self::Has(_) => "has",
            Self::HasSymbols(_) => "hassymbols",
            Self::HasNumbers(_) => "hasnumbers",
            Self::HasLetters(_) => "hasletters",
            Self::HasLowercase(_) => "haslowercase",
            Self::HasUppercase(_) => "hasuppercase",
            Self::Callback(_) => "callback",
            Self::Filter(_) => "filter",
        }
    }

    fn failure(&self, field: &str) -> FieldError {
        use ValidationCode as C;
        let (code, message) = match self {
            Self::Required => return FieldError::required(field),
            Self::Integer => return FieldError::invalid_type(field, "an integer"),
            Self::Float => return FieldError::invalid_type(field, "a number"),
            Self::Array => return FieldError::invalid_type(field, "an array"),
            Self::Str => return FieldError::invalid_type(field, "a string"),
            Self::Boolean => return FieldError::invalid_type(field, "a boolean"),
            Self::CardNumber => (C::InvalidFormat, format!("{field} must be a valid credit card number")),
            Self::Date => (C::InvalidFormat, format!("{field} must be a valid date")),
            Self::Email => (C::InvalidFormat, format!("{field} must be a valid email address")),
            Self::Url => (C::InvalidFormat, format!("{field} must be a valid URL")),
            Self::Ip => (C::InvalidFormat, format!("{field} must be a valid IP address")),
            Self::Domain => (C::InvalidFormat, format!("{field} must be a valid domain")),
            Self::MinLength(n) => (C::TooShort, format!("{field} must be at least {n} characters")),
            Self::MaxLength(n) => (C::TooLong, format!("{field} must be at most {n} characters")),
            Self::Length(n) => (C::InvalidFormat, format!("{field} must be exactly {n} characters")),
            Self::Min(n) => (C::TooSmall, format!("{field} must be at least {n}")),
            Self::Max(n) => (C::TooLarge, format!("{field} must be at most {n}")),
            Self::Between(a, b) => (C::InvalidChoice, format!("{field} must be between {a} and {b}")),
            Self::BetweenLength(a, b) => (
                C::InvalidFormat,
                format!("{field} must be between {a} and {b} characters"),
            ),
            Self::Matches(other) => (C::Mismatch, format!("{field} must match {}", ucwords(other))),
            Self::NotMatches(other) => (C::Mismatch, format!("{field} must not match {}", ucwords(other))),
            Self::StartsWith(s) => (C::InvalidFormat, format!("{field} must start with \"{s}\"")),
            Self::NotStartsWith(s) => (C::InvalidFormat, format!("{field} must not start with \"{s}\"")),
            Self::EndsWith(s) => (C::InvalidFormat, format!("{field} must end with \"{s}\"")),
            Self::NotEndsWith(s) => (C::InvalidFormat, format!("{field} must not end with \"{s}\"")),
            Self::Digits => (C::InvalidFormat, format!("{field} must contain only digits")),
            Self::MinDate(d) => (C::TooSmall, format!("{field} must be on or after {}", d.date())),
            Self::MaxDate(d) => (C::TooLarge, format!("{field} must be on or before {}", d.date())),
            Self::In(_) => (C::InvalidChoice, format!("{field} must be one of the allowed values")),
            Self::Has(s) => (C::InvalidFormat, format!("{field} must contain \"{s}\"")),
            Self::HasSymbols(n) => (C::InvalidFormat, format!("{field} must contain at least {n} symbol(s)")),
            Self::HasNumbers(n) => (C::InvalidFormat, format!("{field} must contain at least {n} number(s)")),
            Self::HasLetters(n) => (C::InvalidFormat, format!("{field} must contain at least {n} letter(s)")),
            Self::HasLowercase(n) => (
                C::InvalidFormat,
                format!("{field} must contain at least {n} lowercase letter(s)"),
            ),
            Self::HasUppercase(n) => (
                C::InvalidFormat,
                format!("{field} must contain at least {n} uppercase letter(s)"),
            ),
            Self::Callback(_) | Self::Filter(_) => (C::Custom, format!("{field} is invalid")),
        };
        FieldError::new(field, message, code)
    }
}

enum Outcome {
    Pass,
    Coerce(Value),
    Fail,
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

/// Rule-chain validator
pub struct Validator<'a> {
    data: Map<String, Value>,
    rules: Vec<(Check<'a>, Option<String>)>,
    errors: ValidationErrors,
}

impl<'a> Validator<'a> {
    /// Create a validator over the full input
    #[must_use]
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            rules: Vec::new(),
            errors: ValidationErrors::new(),
        }
    }

    /// Append a check with an optional custom message
    pub fn rule(&mut self, check: Check<'a>, message: Option<&str>) -> &mut Self {
        self.rules.push((check, message.map(str::to_string)));
        self
    }

    /// Append [`Check::Required`]
    pub fn required(&mut self, message: Option<&str>) -> &mut Self {
        self.rule(Check::Required, message)
    }

    /// Append a custom predicate
    pub fn callback<F>(&mut self, predicate: F, message: Option<&str>) -> &mut Self
    where
        F: Fn(&Value) -> Result<bool> + 'a,
    {
        self.rule(Check::Callback(Box::new(predicate)), message)
    }

    /// Append a custom transform
    pub fn filter<F>(&mut self, transform: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Value> + 'a,
    {
        self.rule(Check::Filter(Box::new(transform)), None)
    }

    /// Errors collected so far
    #[must_use]
    pub const fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Whether any check failed
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Run the pending checks against `field` and return its final value
    ///
    /// Checks other than `required` are skipped when the value is empty.
    /// Scalar checks apply to every element of a list.
    ///
    /// # Errors
    ///
    /// Propagates errors (including halts) raised by callbacks and filters.
    pub fn validate(&mut self, field: &str) -> Result<Value> {
        let rules = std::mem::take(&mut self.rules);
        let mut value = self.data.get(field).cloned().unwrap_or(Value::Null);

        for (check, message) in rules {
            let outcome = match &check {
                Check::Required => Outcome::from(is_present(&value)),
                _ if !is_present(&value) => continue,
                Check::Filter(transform) => {
                    value = transform(value)?;
                    continue;
                }
                Check::Callback(predicate) => Outcome::from(predicate(&value)?),
                Check::Array => Outcome::from(value.is_array() || value.is_object()),
                Check::Matches(other) => Outcome::from(self.data.get(other) == Some(&value)),
                Check::NotMatches(other) => Outcome::from(self.data.get(other) != Some(&value)),
                scalar => match &value {
                    Value::Array(items) => check_each(scalar, items),
                    single => check_scalar(scalar, single),
                },
            };

            match outcome {
                Outcome::Pass => {}
                Outcome::Coerce(coerced) => value = coerced,
                Outcome::Fail => {
                    let mut error = check.failure(field);
                    if let Some(message) = message {
                        error.message = message;
                    }
                    self.errors.add(error);
                }
            }
        }

        Ok(value)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn check_each(check: &Check<'_>, items: &[Value]) -> Outcome {
    let mut coerced = Vec::with_capacity(items.len());
    let mut changed = false;
    for item in items {
        match check_scalar(check, item) {
            Outcome::Fail => return Outcome::Fail,
            Outcome::Pass => coerced.push(item.clone()),
            Outcome::Coerce(value) => {
                changed = true;
                coerced.push(value);
            }
        }
    }
    if changed {
        Outcome::Coerce(Value::Array(coerced))
    } else {
        Outcome::Pass
    }
}

fn check_scalar(check: &Check<'_>, value: &Value) -> Outcome {
    let text = text_of(value);
    let with_text = |f: &dyn Fn(&str) -> bool| Outcome::from(text.as_deref().is_some_and(f));
    let count = |pred: fn(&char) -> bool, min: usize| {
        with_text(&|s: &str| s.chars().filter(pred).count() >= min)
    };

    match check {
        Check::Integer => coerce_int(value).map_or(Outcome::Fail, Outcome::Coerce),
        Check::Float => coerce_float(value).map_or(Outcome::Fail, Outcome::Coerce),
        Check::Boolean => coerce_bool(value).map_or(Outcome::Fail, Outcome::Coerce),
        Check::Str => Outcome::from(value.is_string()),
        Check::CardNumber => with_text(&is_card_number),
        Check::Date => with_text(&|s: &str| parse_date(s).is_some()),
        Check::Email => with_text(&is_email),
        Check::Url => with_text(&|s: &str| url::Url::parse(s).is_ok_and(|u| u.has_host())),
        Check::Ip => with_text(&|s: &str| s.parse::<IpAddr>().is_ok()),
        Check::Domain => with_text(&is_domain),
        Check::MinLength(n) => with_text(&|s: &str| s.chars().count() >= *n),
        Check::MaxLength(n) => with_text(&|s: &str| s.chars().count() <= *n),
        Check::Length(n) => with_text(&|s: &str| s.chars().count() == *n),
        Check::BetweenLength(a, b) => with_text(&|s: &str| (*a..=*b).contains(&s.chars().count())),
        Check::Min(n) => Outcome::from(number_of(value).is_some_and(|v| v >= *n)),
        Check::Max(n) => Outcome::from(number_of(value).is_some_and(|v| v <= *n)),
        Check::Between(a, b) => Outcome::from(number_of(value).is_some_and(|v| v >= *a && v <= *b)),
        Check::StartsWith(p) => with_text(&|s: &str| s.starts_with(p.as_str())),
        Check::NotStartsWith(p) => with_text(&|s: &str| !s.starts_with(p.as_str())),
        Check::EndsWith(p) => with_text(&|s: &str| s.ends_with(p.as_str())),
        Check::NotEndsWith(p) => with_text(&|s: &str| !s.ends_with(p.as_str())),
        Check::Digits => with_text(&|s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        Check::MinDate(d) => with_text(&|s: &str| parse_date(s).is_some_and(|v| v >= *d)),
        Check::MaxDate(d) => with_text(&|s: &str| parse_date(s).is_some_and(|v| v <= *d)),
        Check::In(allowed) => Outcome::from(allowed.iter().any(|candidate| {
            candidate == value || (text.is_some() && text_of(candidate) == text)
        })),
        Check::Has(needle) => with_text(&|s: &str| s.contains(needle.as_str())),
        Check::HasSymbols(n) => count(|c| !c.is_alphanumeric() && !c.is_whitespace(), *n),
        Check::HasNumbers(n) => count(char::is_ascii_digit, *n),
        Check::HasLetters(n) => count(|c| c.is_alphabetic(), *n),
        Check::HasLowercase(n) => count(|c| c.is_lowercase(), *n),
        Check::HasUppercase(n) => count(|c| c.is_uppercase(), *n),
        Check::Required
        | Check::Array
        | Check::Matches(_)
        | Check::NotMatches(_)
        | Check::Callback(_)
        | Check::Filter(_) => Outcome::Pass,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn ucwords(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        boundary = c.is_whitespace();
    }
    out
}

fn is_card_number(s: &str) -> bool {
    let digits: Vec<u32> = s
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<_>>()
        .unwrap_or_default();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                *d
            }
        })
        .sum();
    sum % 10 == 0
}

fn is_domain(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && local.len() <= 64
        && !local.contains(char::is_whitespace)
        && !local.contains('@')
        && domain.contains('.')
        && is_domain(domain)
}

/// Parse a date or date-time in the common formats accepted by rules
///
/// Also accepts `now`, `today`, `tomorrow` and `yesterday` (UTC).
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let today = || Utc::now().date_naive().and_hms_opt(0, 0, 0);
    match s.to_lowercase().as_str() {
        "now" => return Some(Utc::now().naive_utc()),
        "today" => return today(),
        "tomorrow" => return today().map(|d| d + Duration::days(1)),
        "yesterday" => return today().map(|d| d - Duration::days(1)),
        _ => {}
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
