//! # Request Input
//!
//! Transport-neutral description of the incoming request: method, URI,
//! query and form fields, raw body, standard input and headers.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Request only holds request data, not response
//! - **D**: Does not expose hyper types; adapters live in `http`

use crate::route::{normalize_path, METHODS};
use hyper::body::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Path used for CLI invocations without a URI
pub const CLI_PATH: &str = "::cli";

/// Header marking a request as a test run
pub const TEST_HEADER: &str = "sprytest";

/// Incoming request data
#[derive(Debug, Clone, Default)]
pub struct RequestInput {
    method: Option<String>,
    uri: Option<String>,
    query: Map<String, Value>,
    form: Map<String, Value>,
    body: Option<Bytes>,
    stdin: Option<String>,
    headers: HashMap<String, String>,
    cli: bool,
}

impl RequestInput {
    /// Request with a method and URI; the query string is parsed from the URI
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let query = uri
            .split_once('?')
            .map(|(_, q)| parse_query_string(Some(q)))
            .unwrap_or_default();
        Self {
            method: Some(method.into()),
            uri: Some(uri),
            query,
            ..Self::default()
        }
    }

    /// Command-line invocation
    #[must_use]
    pub fn cli() -> Self {
        Self {
            cli: true,
            ..Self::default()
        }
    }

    /// Set the raw body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Parse a urlencoded body into form fields
    #[must_use]
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.form = parse_query_string(Some(body));
        self
    }

    /// Replace the query fields
    #[must_use]
    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    /// Set what standard input carried
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Add a header; names are case-insensitive
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Mark as a command-line invocation
    #[must_use]
    pub const fn with_cli(mut self, cli: bool) -> Self {
        self.cli = cli;
        self
    }

    /// Method exactly as received
    #[must_use]
    pub fn raw_method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Normalized method
    ///
    /// Only `POST`, `GET`, `PUT` and `DELETE` are reported; a missing method
    /// is `POST`.
    #[must_use]
    pub fn method(&self) -> Option<&'static str> {
        let Some(raw) = self.method.as_deref().map(str::trim).filter(|m| !m.is_empty()) else {
            return Some("POST");
        };
        let upper = raw.to_ascii_uppercase();
        METHODS.iter().copied().find(|m| *m == upper)
    }

    /// Whether this is a CORS preflight
    #[must_use]
    pub fn is_options(&self) -> bool {
        self.method
            .as_deref()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("OPTIONS"))
    }

    /// URI as received
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Request path: lower-cased URI without query, normalized
    ///
    /// CLI runs without a URI use [`CLI_PATH`].
    #[must_use]
    pub fn path(&self) -> String {
        match self.uri.as_deref().filter(|u| !u.is_empty()) {
            Some(uri) => {
                let path = uri.split_once('?').map_or(uri, |(p, _)| p);
                normalize_path(&path.to_lowercase())
            }
            None if self.cli => CLI_PATH.to_string(),
            None => String::new(),
        }
    }

    /// Query fields
    #[must_use]
    pub const fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    /// Form fields
    #[must_use]
    pub const fn form(&self) -> &Map<String, Value> {
        &self.form
    }

    /// Raw body bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Body as UTF-8 text; empty when absent or not UTF-8
    #[must_use]
    pub fn body_str(&self) -> &str {
        self.body_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or_default()
    }

    /// Standard input; empty when not captured
    #[must_use]
    pub fn stdin(&self) -> &str {
        self.stdin.as_deref().unwrap_or_default()
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// All headers, names lower-cased
    #[must_use]
    pub const fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether the request carries a non-empty `SpryTest` header
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.header(TEST_HEADER).is_some_and(|v| !v.trim().is_empty())
    }

    /// Whether this is a command-line invocation
    #[must_use]
    pub const fn is_cli(&self) -> bool {
        self.cli
    }
}

/// Parse a query string or urlencoded body
///
/// Later duplicates win; `name[]` keys collect into a list.
#[must_use]
pub fn parse_query_string(query: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    let Some(query) = query else {
        return fields;
    };

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = url_decode(key);
        let value = Value::String(url_decode(value));

        match key.strip_suffix("[]") {
            Some(list) => {
                let slot = fields
                    .entry(list.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(items) => items.push(value),
                    other => *other = Value::Array(vec![value]),
                }
            }
            None => {
                fields.insert(key, value);
            }
        }
    }
    fields
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
#[must_use]
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' => {
                let escape = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = escape {
                    decoded.push(byte);
                    i += 2;
                } else {
                    decoded.push(b'%');
                }
            }
            other => decoded.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
