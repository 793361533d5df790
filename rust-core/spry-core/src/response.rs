//! # Response Envelope
//!
//! Builds the JSON envelope every request ends with, and the final
//! [`Output`] (header lines plus body) the host emits.
//!
//! ## Envelope
//!
//! `{status, code, messages, meta, hash, body}` where `code` is rebuilt from
//! the `(group, code, status)` triple and `hash` is the SHA-256 hex digest of
//! `code + JSON(body)`.

use crate::codes::{CoreCode, ResponseCode, ResponseCodeTable, Status};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::hooks::STOP_HOOK;
use crate::json::{is_blank, to_json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

/// Default language for code messages
pub const DEFAULT_LANG: &str = "en";

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Reported status
    pub status: Status,
    /// `"{group}-{prefix}{code}"`
    pub code: String,
    /// Resolved code message first, then any extra messages
    pub messages: Vec<String>,
    /// Free-form metadata
    pub meta: Map<String, Value>,
    /// Content hash of `code` and `body`
    pub hash: String,
    /// Response payload
    pub body: Value,
    /// Handed to `stop` hooks, removed before output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Value>,
}

/// Status implied by a payload
///
/// Empty list or map is `info`; non-empty values (and `0` / `"0"`) are
/// `success`; null is `warning`; anything else (`false`, `""`) is `error`.
#[must_use]
pub fn infer_status(data: &Value) -> Status {
    match data {
        Value::Array(items) if items.is_empty() => Status::Info,
        Value::Object(map) if map.is_empty() => Status::Info,
        Value::Null => Status::Warning,
        Value::Number(n) if n.as_i64() == Some(0) => Status::Success,
        Value::String(s) if s == "0" => Status::Success,
        other if !is_blank(other) => Status::Success,
        _ => Status::Error,
    }
}

/// SHA-256 hex digest of `code` followed by the JSON form of `body`
#[must_use]
pub fn response_hash(code: &str, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(to_json(body).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether a value already is a finished envelope
#[must_use]
pub fn is_envelope(value: &Value) -> bool {
    let filled = |key: &str| value.get(key).is_some_and(|v| !is_blank(v));
    value.is_object() && filled("status") && filled("code")
}

/// Parameters for [`RequestContext::response`] and [`RequestContext::stop`]
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Code triple
    pub code: ResponseCode,
    /// Payload
    pub data: Value,
    /// Status hint; the code's own status wins
    pub status: Option<Status>,
    /// Envelope meta
    pub meta: Map<String, Value>,
    /// Extra messages appended after the code message
    pub messages: Vec<String>,
    /// Data handed to `stop` hooks only
    pub private_data: Option<Value>,
}

impl Reply {
    /// Reply with a code and null data
    pub fn new(code: impl Into<ResponseCode>) -> Self {
        Self {
            code: code.into(),
            data: Value::Null,
            status: None,
            meta: Map::new(),
            messages: Vec::new(),
            private_data: None,
        }
    }

    /// Set the payload
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the status hint
    #[must_use]
    pub const fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set envelope meta
    #[must_use]
    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Append messages
    #[must_use]
    pub fn messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages.extend(messages.into_iter().map(Into::into));
        self
    }

    /// Attach private data for `stop` hooks
    #[must_use]
    pub fn private_data(mut self, data: Value) -> Self {
        self.private_data = Some(data);
        self
    }
}

/// Build an envelope against a code table
#[must_use]
pub fn build_envelope(table: &ResponseCodeTable, reply: Reply, lang: &str) -> Envelope {
    let status = reply
        .code
        .status
        .or(reply.status)
        .unwrap_or_else(|| infer_status(&reply.data));

    let resolved = table.resolve(reply.code.group, reply.code.code, status, lang);
    let code = resolved.code_string();

    let mut messages = vec![resolved.message];
    messages.extend(reply.messages);

    Envelope {
        status: resolved.status,
        hash: response_hash(&code, &reply.data),
        code,
        messages,
        meta: reply.meta,
        body: reply.data,
        private_data: reply.private_data,
    }
}

/// Permissive CORS header lines sent when no response headers are configured
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsHeaders {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "Origin, X-Requested-With, Content-Type, Accept, Authorization".to_string(),
        }
    }
}

impl CorsHeaders {
    /// `Name: value` lines
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Access-Control-Allow-Origin: {}", self.allow_origin),
            format!("Access-Control-Allow-Methods: {}", self.allow_methods),
            format!("Access-Control-Allow-Headers: {}", self.allow_headers),
        ]
    }
}

/// What the host emits: header lines and a body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// `Name: value` header lines
    pub headers: Vec<String>,
    /// Serialized JSON document, empty for preflight
    pub body: String,
}

impl Output {
    /// Header lines split into `(name, value)` pairs
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
    }

    /// Body parsed back into JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the body is not JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

impl RequestContext {
    fn lang(&self) -> String {
        self.param("lang")
            .and_then(Value::as_str)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(DEFAULT_LANG)
            .to_string()
    }

    /// Build an envelope with the active code table and request language
    #[must_use]
    pub fn build_response(&self, reply: Reply) -> Envelope {
        build_envelope(&self.config.response_codes, reply, &self.lang())
    }

    /// Build an envelope and run the `response` filter over it
    ///
    /// # Errors
    ///
    /// Propagates halts raised by `response` filters.
    pub fn response(&self, reply: Reply) -> Result<Value> {
        let envelope = serde_json::to_value(self.build_response(reply))?;
        self.run_filter("response", envelope, &Value::Null)
    }

    /// Stop the request with an envelope
    ///
    /// Runs the `stop` hook (with private data attached), then returns the
    /// halt to propagate with `?` or `Err(..)`.
    pub fn stop(&self, reply: Reply) -> Error {
        let mut envelope = self.build_response(reply);
        let private_data = envelope.private_data.take();

        let envelope = match serde_json::to_value(&envelope) {
            Ok(value) => value,
            Err(err) => return Error::from(err),
        };

        let mut hook_data = envelope.clone();
        if let (Some(private_data), Some(map)) = (private_data, hook_data.as_object_mut()) {
            map.insert("privateData".to_string(), private_data);
        }
        if let Err(err) = self.run_hook(STOP_HOOK, &hook_data, &Value::Null) {
            return err;
        }

        Error::halt(envelope)
    }

    /// Stop with just a code
    pub fn halt(&self, code: impl Into<ResponseCode>) -> Error {
        self.stop(Reply::new(code))
    }

    /// Ensure a controller result is an envelope
    ///
    /// Envelopes pass through; anything else is wrapped with code `0`.
    ///
    /// # Errors
    ///
    /// Propagates halts raised by `response` filters.
    pub fn send_response(&self, response: Value) -> Result<Value> {
        if is_envelope(&response) {
            Ok(response)
        } else {
            self.response(Reply::new(CoreCode::General).data(response))
        }
    }

    /// Render the final output
    ///
    /// Without a response only the headers are produced (preflight). The
    /// `output` filter runs over `{headers, body}` in both cases; if it
    /// fails the unfiltered output is sent.
    #[must_use]
    pub fn send_output(&self, response: Option<Value>) -> Output {
        let headers = self
            .config
            .response_headers
            .clone()
            .unwrap_or_else(|| CorsHeaders::default().lines());

        let Some(response) = response else {
            return self.finish_output(Output {
                headers,
                body: String::new(),
            });
        };

        let mut document = Map::new();
        document.insert("status".to_string(), Value::String(Status::Error.as_str().to_string()));
        document.insert("code".to_string(), Value::String(String::new()));
        document.insert(
            "method".to_string(),
            Value::String(self.get_method().unwrap_or_default().to_string()),
        );
        document.insert(
            "time".to_string(),
            Value::String(format!("{:.6}", self.started.elapsed().as_secs_f64())),
        );
        document.insert("requestId".to_string(), Value::String(self.request_id.clone()));
        document.insert("hash".to_string(), Value::String(String::new()));
        document.insert("messages".to_string(), Value::Array(Vec::new()));
        document.insert("meta".to_string(), Value::Object(Map::new()));
        document.insert("body".to_string(), Value::Null);

        match response {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key != "privateData" {
                        document.insert(key, value);
                    }
                }
            }
            other => {
                warn!("Response is not an object; sending it as the body");
                document.insert("body".to_string(), other);
            }
        }

        self.finish_output(Output {
            headers,
            body: to_json(&Value::Object(document)).unwrap_or_default(),
        })
    }

    fn finish_output(&self, output: Output) -> Output {
        match self.filter_output(&output) {
            Ok(filtered) => filtered,
            Err(err) => {
                error!(error = %err, "Output filter failed; sending unfiltered output");
                output
            }
        }
    }

    fn filter_output(&self, output: &Output) -> Result<Output> {
        if !self.filters.has("output") {
            return Ok(output.clone());
        }
        let value = self.run_filter("output", serde_json::to_value(output)?, &Value::Null)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> ResponseCodeTable {
        ResponseCodeTable::core()
    }

    #[test]
    fn test_infer_status() {
        assert_eq!(infer_status(&json!([])), Status::Info);
        assert_eq!(infer_status(&json!({})), Status::Info);
        assert_eq!(infer_status(&json!([1])), Status::Success);
        assert_eq!(infer_status(&json!(0)), Status::Success);
        assert_eq!(infer_status(&json!("0")), Status::Success);
        assert_eq!(infer_status(&Value::Null), Status::Warning);
        assert_eq!(infer_status(&json!(false)), Status::Error);
        assert_eq!(infer_status(&json!("")), Status::Error);
    }

    #[test]
    fn test_success_envelope() {
        let envelope = build_envelope(&table(), Reply::new(0).data(json!({"id": 1})), "en");
        assert_eq!(envelope.status, Status::Success);
        assert_eq!(envelope.code, "0-200");
        assert_eq!(envelope.messages, ["Success!"]);
        assert_eq!(envelope.hash, response_hash("0-200", &json!({"id": 1})));
        assert_eq!(envelope.hash.len(), 64);
    }

    #[test]
    fn test_code_status_overrides_hint() {
        let reply = Reply::new((0, 0, Status::Error)).status(Status::Success).data(json!([1]));
        let envelope = build_envelope(&table(), reply, "en");
        assert_eq!(envelope.code, "0-500");
        assert_eq!(envelope.status, Status::Error);
    }

    #[test]
    fn test_unknown_code_falls_back() {
        let envelope = build_envelope(&table(), Reply::new((7, 3)).data(json!(1)), "en");
        assert_eq!(envelope.code, "0-500");
        assert_eq!(envelope.messages, [crate::codes::UNKNOWN_MESSAGE]);
    }

    #[test]
    fn test_extra_messages_follow_code_message() {
        let reply = Reply::new(CoreCode::ValidationFailed).messages(["name is required"]);
        let envelope = build_envelope(&table(), reply, "en");
        assert_eq!(envelope.code, "0-420");
        assert_eq!(envelope.messages.len(), 2);
        assert_eq!(envelope.messages[1], "name is required");
    }

    #[test]
    fn test_hash_changes_with_body() {
        assert_ne!(response_hash("0-200", &json!(1)), response_hash("0-200", &json!(2)));
        assert_ne!(response_hash("0-200", &json!(1)), response_hash("0-100", &json!(1)));
    }

    #[test]
    fn test_is_envelope() {
        assert!(is_envelope(&json!({"status": "success", "code": "0-200"})));
        assert!(!is_envelope(&json!({"status": "", "code": "0-200"})));
        assert!(!is_envelope(&json!({"id": 1})));
        assert!(!is_envelope(&json!([1])));
    }

    #[test]
    fn test_send_response_wraps_plain_values() {
        let ctx = RequestContext::new();
        let wrapped = ctx.send_response(json!({"id": 1})).unwrap();
        assert_eq!(wrapped["code"], "0-200");
        assert_eq!(wrapped["body"], json!({"id": 1}));

        let passthrough = ctx.send_response(wrapped.clone()).unwrap();
        assert_eq!(passthrough, wrapped);
    }

    #[test]
    fn test_stop_hides_private_data_from_output() {
        let mut ctx = RequestContext::new();
        ctx.add_hook_fn(STOP_HOOK, 0, |_, args| {
            assert_eq!(args.params()["privateData"], "secret");
            Ok(Value::Null)
        });
        let err = ctx.stop(Reply::new(CoreCode::RouteNotFound).private_data(json!("secret")));
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope["code"], "0-411");
        assert!(envelope.get("privateData").is_none());
    }

    #[test]
    fn test_send_output_shape() {
        let ctx = RequestContext::new();
        let response = ctx.send_response(json!("hi")).unwrap();
        let output = ctx.send_output(Some(response));
        let body = output.json().unwrap();
        let keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["status", "code", "method", "time", "requestId", "hash", "messages", "meta", "body"]
        );
        assert_eq!(body["body"], "hi");
        assert_eq!(body["method"], "POST");
        assert_eq!(output.headers.len(), 3);
        assert!(output.header_pairs().any(|(name, value)| name == "Access-Control-Allow-Origin" && value == "*"));
    }

    #[test]
    fn test_preflight_output_has_no_body() {
        let ctx = RequestContext::new();
        let output = ctx.send_output(None);
        assert!(output.body.is_empty());
        assert!(!output.headers.is_empty());
    }

    #[test]
    fn test_output_filter() {
        let mut ctx = RequestContext::new();
        ctx.add_filter_fn("output", 0, |_, args| {
            let mut output = args.into_params();
            output["headers"] = json!(["X-Test: 1"]);
            Ok(output)
        });
        let output = ctx.send_output(Some(json!({"status": "success", "code": "0-200"})));
        assert_eq!(output.headers, ["X-Test: 1"]);
    }
}
