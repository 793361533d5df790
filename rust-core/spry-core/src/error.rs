//! # Error Handling
//!
//! Centralized error types for Spry core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! A request never "recovers" from a stop: [`Error::Halt`] carries the
//! finished envelope up to [`crate::RequestContext::run`], which emits it.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for Spry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Spry pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The request was stopped; the boxed value is the envelope to send
    #[error("request halted with code {}", halt_code(.0))]
    Halt(Box<Value>),

    /// Configuration could not be read or decoded
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request payload could not be parsed as JSON
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] simd_json::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invocation bundle was not valid base64
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database provider error
    #[error("Database error: {message}")]
    Database {
        /// Error message from the provider
        message: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Wrap a built envelope as a terminal halt
    #[must_use]
    pub fn halt(envelope: Value) -> Self {
        Self::Halt(Box::new(envelope))
    }

    /// Whether this error is a terminal halt carrying an envelope
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }

    /// The halted envelope, if any
    #[must_use]
    pub fn envelope(&self) -> Option<&Value> {
        match self {
            Self::Halt(envelope) => Some(envelope),
            _ => None,
        }
    }
}

fn halt_code(envelope: &Value) -> &str {
    envelope.get("code").and_then(Value::as_str).unwrap_or("-")
}
