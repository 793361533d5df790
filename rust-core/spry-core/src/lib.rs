//! # Spry Core
//!
//! Request pipeline for the Spry micro-framework.
//! Resolves one HTTP or CLI request to a controller, validates its
//! parameters against the route's schema and answers with a JSON envelope.
//!
//! ## Architecture
//!
//! One [`RequestContext`] holds all state of a request and threads it
//! through every stage. Stages fail with [`Error::Halt`], which carries the
//! finished envelope back to [`RequestContext::run`].
//!
//! ## Modules
//!
//! - `context` - Request state and the `run` lifecycle
//! - `config` - Configuration sources and run arguments
//! - `request` - Transport-neutral request input
//! - `route` / `router` - Route definitions and path matching
//! - `schema` / `validator` / `params` - Parameter rules and validation
//! - `hooks` - Hooks and filters
//! - `controller` - Controller references, classes and dispatch
//! - `codes` / `response` - Response codes, envelopes and output
//! - `component` - Pluggable components
//! - `providers` - Database and log providers
//! - `json` - JSON parsing with simd-json
//! - `http` - hyper adapter
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codes;
pub mod component;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod http;
pub mod json;
pub mod params;
pub mod providers;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod schema;
pub mod validator;

pub use codes::{CodeConflict, CodeGroup, CodeMessages, CoreCode, Message, ResponseCode, ResponseCodeTable, Status};
pub use component::Component;
pub use config::{Config, ConfigFailure, ConfigSource, InvocationBundle, RunArgs};
pub use context::RequestContext;
pub use controller::{Args, CallableId, ClassDef, ControllerHandle, ControllerRef, ControllerRegistry};
pub use error::{Error, Result};
pub use hooks::{HookEntry, HookRegistry};
pub use http::from_hyper;
pub use json::{parse_json, to_json};
pub use params::ValidatedParams;
pub use providers::{DatabaseProvider, LogProvider, ProviderRegistry, TracingLogger};
pub use request::RequestInput;
pub use response::{CorsHeaders, Envelope, Output, Reply};
pub use route::{normalize_path, Route, RouteDef};
pub use router::RouteRegistry;
pub use schema::{ParamRule, ParamType, ParamsSchema, Required};
pub use validator::{Check, FieldError, ValidationCode, ValidationErrors, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
