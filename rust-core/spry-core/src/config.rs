//! # Configuration
//!
//! Application configuration and the arguments of a single run.
//!
//! A run can be configured from an inline [`Config`], a `.json` / `.toml`
//! file, an inline JSON document, or a base64-encoded JSON invocation
//! bundle that also carries the run arguments (used by cron and background
//! tasks).
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Only decodes configuration; nothing here touches the request
//! - **O**: Unknown keys are kept in [`Config::extra`] for components

use crate::codes::{CoreCode, ResponseCodeTable};
use crate::controller::ControllerRef;
use crate::error::{Error, Result};
use crate::json::{is_truthy, parse_json, to_json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Application salt; a run without one is refused
    pub salt: String,
    /// Path template to route definition
    pub routes: Map<String, Value>,
    /// Response codes merged over the core table
    pub response_codes: ResponseCodeTable,
    /// `Name: value` header lines replacing the CORS defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<String>>,
    /// Settings handed to the database provider
    pub db: Map<String, Value>,
    /// Registered database provider name
    pub db_provider: String,
    /// Registered log provider name
    pub logger_provider: String,
    /// Project root; defaults to the config file's directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    /// Test declarations
    pub tests: Map<String, Value>,
    /// Keys not known to the core
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    /// Load a `.toml` or `.json` file
    ///
    /// `project_path` defaults to the file's directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, or a parse error.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let mut config: Self = if is_toml {
            toml::from_str(&text)?
        } else {
            Self::from_json(&text)?
        };

        if config.project_path.is_none() {
            config.project_path = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }

    /// Decode a JSON document
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document is not an object.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = parse_json(text)?;
        if !value.is_object() {
            return Err(Error::Config {
                message: "configuration must be a JSON object".to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Where a run's configuration comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Already built configuration
    Inline(Box<Config>),
    /// `.json` or `.toml` file
    Path(PathBuf),
    /// JSON document or base64 invocation bundle
    Text(String),
}

impl ConfigSource {
    /// Interpret a command-line style argument: an existing file, otherwise text
    #[must_use]
    pub fn from_arg(arg: &str) -> Self {
        let path = Path::new(arg);
        if !arg.trim().is_empty() && path.is_file() {
            Self::Path(path.to_path_buf())
        } else {
            Self::Text(arg.to_string())
        }
    }

    fn from_bundle_value(value: Value) -> std::result::Result<Option<Self>, ConfigFailure> {
        match value {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => Ok(Some(Self::from_arg(&text))),
            Value::Object(_) => serde_json::from_value(value)
                .map(|config| Some(Self::Inline(Box::new(config))))
                .map_err(|err| ConfigFailure::malformed(err.to_string())),
            other => Err(ConfigFailure::malformed(format!("unsupported config value {other}"))),
        }
    }
}

impl From<Config> for ConfigSource {
    fn from(config: Config) -> Self {
        Self::Inline(Box::new(config))
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Base64 JSON bundle carrying a configuration and run arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationBundle {
    /// Config path, JSON document or inline object
    pub config: Value,
    /// Controller to call instead of routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerRef>,
    /// Explicit parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Path to route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Background process flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Value>,
    /// Meta passed to the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Cron flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<Value>,
}

impl InvocationBundle {
    /// Whether text should be read as a bundle rather than JSON
    ///
    /// Bundles never contain quotes or brackets.
    #[must_use]
    pub fn looks_encoded(text: &str) -> bool {
        let text = text.trim();
        !text.is_empty() && !text.contains(['"', '[', '{'])
    }

    /// Decode base64 JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::Base64` or a JSON error.
    pub fn decode(text: &str) -> Result<Self> {
        let bytes = STANDARD.decode(text.trim())?;
        let json = String::from_utf8_lossy(&bytes);
        let value: Value = parse_json(&json)?;
        if !value.is_object() {
            return Err(Error::Config {
                message: "invocation bundle must be a JSON object".to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encode as base64 JSON
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the bundle cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        Ok(STANDARD.encode(to_json(self)?))
    }
}

/// Arguments of one run
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Configuration source
    pub config: Option<ConfigSource>,
    /// Controller to call instead of routing
    pub controller: Option<ControllerRef>,
    /// Explicit parameters; request input is ignored when set
    pub params: Option<Value>,
    /// Path to route instead of the request path
    pub path: Option<String>,
    /// Run as a background process
    pub process: Option<bool>,
    /// Meta passed to the controller
    pub meta: Option<Map<String, Value>>,
    /// Run as a cron task
    pub cron: bool,
}

impl RunArgs {
    /// Arguments with a configuration source
    pub fn new(config: impl Into<ConfigSource>) -> Self {
        Self {
            config: Some(config.into()),
            ..Self::default()
        }
    }

    /// Call this controller instead of routing
    #[must_use]
    pub fn controller(mut self, controller: impl Into<ControllerRef>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    /// Use explicit parameters
    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Route this path
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set meta
    #[must_use]
    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the background process flag
    #[must_use]
    pub const fn process(mut self, process: bool) -> Self {
        self.process = Some(process);
        self
    }

    /// Set the cron flag
    #[must_use]
    pub const fn cron(mut self, cron: bool) -> Self {
        self.cron = cron;
        self
    }

    fn fill_from(&mut self, bundle: InvocationBundle) {
        if let Some(cron) = bundle.cron {
            self.cron = is_truthy(&cron);
        }
        if self.controller.is_none() {
            self.controller = bundle.controller.filter(|c| !c.is_empty());
        }
        if self.params.is_none() {
            self.params = bundle.params;
        }
        if self.path.is_none() {
            self.path = bundle.path;
        }
        if self.process.is_none() {
            self.process = bundle.process.map(|p| is_truthy(&p));
        }
        if self.meta.is_none() {
            self.meta = bundle.meta;
        }
    }

    /// Decode the configuration source
    ///
    /// A bundle fills in only the arguments not set explicitly.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissing` for an absent or empty source and
    /// `ConfigMalformed` for undecodable content.
    pub fn resolve_config(&mut self) -> std::result::Result<Config, ConfigFailure> {
        let mut source = self.config.take();

        if let Some(ConfigSource::Text(text)) = &source {
            if InvocationBundle::looks_encoded(text) && !Path::new(text.trim()).is_file() {
                let mut bundle =
                    InvocationBundle::decode(text).map_err(|err| ConfigFailure::malformed(err.to_string()))?;
                source = ConfigSource::from_bundle_value(std::mem::take(&mut bundle.config))?;
                self.fill_from(bundle);
            }
        }

        match source {
            None => Err(ConfigFailure::missing("no configuration given")),
            Some(ConfigSource::Inline(config)) => Ok(*config),
            Some(ConfigSource::Text(text)) if text.trim().is_empty() => {
                Err(ConfigFailure::missing("configuration is empty"))
            }
            Some(ConfigSource::Text(text)) => {
                Config::from_json(&text).map_err(|err| ConfigFailure::malformed(err.to_string()))
            }
            Some(ConfigSource::Path(path)) if !path.is_file() => Err(ConfigFailure::missing(format!(
                "configuration file {} not found",
                path.display()
            ))),
            Some(ConfigSource::Path(path)) => {
                Config::from_path(&path).map_err(|err| ConfigFailure::malformed(err.to_string()))
            }
        }
    }
}

/// Why a configuration could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFailure {
    /// Core code to stop with
    pub code: CoreCode,
    /// Diagnostic detail
    pub detail: String,
}

impl ConfigFailure {
    fn missing(detail: impl Into<String>) -> Self {
        Self {
            code: CoreCode::ConfigMissing,
            detail: detail.into(),
        }
    }

    fn malformed(detail: impl Into<String>) -> Self {
        Self {
            code: CoreCode::ConfigMalformed,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}
