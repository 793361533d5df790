//! # Providers
//!
//! Pluggable database and log providers, built lazily on first use and at
//! most once per request.
//!
//! Providers are registered by name on the context; configuration selects
//! one with `dbProvider` / `loggerProvider`.
//!
//! ## Design Principles (SOLID)
//!
//! - **O**: New backends are added by registering a factory
//! - **D**: The pipeline depends on the provider traits only

use crate::codes::CoreCode;
use crate::context::RequestContext;
use crate::error::Result;
use crate::json::to_json;
use crate::response::Reply;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the built-in tracing log provider
pub const TRACING_LOGGER: &str = "tracing";

/// Log sink for application messages
pub trait LogProvider: Send + Sync {
    /// Record an application message
    fn message(&self, message: &Value);

    /// Record an error
    fn error(&self, message: &str);
}

/// Database handle shared by controllers
pub trait DatabaseProvider: Send + Sync {
    /// Attach request meta before the handle is used
    fn meta(&self, meta: &Value);
}

/// Builds a log provider
pub type LoggerFactory = Arc<dyn Fn() -> Arc<dyn LogProvider> + Send + Sync>;

/// Builds a database provider from the `db` settings
///
/// An error means the provider could not connect.
pub type DatabaseFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn DatabaseProvider>> + Send + Sync>;

/// Log provider forwarding to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl LogProvider for TracingLogger {
    fn message(&self, message: &Value) {
        match message {
            Value::String(text) => info!(target: "spry::log", "{text}"),
            other => info!(target: "spry::log", message = %to_json(other).unwrap_or_default(), "Application message"),
        }
    }

    fn error(&self, message: &str) {
        error!(target: "spry::log", "{message}");
    }
}

/// Provider factories by name
#[derive(Clone)]
pub struct ProviderRegistry {
    loggers: HashMap<String, LoggerFactory>,
    databases: HashMap<String, DatabaseFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            loggers: HashMap::new(),
            databases: HashMap::new(),
        };
        registry.register_logger(TRACING_LOGGER, Arc::new(|| Arc::new(TracingLogger)));
        registry
    }
}

impl ProviderRegistry {
    /// Registry with the built-in providers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a log provider factory
    pub fn register_logger(&mut self, name: impl Into<String>, factory: LoggerFactory) {
        self.loggers.insert(name.into(), factory);
    }

    /// Register a database provider factory
    pub fn register_database(&mut self, name: impl Into<String>, factory: DatabaseFactory) {
        self.databases.insert(name.into(), factory);
    }

    /// Log provider factory by name
    #[must_use]
    pub fn logger(&self, name: &str) -> Option<&LoggerFactory> {
        self.loggers.get(name)
    }

    /// Database provider factory by name
    #[must_use]
    pub fn database(&self, name: &str) -> Option<&DatabaseFactory> {
        self.databases.get(name)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("loggers", &self.loggers.keys().collect::<Vec<_>>())
            .field("databases", &self.databases.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RequestContext {
    /// Register a log provider
    pub fn register_logger<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn LogProvider> + Send + Sync + 'static,
    {
        self.providers.register_logger(name, Arc::new(factory));
    }

    /// Register a database provider
    pub fn register_database<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn DatabaseProvider>> + Send + Sync + 'static,
    {
        self.providers.register_database(name, Arc::new(factory));
    }

    /// Database provider, with `meta` attached
    ///
    /// Built on first use from `dbProvider` and the `db` settings, after
    /// which the `database` hook runs.
    ///
    /// # Errors
    ///
    /// Halts with `DatabaseProviderMissing` when no registered provider is
    /// configured and with `DatabaseConnectError` when building fails.
    pub fn db(&self, meta: &Value) -> Result<Arc<dyn DatabaseProvider>> {
        if let Some(db) = self.db.get() {
            db.meta(meta);
            return Ok(Arc::clone(db));
        }

        let name = self.config.db_provider.trim();
        let Some(factory) = self.providers.database(name).filter(|_| !name.is_empty()) else {
            warn!(provider = name, "Database provider not registered");
            return Err(self.halt(CoreCode::DatabaseProviderMissing));
        };

        let provider = factory(&self.config.db).map_err(|err| {
            error!(provider = name, error = %err, "Database provider failed to connect");
            self.stop(Reply::new(CoreCode::DatabaseConnectError).messages([err.to_string()]))
        })?;
        let provider = Arc::clone(self.db.get_or_init(|| provider));

        self.run_hook("database", &Value::Null, &Value::Null)?;

        provider.meta(meta);
        Ok(provider)
    }

    /// Configured log provider
    ///
    /// `None` (with a warning) when no `loggerProvider` is configured.
    ///
    /// # Errors
    ///
    /// Halts with `LogProviderMissing` if the configured name is not registered.
    pub fn logger(&self) -> Result<Option<Arc<dyn LogProvider>>> {
        if let Some(logger) = self.logger.get() {
            return Ok(Some(Arc::clone(logger)));
        }

        let name = self.config.logger_provider.trim();
        if name.is_empty() {
            warn!("log() called, but missing loggerProvider");
            return Ok(None);
        }

        let Some(factory) = self.providers.logger(name) else {
            warn!(provider = name, "log() called, but the loggerProvider is not registered");
            return Err(self.halt(CoreCode::LogProviderMissing));
        };

        Ok(Some(Arc::clone(self.logger.get_or_init(|| factory()))))
    }

    /// Send a message to the log provider
    ///
    /// # Errors
    ///
    /// Halts with `LogProviderMissing` if the configured provider is unknown.
    pub fn log(&self, message: &Value) -> Result<()> {
        if let Some(logger) = self.logger()? {
            logger.message(message);
        }
        Ok(())
    }

    /// Send an error to the log provider, if one is configured
    pub(crate) fn log_error(&self, message: &str) {
        match self.logger() {
            Ok(Some(logger)) => logger.error(message),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Log provider unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryLog(Mutex<Vec<Value>>);

    impl LogProvider for MemoryLog {
        fn message(&self, message: &Value) {
            self.0.lock().unwrap().push(message.clone());
        }

        fn error(&self, message: &str) {
            self.0.lock().unwrap().push(json!({ "error": message }));
        }
    }

    #[derive(Default)]
    struct MemoryDb(Mutex<Value>);

    impl DatabaseProvider for MemoryDb {
        fn meta(&self, meta: &Value) {
            *self.0.lock().unwrap() = meta.clone();
        }
    }

    #[test]
    fn test_log_without_provider_is_noop() {
        let ctx = RequestContext::new();
        assert!(ctx.log(&json!("hello")).is_ok());
        assert!(ctx.logger().unwrap().is_none());
    }

    #[test]
    fn test_unknown_log_provider_halts() {
        let mut ctx = RequestContext::new();
        ctx.config.logger_provider = "missing".to_string();
        let err = ctx.log(&json!("hello")).unwrap_err();
        assert_eq!(err.envelope().unwrap()["code"], "0-540");
    }

    #[test]
    fn test_log_provider_built_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(MemoryLog::default());
        let mut ctx = RequestContext::new();
        let (counter, shared) = (Arc::clone(&built), Arc::clone(&sink));
        ctx.register_logger("memory", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::clone(&shared) as Arc<dyn LogProvider>
        });
        ctx.config.logger_provider = "memory".to_string();

        ctx.log(&json!("one")).unwrap();
        ctx.log(&json!({"two": 2})).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_tracing_logger_is_builtin() {
        let mut ctx = RequestContext::new();
        ctx.config.logger_provider = TRACING_LOGGER.to_string();
        assert!(ctx.logger().unwrap().is_some());
        assert!(ctx.log(&json!("via tracing")).is_ok());
    }

    #[test]
    fn test_db_missing_provider() {
        let ctx = RequestContext::new();
        let err = ctx.db(&Value::Null).err().unwrap();
        assert_eq!(err.envelope().unwrap()["code"], "0-533");
    }

    #[test]
    fn test_db_connect_error() {
        let mut ctx = RequestContext::new();
        ctx.register_database("broken", |_| {
            Err(Error::Database {
                message: "refused".to_string(),
            })
        });
        ctx.config.db_provider = "broken".to_string();
        let err = ctx.db(&Value::Null).err().unwrap();
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope["code"], "0-531");
        assert_eq!(envelope["messages"][1], "Database error: refused");
    }

    #[test]
    fn test_db_built_once_and_hook_runs_once() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let db = Arc::new(MemoryDb::default());
        let mut ctx = RequestContext::new();
        let shared = Arc::clone(&db);
        ctx.register_database("memory", move |settings| {
            assert_eq!(settings["name"], "app");
            Ok(Arc::clone(&shared) as Arc<dyn DatabaseProvider>)
        });
        let counter = Arc::clone(&hooks);
        ctx.add_hook_fn("database", 0, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        ctx.config.db_provider = "memory".to_string();
        ctx.config.db.insert("name".to_string(), json!("app"));

        ctx.db(&json!({"a": 1})).unwrap();
        ctx.db(&json!({"b": 2})).unwrap();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(*db.0.lock().unwrap(), json!({"b": 2}));
    }
}
