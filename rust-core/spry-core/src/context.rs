//! # Request Context
//!
//! All state of one request: configuration, routes, hooks, controllers,
//! parameters and the matched route. Every pipeline stage is a method on
//! [`RequestContext`]; stages return [`Result`] and a halt propagates with
//! `?` to [`RequestContext::run`], which renders it.
//!
//! ## Lifecycle
//!
//! ```text
//! run -> configure -> path (setPath) -> setRoutes -> getRoute (setRoute)
//!     -> getController -> fetchParams (setParams) -> validateParams
//!     -> controller -> sendResponse -> sendOutput
//! ```
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Each stage lives in its own module; this one only sequences them
//! - **D**: Providers and components are reached through traits

use crate::codes::{CoreCode, ResponseCodeTable, Status};
use crate::component::Component;
use crate::config::{Config, RunArgs};
use crate::controller::ControllerRegistry;
use crate::error::{Error, Result};
use crate::hooks::HookRegistry;
use crate::providers::{DatabaseProvider, LogProvider, ProviderRegistry};
use crate::request::RequestInput;
use crate::response::{Output, Reply};
use crate::route::Route;
use crate::router::RouteRegistry;
use serde_json::{Map, Value};
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State of one request
pub struct RequestContext {
    pub(crate) config: Config,
    pub(crate) configured: bool,
    pub(crate) input: RequestInput,
    pub(crate) routes: RouteRegistry,
    pub(crate) route: Option<Route>,
    pub(crate) params: Map<String, Value>,
    pub(crate) meta: Map<String, Value>,
    pub(crate) path: String,
    pub(crate) hooks: HookRegistry,
    pub(crate) filters: HookRegistry,
    pub(crate) controllers: ControllerRegistry,
    pub(crate) components: Vec<Arc<dyn Component>>,
    pub(crate) providers: ProviderRegistry,
    pub(crate) db: OnceCell<Arc<dyn DatabaseProvider>>,
    pub(crate) logger: OnceCell<Arc<dyn LogProvider>>,
    pub(crate) auth: RefCell<Option<Value>>,
    pub(crate) request_id: String,
    pub(crate) started: Instant,
    pub(crate) cron: bool,
    pub(crate) background: bool,
    pub(crate) test: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            config: Config {
                response_codes: ResponseCodeTable::core(),
                ..Config::default()
            },
            configured: false,
            input: RequestInput::default(),
            routes: RouteRegistry::new(),
            route: None,
            params: Map::new(),
            meta: Map::new(),
            path: String::new(),
            hooks: HookRegistry::new(),
            filters: HookRegistry::new(),
            controllers: ControllerRegistry::new(),
            components: Vec::new(),
            providers: ProviderRegistry::new(),
            db: OnceCell::new(),
            logger: OnceCell::new(),
            auth: RefCell::new(None),
            request_id: Uuid::new_v4().simple().to_string(),
            started: Instant::now(),
            cron: false,
            background: false,
            test: false,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("path", &self.path)
            .field("route", &self.route.as_ref().map(|r| r.path.as_str()))
            .field("routes", &self.routes.len())
            .field("components", &self.components.len())
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Empty context with the core response codes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the request input
    #[must_use]
    pub fn with_input(mut self, input: RequestInput) -> Self {
        self.input = input;
        self
    }

    /// Request input
    #[must_use]
    pub const fn input(&self) -> &RequestInput {
        &self.input
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Meta passed to the run
    #[must_use]
    pub const fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Project root from configuration
    #[must_use]
    pub fn project_path(&self) -> Option<&Path> {
        self.config.project_path.as_deref()
    }

    /// Framework version
    #[must_use]
    pub const fn version(&self) -> &'static str {
        crate::VERSION
    }

    /// Id of this request
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the request came from the command line
    #[must_use]
    pub const fn is_cli(&self) -> bool {
        self.input.is_cli()
    }

    /// Whether the run is a cron task
    #[must_use]
    pub const fn is_cron(&self) -> bool {
        self.cron
    }

    /// Whether the run is a background process
    #[must_use]
    pub const fn is_background_process(&self) -> bool {
        self.background
    }

    /// Whether the request is a test run
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.test || self.input.is_test()
    }

    /// Request method; only `POST`, `GET`, `PUT` and `DELETE` are reported
    #[must_use]
    pub fn get_method(&self) -> Option<&'static str> {
        self.input.method()
    }

    /// Path being routed
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request path after the `getPath` filter
    ///
    /// # Errors
    ///
    /// Propagates halts raised by `getPath` filters.
    pub fn get_path(&self) -> Result<String> {
        let path = self.run_filter("getPath", Value::String(self.input.path()), &Value::Null)?;
        Ok(match path {
            Value::String(path) => path,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Store the auth value and run the `setAuth` hook
    ///
    /// # Errors
    ///
    /// Propagates halts raised by `setAuth` hooks.
    pub fn set_auth(&self, auth: Value) -> Result<()> {
        self.auth.replace(Some(auth.clone()));
        self.run_hook("setAuth", &auth, &Value::Null)
    }

    /// Stored auth value
    #[must_use]
    pub fn auth(&self) -> Option<Value> {
        self.auth.borrow().clone()
    }

    /// Install configuration and load components
    ///
    /// Runs the `initialized` hook, loads components, runs the `configure`
    /// filter over the configuration, then the `configure` hook. Returns
    /// `true` for a preflight request, which skips the `configure` hook and
    /// must be answered with headers only. A second call does nothing.
    ///
    /// # Errors
    ///
    /// Propagates halts from hooks, filters and component setup, and
    /// serialization errors from the `configure` filter.
    pub fn configure(&mut self, config: Config) -> Result<bool> {
        if self.configured {
            return Ok(false);
        }

        let mut config = config;
        let mut codes = ResponseCodeTable::core();
        codes.merge(&config.response_codes);
        config.response_codes = codes;

        self.config = config;
        self.configured = true;

        self.run_hook("initialized", &Value::Null, &Value::Null)?;
        self.load_components()?;

        if self.filters.has("configure") {
            let config = serde_json::to_value(&self.config)?;
            let config = self.run_filter("configure", config, &Value::Null)?;
            self.config = serde_json::from_value(config)?;
        }

        if self.input.is_options() {
            debug!("Preflight request");
            return Ok(true);
        }

        self.run_hook("configure", &Value::Null, &Value::Null)?;
        Ok(false)
    }

    /// Handle one request and render its output
    ///
    /// Never fails: halts become their envelope and other errors become the
    /// core error envelope.
    pub fn run(&mut self, args: RunArgs, input: RequestInput) -> Output {
        self.input = input;
        self.started = Instant::now();
        self.request_id = Uuid::new_v4().simple().to_string();

        let result = self.dispatch(args);
        self.finish(result)
    }

    fn dispatch(&mut self, mut args: RunArgs) -> Result<Option<Value>> {
        let config = match args.resolve_config() {
            Ok(config) => config,
            Err(failure) => return Err(self.config_failure(failure.code, &failure.detail)),
        };

        self.cron = args.cron;
        self.background = args.process.unwrap_or(false);
        self.test = self.input.is_test();
        self.meta = args.meta.take().unwrap_or_default();

        if self.configure(config)? {
            return Ok(None);
        }

        if self.config.salt.trim().is_empty() {
            return Err(self.config_failure(CoreCode::SaltMissing, "configuration has no salt"));
        }

        self.path = match args.path.take().filter(|path| !path.trim().is_empty()) {
            Some(path) => path,
            None => self.get_path()?,
        };
        info!(
            request_id = %self.request_id,
            path = %self.path,
            method = self.get_method().unwrap_or("-"),
            cron = self.cron,
            background = self.background,
            "Handling request"
        );
        self.run_hook("setPath", &Value::String(self.path.clone()), &Value::Null)?;

        self.set_routes()?;

        let controller = match args.controller.take().filter(|c| !c.is_empty()) {
            Some(reference) => self.get_controller(&reference)?,
            None => {
                let route = self.get_route(Some(self.path.as_str()))?;
                self.run_hook("setRoute", &route.to_value()?, &Value::Null)?;
                let reference = route
                    .controller
                    .clone()
                    .ok_or_else(|| self.halt(CoreCode::ControllerNotFound))?;
                self.route = Some(route);
                self.get_controller(&reference)?
            }
        };

        let params = self.fetch_params(args.params.take())?;
        self.set_params(params)?;

        let (params, meta) = if self.route.is_some() {
            let validated = self.validate_params()?;
            (validated.params, validated.meta)
        } else {
            (self.params.clone(), self.meta.clone())
        };

        let response = self.get_response(&controller, Value::Object(params), Value::Object(meta), Value::Null)?;
        self.send_response(response).map(Some)
    }

    fn config_failure(&self, code: CoreCode, detail: &str) -> Error {
        let envelope = self.build_response(Reply::new(code));
        let message = envelope.messages.first().map_or("", String::as_str);
        warn!(code = %envelope.code, detail, "Spry: {message}");
        self.halt(code)
    }

    fn finish(&self, result: Result<Option<Value>>) -> Output {
        let response = match result {
            Ok(response) => response,
            Err(Error::Halt(envelope)) => Some(*envelope),
            Err(err) => {
                error!(request_id = %self.request_id, error = %err, "Request failed");
                Some(self.error_envelope(&err))
            }
        };
        self.send_output(response)
    }

    fn error_envelope(&self, err: &Error) -> Value {
        let reply = Reply::new((0, 0, Status::Error)).messages([err.to_string()]);
        match self.response(reply.clone()) {
            Ok(envelope) => envelope,
            Err(Error::Halt(envelope)) => *envelope,
            Err(_) => serde_json::to_value(self.build_response(reply)).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::controller::{ClassDef, ControllerRef};
    use crate::schema::{ParamRule, ParamType, ParamsSchema, Required};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config(routes: Value) -> Config {
        Config::from_json(&json!({"salt": "pepper", "routes": routes}).to_string()).unwrap()
    }

    fn greet_context() -> RequestContext {
        let mut ctx = RequestContext::new();
        let mut greet = ClassDef::new("Greet");
        greet.method("hello", |_, args| {
            assert_eq!(args.meta(), &json!({}));
            Ok(json!({ "hello": args.params()["name"] }))
        });
        ctx.register_class(greet);
        ctx
    }

    fn greet_args() -> RunArgs {
        let mut rule = ParamRule::default();
        rule.required = Required::Yes;
        rule.param_type = Some(ParamType::String);
        let mut schema = ParamsSchema::new();
        schema.insert("name", rule);
        let route = Route::new("/greet/{name}/", "Greet::hello").methods(["GET", "POST"]).params(schema);

        let mut cfg = config(json!({}));
        cfg.routes
            .insert("/greet/{name}/".to_string(), route.to_value().unwrap());
        RunArgs::new(cfg)
    }

    #[test]
    fn test_end_to_end_success() {
        let mut ctx = greet_context();
        let output = ctx.run(greet_args(), RequestInput::new("GET", "/greet/alice/"));
        let body = output.json().unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["code"], "0-200");
        assert_eq!(body["body"], json!({"hello": "alice"}));
        assert_eq!(body["method"], "GET");
        assert_eq!(body["requestId"], ctx.request_id());
    }

    #[test]
    fn test_missing_required_param() {
        let mut ctx = greet_context();
        let output = ctx.run(greet_args(), RequestInput::new("GET", "/greet//"));
        let body = output.json().unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "0-420");
    }

    #[test]
    fn test_method_not_allowed_skips_controller() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let mut ctx = RequestContext::new();
        let mut only_get = ClassDef::new("Only");
        only_get.method("get", move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Ok(json!(1))
        });
        ctx.register_class(only_get);

        let args = RunArgs::new(config(json!({"/only/": {"controller": "Only::get", "methods": ["GET"]}})));
        let body = ctx.run(args, RequestInput::new("POST", "/only/")).json().unwrap();
        assert_eq!(body["code"], "0-417");
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_method_not_allowed_returns_posted_form() {
        let mut ctx = RequestContext::new();
        let args = RunArgs::new(config(json!({"/only/": {"controller": "Only::get", "methods": ["GET"]}})));
        let input = RequestInput::new("POST", "/only/").with_form_body("name=bob");
        let body = ctx.run(args, input).json().unwrap();
        assert_eq!(body["code"], "0-417");
        assert_eq!(body["body"]["name"], "bob");
    }

    #[test]
    fn test_route_not_found() {
        let mut ctx = RequestContext::new();
        let body = ctx
            .run(RunArgs::new(config(json!({}))), RequestInput::new("POST", "/nowhere/"))
            .json()
            .unwrap();
        assert_eq!(body["code"], "0-411");
        assert_eq!(body["messages"][1], "/nowhere/");
    }

    #[test]
    fn test_missing_config() {
        let mut ctx = RequestContext::new();
        let body = ctx.run(RunArgs::default(), RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-501");
        assert_eq!(body["messages"][0], "Error: Missing Config File");
    }

    #[test]
    fn test_malformed_config_text() {
        let mut ctx = RequestContext::new();
        let args = RunArgs::new(ConfigSource::Text("{\"salt\":".to_string()));
        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-503");
    }

    #[test]
    fn test_missing_salt() {
        let mut ctx = RequestContext::new();
        let args = RunArgs::new(Config::default());
        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-502");
    }

    #[test]
    fn test_forced_controller_uses_explicit_params() {
        let mut ctx = RequestContext::new();
        let echo = ctx.callable(|ctx, args| {
            assert!(ctx.is_cron());
            Ok(json!({"params": args.params(), "meta": args.meta()}))
        });
        let mut meta = Map::new();
        meta.insert("source".to_string(), json!("job"));
        let args = RunArgs::new(config(json!({})))
            .controller(echo)
            .params(json!({"id": 3}))
            .meta(meta)
            .cron(true);

        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["body"]["params"], json!({"id": 3}));
        assert_eq!(body["body"]["meta"], json!({"source": "job"}));
        assert_eq!(ctx.path(), "::cli");
    }

    #[test]
    fn test_preflight_sends_headers_only() {
        let configure_hook = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&configure_hook);
        let mut ctx = RequestContext::new();
        ctx.add_hook_fn("configure", 0, move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let output = ctx.run(RunArgs::new(config(json!({}))), RequestInput::new("OPTIONS", "/any/"));
        assert!(output.body.is_empty());
        assert_eq!(output.headers.len(), 3);
        assert!(!configure_hook.load(Ordering::SeqCst));
    }

    #[test]
    fn test_preflight_runs_output_filter() {
        let mut ctx = RequestContext::new();
        ctx.add_filter_fn("output", 0, |_, args| {
            let mut output = args.into_params();
            if let Some(headers) = output["headers"].as_array_mut() {
                headers.push(json!("Access-Control-Max-Age: 600"));
            }
            Ok(output)
        });
        let output = ctx.run(RunArgs::new(config(json!({}))), RequestInput::new("OPTIONS", "/any/"));
        assert!(output.body.is_empty());
        assert_eq!(output.headers.len(), 4);
        assert!(output
            .header_pairs()
            .any(|(name, value)| name == "Access-Control-Max-Age" && value == "600"));
    }

    #[test]
    fn test_configure_filter_rewrites_config() {
        let mut ctx = RequestContext::new();
        ctx.add_filter_fn("configure", 0, |_, args| {
            let mut config = args.into_params();
            config["responseHeaders"] = json!(["X-Custom: 1"]);
            Ok(config)
        });
        let preflight = ctx.configure(config(json!({}))).unwrap();
        assert!(!preflight);
        assert_eq!(ctx.config().response_headers.as_deref(), Some(&["X-Custom: 1".to_string()][..]));
        assert!(ctx.config().response_codes.get(0, 11).is_some());
        assert!(!ctx.configure(Config::default()).unwrap());
    }

    #[test]
    fn test_controller_halt_becomes_output() {
        let mut ctx = RequestContext::new();
        let fail = ctx.callable(|ctx, _| Err(ctx.halt(CoreCode::ValidationFailed)));
        let args = RunArgs::new(config(json!({}))).controller(fail);
        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-420");
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn test_internal_error_becomes_error_envelope() {
        let mut ctx = RequestContext::new();
        let fail = ctx.callable(|_, _| {
            Err(Error::Database {
                message: "gone".to_string(),
            })
        });
        let args = RunArgs::new(config(json!({}))).controller(fail);
        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-500");
        assert_eq!(body["messages"][1], "Database error: gone");
    }

    #[test]
    fn test_lifecycle_hooks_fire_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ctx = RequestContext::new();
        for key in ["initialized", "configure", "setPath", "setRoutes", "setRoute", "setParams"] {
            let sink = Arc::clone(&seen);
            ctx.add_hook_fn(key, 0, move |_, _| {
                sink.lock().unwrap().push(key);
                Ok(Value::Null)
            });
        }
        let target = ctx.callable(|_, _| Ok(json!("ok")));
        let mut cfg = config(json!({}));
        cfg.routes.insert("/hooks/".to_string(), serde_json::to_value(&target).unwrap());

        let body = ctx.run(RunArgs::new(cfg), RequestInput::new("POST", "/hooks/")).json().unwrap();
        assert_eq!(body["body"], "ok");
        assert_eq!(
            *seen.lock().unwrap(),
            ["initialized", "configure", "setPath", "setRoutes", "setRoute", "setParams"]
        );
    }

    #[test]
    fn test_auth_slot() {
        let mut ctx = RequestContext::new();
        ctx.add_hook_fn("setAuth", 0, |_, args| {
            assert_eq!(args.params()["user"], 9);
            Ok(Value::Null)
        });
        assert!(ctx.auth().is_none());
        ctx.set_auth(json!({"user": 9})).unwrap();
        assert_eq!(ctx.auth(), Some(json!({"user": 9})));
    }

    #[test]
    fn test_flags() {
        let mut ctx = RequestContext::new();
        let probe = ctx.callable(|ctx, _| {
            Ok(json!({
                "test": ctx.is_test(),
                "background": ctx.is_background_process(),
                "cli": ctx.is_cli(),
            }))
        });
        let args = RunArgs::new(config(json!({}))).controller(probe).process(true);
        let input = RequestInput::new("POST", "/x/").with_header("SpryTest", "yes");
        let body = ctx.run(args, input).json().unwrap();
        assert_eq!(body["body"], json!({"test": true, "background": true, "cli": false}));
        assert_eq!(ctx.version(), crate::VERSION);
        assert_eq!(ctx.request_id().len(), 32);
    }

    #[test]
    fn test_unknown_forced_controller() {
        let mut ctx = RequestContext::new();
        let args = RunArgs::new(config(json!({}))).controller(ControllerRef::named("Ghost", "run"));
        let body = ctx.run(args, RequestInput::cli()).json().unwrap();
        assert_eq!(body["code"], "0-412");
    }
}
