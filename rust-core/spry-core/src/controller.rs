//! # Controllers
//!
//! A controller is either a named class method (`"Class::method"`) looked up
//! in the [`ControllerRegistry`], or a callable registered up front and
//! referenced by id. Both shapes serialize, so routes and hooks can pass
//! through JSON filters unchanged.

use crate::codes::CoreCode;
use crate::context::RequestContext;
use crate::error::Result;
use crate::response::Reply;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Controller function signature
pub type ControllerFn = dyn Fn(&RequestContext, Args) -> Result<Value> + Send + Sync;

/// Shared controller handle
pub type Controller = Arc<ControllerFn>;

static NULL: Value = Value::Null;

/// Id of a callable registered in a [`ControllerRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallableId(pub usize);

/// Reference to a controller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControllerRef {
    /// `Class::method`
    Named {
        /// Class name, without namespace
        class: String,
        /// Method name
        method: String,
    },
    /// Registered callable
    Callable(CallableId),
}

impl ControllerRef {
    /// Reference a class method
    pub fn named(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Named {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Parse `"Class::method"`; a missing method part stays empty
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        match reference.split_once("::") {
            Some((class, method)) => Self::named(class, method),
            None => Self::named(reference, ""),
        }
    }

    /// Whether the reference names nothing at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Named { class, method } => class.is_empty() && method.is_empty(),
            Self::Callable(_) => false,
        }
    }
}

impl fmt::Display for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { class, method } => write!(f, "{class}::{method}"),
            Self::Callable(CallableId(id)) => write!(f, "{{callable#{id}}}"),
        }
    }
}

impl From<&str> for ControllerRef {
    fn from(reference: &str) -> Self {
        Self::parse(reference)
    }
}

impl From<CallableId> for ControllerRef {
    fn from(id: CallableId) -> Self {
        Self::Callable(id)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CallableRepr {
    callable: CallableId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ControllerRepr {
    Text(String),
    Pair(Vec<String>),
    Callable(CallableRepr),
}

impl Serialize for ControllerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Named { .. } => serializer.collect_str(self),
            Self::Callable(id) => CallableRepr { callable: *id }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ControllerRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match ControllerRepr::deserialize(deserializer)? {
            ControllerRepr::Text(text) => Self::parse(&text),
            ControllerRepr::Pair(parts) => {
                let mut parts = parts.into_iter();
                let class = parts.next().unwrap_or_default();
                let method = parts.next().unwrap_or_default();
                Self::named(class, method)
            }
            ControllerRepr::Callable(repr) => Self::Callable(repr.callable),
        })
    }
}

/// Arguments passed to a controller
///
/// Holds the most specific non-null tuple: trailing null arguments are
/// dropped, so a controller called with only `params` sees an arity of 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    params: Option<Value>,
    meta: Option<Value>,
    extra: Option<Value>,
}

impl Args {
    /// Build from `(params, meta, extra)`, dropping trailing nulls
    #[must_use]
    pub fn new(params: Value, meta: Value, extra: Value) -> Self {
        if !extra.is_null() {
            Self {
                params: Some(params),
                meta: Some(meta),
                extra: Some(extra),
            }
        } else if !meta.is_null() {
            Self {
                params: Some(params),
                meta: Some(meta),
                extra: None,
            }
        } else if !params.is_null() {
            Self {
                params: Some(params),
                meta: None,
                extra: None,
            }
        } else {
            Self::default()
        }
    }

    /// Only `params`
    #[must_use]
    pub fn params_only(params: Value) -> Self {
        Self::new(params, Value::Null, Value::Null)
    }

    /// Number of arguments supplied
    #[must_use]
    pub fn arity(&self) -> usize {
        [&self.params, &self.meta, &self.extra]
            .iter()
            .filter(|arg| arg.is_some())
            .count()
    }

    /// Params (or filter data); null when absent
    #[must_use]
    pub fn params(&self) -> &Value {
        self.params.as_ref().unwrap_or(&NULL)
    }

    /// Meta; null when absent
    #[must_use]
    pub fn meta(&self) -> &Value {
        self.meta.as_ref().unwrap_or(&NULL)
    }

    /// Extra data attached at hook registration; null when absent
    #[must_use]
    pub fn extra(&self) -> &Value {
        self.extra.as_ref().unwrap_or(&NULL)
    }

    /// Take ownership of params
    #[must_use]
    pub fn into_params(self) -> Value {
        self.params.unwrap_or(Value::Null)
    }
}

/// Whether a method may be dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Callable from routes, hooks and filters
    #[default]
    Public,
    /// Registered but not callable
    Private,
}

#[derive(Clone)]
struct MethodDef {
    handler: Controller,
    visibility: Visibility,
}

/// A named set of controller methods
#[derive(Clone)]
pub struct ClassDef {
    name: String,
    methods: HashMap<String, MethodDef>,
}

impl ClassDef {
    /// Create an empty class
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Class name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a public method
    pub fn method<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&RequestContext, Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(handler), Visibility::Public)
    }

    /// Add a method that exists but refuses dispatch
    pub fn private_method<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&RequestContext, Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(handler), Visibility::Private)
    }

    fn insert(&mut self, name: String, handler: Controller, visibility: Visibility) -> &mut Self {
        self.methods.insert(
            name,
            MethodDef {
                handler,
                visibility,
            },
        );
        self
    }

    /// Whether the class has a method
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the class has no methods
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A resolved controller ready to invoke
#[derive(Clone)]
pub struct ControllerHandle {
    /// Label of the resolved target (`Class::method` or callable id)
    pub target: String,
    handler: Controller,
    visibility: Visibility,
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("target", &self.target)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// Why a reference failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Empty or dangling reference
    ControllerNotFound(String),
    /// No class with that name in any namespace
    ClassNotFound(String),
    /// Class found, method missing
    MethodNotFound(String),
}

impl ResolveError {
    /// Framework code for this failure
    #[must_use]
    pub const fn code(&self) -> CoreCode {
        match self {
            Self::ControllerNotFound(_) => CoreCode::ControllerNotFound,
            Self::ClassNotFound(_) => CoreCode::ClassNotFound,
            Self::MethodNotFound(_) => CoreCode::MethodNotFound,
        }
    }

    /// The offending name
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::ControllerNotFound(s) | Self::ClassNotFound(s) | Self::MethodNotFound(s) => s,
        }
    }
}

/// Classes (bare and component namespace) plus registered callables
#[derive(Default, Clone)]
pub struct ControllerRegistry {
    classes: HashMap<String, ClassDef>,
    components: HashMap<String, ClassDef>,
    callables: Vec<Controller>,
}

impl ControllerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application class under its bare name
    pub fn register_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Register a class in the component namespace
    pub fn register_component_class(&mut self, class: ClassDef) {
        self.components.insert(class.name.clone(), class);
    }

    /// Register a callable and return its reference
    pub fn register_callable(&mut self, handler: Controller) -> ControllerRef {
        self.callables.push(handler);
        ControllerRef::Callable(CallableId(self.callables.len() - 1))
    }

    /// Resolve a reference
    ///
    /// Bare class names are tried before the component namespace. A class
    /// found in the first namespace without the method fails immediately.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] describing the missing piece.
    pub fn resolve(&self, reference: &ControllerRef) -> std::result::Result<ControllerHandle, ResolveError> {
        match reference {
            ControllerRef::Callable(CallableId(id)) => self
                .callables
                .get(*id)
                .map(|handler| ControllerHandle {
                    target: reference.to_string(),
                    handler: Arc::clone(handler),
                    visibility: Visibility::Public,
                })
                .ok_or_else(|| ResolveError::ControllerNotFound(reference.to_string())),
            ControllerRef::Named { class, method } => {
                if reference.is_empty() {
                    return Err(ResolveError::ControllerNotFound(String::new()));
                }
                for namespace in [&self.classes, &self.components] {
                    if let Some(def) = namespace.get(class) {
                        return def
                            .methods
                            .get(method)
                            .map(|m| ControllerHandle {
                                target: reference.to_string(),
                                handler: Arc::clone(&m.handler),
                                visibility: m.visibility,
                            })
                            .ok_or_else(|| ResolveError::MethodNotFound(reference.to_string()));
                    }
                }
                Err(ResolveError::ClassNotFound(class.clone()))
            }
        }
    }

    /// Whether a reference resolves
    #[must_use]
    pub fn exists(&self, reference: &ControllerRef) -> bool {
        self.resolve(reference).is_ok()
    }

    /// Whether a reference resolves to a public controller
    #[must_use]
    pub fn is_callable(&self, reference: &ControllerRef) -> bool {
        self.resolve(reference)
            .is_ok_and(|handle| handle.visibility == Visibility::Public)
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("callables", &self.callables.len())
            .finish()
    }
}

impl RequestContext {
    /// Register an application class
    pub fn register_class(&mut self, class: ClassDef) {
        self.controllers.register_class(class);
    }

    /// Register a callable controller and return its reference
    pub fn callable<F>(&mut self, handler: F) -> ControllerRef
    where
        F: Fn(&RequestContext, Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.controllers.register_callable(Arc::new(handler))
    }

    /// Whether a controller reference resolves
    #[must_use]
    pub fn controller_exists(&self, reference: &ControllerRef) -> bool {
        self.controllers.exists(reference)
    }

    /// Whether a controller reference resolves and may be invoked
    #[must_use]
    pub fn controller_callable(&self, reference: &ControllerRef) -> bool {
        self.controllers.is_callable(reference)
    }

    /// Resolve a controller reference, stopping the request on failure
    ///
    /// # Errors
    ///
    /// Halts with `ControllerNotFound`, `ClassNotFound` or `MethodNotFound`.
    pub fn get_controller(&self, reference: &ControllerRef) -> Result<ControllerHandle> {
        self.controllers.resolve(reference).map_err(|err| {
            self.stop(Reply::new(err.code()).messages([err.subject().to_string()]))
        })
    }

    /// Invoke a resolved controller with the most specific argument tuple
    ///
    /// # Errors
    ///
    /// Halts with `MethodNotCallable` for private methods; otherwise returns
    /// whatever the controller returns.
    pub fn get_response(
        &self,
        controller: &ControllerHandle,
        params: Value,
        meta: Value,
        extra: Value,
    ) -> Result<Value> {
        if controller.visibility == Visibility::Private {
            return Err(self.stop(
                Reply::new(CoreCode::MethodNotCallable).data(Value::String(controller.target.clone())),
            ));
        }

        (controller.handler)(self, Args::new(params, meta, extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ControllerRegistry {
        let mut registry = ControllerRegistry::new();
        let mut users = ClassDef::new("Users");
        users.method("get", |_, args| Ok(args.into_params()));
        registry.register_class(users);

        let mut notes = ClassDef::new("Notes");
        notes.method("list", |_, _| Ok(json!([])));
        notes.private_method("secret", |_, _| Ok(Value::Null));
        registry.register_component_class(notes);
        registry
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(ControllerRef::parse("Users::get"), ControllerRef::named("Users", "get"));
        assert_eq!(ControllerRef::parse("Users"), ControllerRef::named("Users", ""));
        assert!(ControllerRef::parse("").is_empty());
    }

    #[test]
    fn test_reference_serde() {
        let named: ControllerRef = serde_json::from_value(json!("Users::get")).unwrap();
        assert_eq!(named, ControllerRef::named("Users", "get"));

        let pair: ControllerRef = serde_json::from_value(json!(["Users", "get"])).unwrap();
        assert_eq!(pair, named);

        let callable = ControllerRef::Callable(CallableId(3));
        let value = serde_json::to_value(&callable).unwrap();
        assert_eq!(value, json!({"callable": 3}));
        assert_eq!(serde_json::from_value::<ControllerRef>(value).unwrap(), callable);

        assert_eq!(serde_json::to_value(&named).unwrap(), json!("Users::get"));
    }

    #[test]
    fn test_resolve_bare_then_component() {
        let registry = registry();
        assert!(registry.resolve(&"Users::get".into()).is_ok());
        assert!(registry.resolve(&"Notes::list".into()).is_ok());
        assert!(registry.exists(&"Notes::secret".into()));
    }

    #[test]
    fn test_resolve_errors() {
        let registry = registry();
        assert_eq!(
            registry.resolve(&"Missing::get".into()).unwrap_err(),
            ResolveError::ClassNotFound("Missing".to_string())
        );
        let err = registry.resolve(&"Users::delete".into()).unwrap_err();
        assert_eq!(err.code(), CoreCode::MethodNotFound);
        let err = registry.resolve(&ControllerRef::parse("")).unwrap_err();
        assert_eq!(err.code(), CoreCode::ControllerNotFound);
        let err = registry.resolve(&ControllerRef::Callable(CallableId(9))).unwrap_err();
        assert_eq!(err.code(), CoreCode::ControllerNotFound);
    }

    #[test]
    fn test_args_arity() {
        assert_eq!(Args::new(Value::Null, Value::Null, Value::Null).arity(), 0);
        assert_eq!(Args::params_only(json!({"a": 1})).arity(), 1);
        assert_eq!(Args::new(json!(1), json!({}), Value::Null).arity(), 2);

        let args = Args::new(Value::Null, Value::Null, json!("x"));
        assert_eq!(args.arity(), 3);
        assert_eq!(args.params(), &Value::Null);
        assert_eq!(args.extra(), &json!("x"));
    }

    #[test]
    fn test_callable_registration() {
        let mut registry = ControllerRegistry::new();
        let first = registry.register_callable(Arc::new(|_, _| Ok(json!(1))));
        let second = registry.register_callable(Arc::new(|_, _| Ok(json!(2))));
        assert_eq!(first, ControllerRef::Callable(CallableId(0)));
        assert_eq!(second, ControllerRef::Callable(CallableId(1)));
        assert!(registry.exists(&second));
    }
}
