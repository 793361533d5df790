//! # Hooks and Filters
//!
//! Named extension points invoked at fixed lifecycle stages.
//!
//! Hooks observe: every entry runs and its result is discarded. Filters
//! fold: each entry's result replaces the data handed to the next entry.
//! Entries run in ascending `order`; equal orders keep registration order.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Registry only stores entries; dispatch goes through controllers
//! - **O**: Any controller reference can be attached to any key

use crate::codes::CoreCode;
use crate::context::RequestContext;
use crate::controller::{Args, ControllerRef};
use crate::error::{Error, Result};
use crate::response::Reply;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Hook key fired when a request is stopped
pub const STOP_HOOK: &str = "stop";

/// One registered hook or filter
#[derive(Debug, Clone, PartialEq)]
pub struct HookEntry {
    /// Controller to dispatch to
    pub controller: ControllerRef,
    /// Extra data passed as the third argument
    pub extra: Value,
    /// Lower runs first
    pub order: i64,
}

/// One or more hook keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookKeys(Vec<String>);

impl From<&str> for HookKeys {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for HookKeys {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<&[&str]> for HookKeys {
    fn from(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| (*k).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HookKeys {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.iter().map(|k| (*k).to_string()).collect())
    }
}

impl From<Vec<String>> for HookKeys {
    fn from(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

/// Entries by key
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    entries: HashMap<String, Vec<HookEntry>>,
}

impl HookRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller under one or more keys
    pub fn add(&mut self, keys: impl Into<HookKeys>, controller: ControllerRef, extra: Value, order: i64) {
        for key in keys.into().0 {
            self.entries.entry(key).or_default().push(HookEntry {
                controller: controller.clone(),
                extra: extra.clone(),
                order,
            });
        }
    }

    /// Entries for a key, sorted by ascending order (stable)
    #[must_use]
    pub fn sorted(&self, key: &str) -> Vec<HookEntry> {
        let mut entries = self.entries.get(key).cloned().unwrap_or_default();
        entries.sort_by_key(|entry| entry.order);
        entries
    }

    /// Whether any entry is registered for a key
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|entries| !entries.is_empty())
    }

    /// Number of entries for a key
    #[must_use]
    pub fn len(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, Vec::len)
    }
}

impl RequestContext {
    /// Register a hook under one or more keys
    pub fn add_hook(&mut self, keys: impl Into<HookKeys>, controller: ControllerRef, extra: Value, order: i64) {
        self.hooks.add(keys, controller, extra, order);
    }

    /// Register a filter under one or more keys
    pub fn add_filter(&mut self, keys: impl Into<HookKeys>, controller: ControllerRef, extra: Value, order: i64) {
        self.filters.add(keys, controller, extra, order);
    }

    /// Register a closure as a hook
    pub fn add_hook_fn<F>(&mut self, keys: impl Into<HookKeys>, order: i64, handler: F) -> ControllerRef
    where
        F: Fn(&RequestContext, Args) -> Result<Value> + Send + Sync + 'static,
    {
        let controller = self.callable(handler);
        self.add_hook(keys, controller.clone(), Value::Null, order);
        controller
    }

    /// Register a closure as a filter
    pub fn add_filter_fn<F>(&mut self, keys: impl Into<HookKeys>, order: i64, handler: F) -> ControllerRef
    where
        F: Fn(&RequestContext, Args) -> Result<Value> + Send + Sync + 'static,
    {
        let controller = self.callable(handler);
        self.add_filter(keys, controller.clone(), Value::Null, order);
        controller
    }

    /// Run every hook registered under `key`
    ///
    /// A `stop` hook whose controller does not resolve, or resolves to a
    /// private method, ends the request with `ControllerNotFound` directly,
    /// without firing `stop` again.
    ///
    /// # Errors
    ///
    /// Propagates halts raised by hook controllers or by resolution failures.
    pub fn run_hook(&self, key: &str, data: &Value, meta: &Value) -> Result<()> {
        for entry in self.hooks.sorted(key) {
            if entry.controller.is_empty() {
                continue;
            }
            if key == STOP_HOOK && !self.controller_callable(&entry.controller) {
                let envelope = self.response(
                    Reply::new(CoreCode::ControllerNotFound).messages([entry.controller.to_string()]),
                )?;
                return Err(Error::halt(envelope));
            }
            debug!(hook = key, controller = %entry.controller, "Running hook");
            let controller = self.get_controller(&entry.controller)?;
            self.get_response(&controller, data.clone(), meta.clone(), entry.extra.clone())?;
        }
        Ok(())
    }

    /// Fold `data` through every filter registered under `key`
    ///
    /// Returns `data` unchanged when nothing is registered.
    ///
    /// # Errors
    ///
    /// Propagates halts raised by filter controllers or by resolution failures.
    pub fn run_filter(&self, key: &str, data: Value, meta: &Value) -> Result<Value> {
        let mut data = data;
        for entry in self.filters.sorted(key) {
            if entry.controller.is_empty() {
                continue;
            }
            debug!(filter = key, controller = %entry.controller, "Running filter");
            let controller = self.get_controller(&entry.controller)?;
            data = self.get_response(&controller, data, meta.clone(), entry.extra.clone())?;
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ClassDef;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_registry_sorts_ascending_and_stable() {
        let mut registry = HookRegistry::new();
        registry.add("k", ControllerRef::parse("A::two"), Value::Null, 2);
        registry.add("k", ControllerRef::parse("A::zero"), Value::Null, 0);
        registry.add("k", ControllerRef::parse("A::zero_b"), Value::Null, 0);
        let order: Vec<String> = registry.sorted("k").iter().map(|e| e.controller.to_string()).collect();
        assert_eq!(order, ["A::zero", "A::zero_b", "A::two"]);
    }

    #[test]
    fn test_add_under_many_keys() {
        let mut registry = HookRegistry::new();
        registry.add(["a", "b"], ControllerRef::parse("X::y"), json!(1), 0);
        assert_eq!(registry.len("a"), 1);
        assert_eq!(registry.len("b"), 1);
        assert!(!registry.has("c"));
    }

    #[test]
    fn test_filter_fold_order() {
        let mut ctx = RequestContext::new();
        ctx.add_filter_fn("params", 2, |_, args| Ok(json!(args.params().as_i64().unwrap_or(0) + 10)));
        ctx.add_filter_fn("params", 0, |_, args| Ok(json!(args.params().as_i64().unwrap_or(0) + 1)));
        ctx.add_filter_fn("params", 1, |_, args| Ok(json!(args.params().as_i64().unwrap_or(0) * 2)));

        let result = ctx.run_filter("params", json!(1), &Value::Null).unwrap();
        assert_eq!(result, json!(14));
    }

    #[test]
    fn test_filter_identity_without_entries() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.run_filter("none", json!({"a": 1}), &Value::Null).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_hook_receives_extra_and_discards_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut ctx = RequestContext::new();
        let controller = ctx.callable(move |_, args| {
            sink.lock().unwrap().push((args.params().clone(), args.extra().clone()));
            Ok(json!("ignored"))
        });
        ctx.add_hook("setRoutes", controller, json!({"tag": 7}), 0);

        ctx.run_hook("setRoutes", &json!("data"), &Value::Null).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (json!("data"), json!({"tag": 7})));
    }

    #[test]
    fn test_missing_hook_controller_halts() {
        let mut ctx = RequestContext::new();
        ctx.add_hook("configure", ControllerRef::parse("Nope::run"), Value::Null, 0);
        let err = ctx.run_hook("configure", &Value::Null, &Value::Null).unwrap_err();
        assert_eq!(err.envelope().unwrap()["code"], "0-412");
    }

    #[test]
    fn test_missing_stop_hook_controller() {
        let mut ctx = RequestContext::new();
        ctx.add_hook(STOP_HOOK, ControllerRef::parse("Nope::run"), Value::Null, 0);
        let err = ctx.run_hook(STOP_HOOK, &Value::Null, &Value::Null).unwrap_err();
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope["code"], "0-416");
        assert_eq!(envelope["messages"][1], "Nope::run");
    }

    #[test]
    fn test_private_stop_hook_controller_does_not_recurse() {
        let mut ctx = RequestContext::new();
        let mut class = ClassDef::new("Guard");
        class.private_method("quiet", |_, _| Ok(Value::Null));
        ctx.register_class(class);
        ctx.add_hook(STOP_HOOK, ControllerRef::parse("Guard::quiet"), Value::Null, 0);
        assert!(ctx.controller_exists(&ControllerRef::parse("Guard::quiet")));
        assert!(!ctx.controller_callable(&ControllerRef::parse("Guard::quiet")));

        let envelope = ctx.halt(CoreCode::RouteNotFound).envelope().cloned().unwrap();
        assert_eq!(envelope["code"], "0-416");
        assert_eq!(envelope["messages"][1], "Guard::quiet");
    }
}
