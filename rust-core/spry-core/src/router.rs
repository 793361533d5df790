//! # Router
//!
//! Path-keyed route registry with ordered placeholder fallback.
//!
//! ## Matching
//!
//! 1. Exact lookup of the normalized path
//! 2. First placeholder route (registration order) whose anchored pattern
//!    matches the path
//! 3. First placeholder route whose path, with placeholder segments removed,
//!    equals the request path
//!
//! A route without a controller never matches.

use crate::codes::CoreCode;
use crate::context::RequestContext;
use crate::error::Result;
use crate::json::is_blank;
use crate::response::Reply;
use crate::route::{compile_pattern, has_placeholders, normalize_path, placeholder_names, strip_placeholders, Route, RouteDef};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Entry {
    route: Route,
    pattern: Option<Regex>,
}

/// Routes keyed by normalized path, in registration order
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl RouteRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route at `path`
    ///
    /// Re-registering a path replaces the previous route in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the placeholder pattern fails
    /// to compile
    pub fn add_route(&mut self, path: &str, def: RouteDef) -> Result<()> {
        let route = def.into_route(path);
        let pattern = if has_placeholders(&route.path) {
            Some(compile_pattern(&route.path)?)
        } else {
            None
        };

        let entry = Entry { route, pattern };
        match self.index.get(&entry.route.path) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.index.insert(entry.route.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Find the route for a request path
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Route> {
        let path = normalize_path(path);

        if let Some(&slot) = self.index.get(&path) {
            let route = &self.entries[slot].route;
            if route.has_controller() {
                return Some(route);
            }
        }

        let placeholders = || {
            self.entries
                .iter()
                .filter(|e| e.pattern.is_some() && e.route.has_controller())
        };

        placeholders()
            .find(|e| e.pattern.as_ref().is_some_and(|p| p.is_match(&path)))
            .or_else(|| placeholders().find(|e| strip_placeholders(&e.route.path) == path))
            .map(|e| &e.route)
    }

    /// Values captured by a route's placeholders from a request path
    ///
    /// Unmatched placeholders are left out.
    #[must_use]
    pub fn captures(&self, route: &Route, path: &str) -> Map<String, Value> {
        let path = normalize_path(path);
        let mut values = Map::new();
        let Some(pattern) = self
            .index
            .get(&route.path)
            .and_then(|&slot| self.entries[slot].pattern.as_ref())
        else {
            return values;
        };
        let Some(caps) = pattern.captures(&path) else {
            return values;
        };

        for (i, name) in placeholder_names(&route.path).into_iter().enumerate() {
            if let Some(m) = caps.get(i + 1) {
                values.insert(name, Value::String(m.as_str().to_string()));
            }
        }
        values
    }

    /// Route registered at exactly `path`
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Route> {
        self.index
            .get(&normalize_path(path))
            .map(|&slot| &self.entries[slot].route)
    }

    /// All routes in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.entries.iter().map(|e| &e.route)
    }

    /// Routes marked public
    pub fn public_routes(&self) -> impl Iterator<Item = &Route> {
        self.iter().filter(|r| r.public)
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RequestContext {
    /// Register a route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for an uncompilable placeholder path
    pub fn add_route(&mut self, path: &str, def: impl Into<RouteDef>) -> Result<()> {
        self.routes.add_route(path, def.into())
    }

    /// Register every active route from configuration, then run the
    /// `setRoutes` hook
    ///
    /// # Errors
    ///
    /// Halts with `ConfigMalformed` if a route entry cannot be read
    pub fn set_routes(&mut self) -> Result<()> {
        let entries: Vec<(String, Value)> = self
            .config
            .routes
            .iter()
            .map(|(path, def)| (path.clone(), def.clone()))
            .collect();

        for (path, raw) in entries {
            if is_blank(&raw) {
                continue;
            }
            let def: RouteDef = match serde_json::from_value(raw) {
                Ok(def) => def,
                Err(err) => {
                    warn!(path = %path, error = %err, "Unreadable route definition");
                    return Err(self.stop(Reply::new(CoreCode::ConfigMalformed).messages([path])));
                }
            };
            if def.is_active() {
                self.add_route(&path, def)?;
            }
        }

        debug!(routes = self.routes.len(), "Routes registered");
        self.run_hook("setRoutes", &Value::Null, &Value::Null)
    }

    /// Public routes in registration order
    #[must_use]
    pub fn get_routes(&self) -> Vec<&Route> {
        self.routes.public_routes().collect()
    }

    /// Resolve the route for `path` (or the current request path)
    ///
    /// Returns the already matched route when called without a path after
    /// matching. The `getRoute` filter runs over the resolved route.
    ///
    /// # Errors
    ///
    /// Halts with `RouteNotFound` when nothing matches and with
    /// `MethodNotAllowed`, carrying the submitted form fields, when the
    /// request method is not accepted.
    pub fn get_route(&self, path: Option<&str>) -> Result<Route> {
        let path = match path {
            Some(path) => path.to_string(),
            None => {
                if let Some(route) = &self.route {
                    return Ok(route.clone());
                }
                self.path.clone()
            }
        };

        let Some(route) = self.routes.find(&path) else {
            return Err(self.stop(Reply::new(CoreCode::RouteNotFound).messages([normalize_path(&path)])));
        };

        let mut route = route.clone();
        route.methods = route.normalized_methods();

        if !route.allows(self.get_method()) {
            return Err(self.stop(
                Reply::new(CoreCode::MethodNotAllowed).data(Value::Object(self.input.form().clone())),
            ));
        }

        let filtered = self.run_filter("getRoute", route.to_value()?, &Value::Null)?;
        Route::from_value(filtered)
    }

    /// Placeholder values for the matched route against the current path
    #[must_use]
    pub fn route_captures(&self) -> Map<String, Value> {
        self.route
            .as_ref()
            .map(|route| self.routes.captures(route, &self.path))
            .unwrap_or_default()
    }
}
