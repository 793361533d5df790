//! # Route Metadata
//!
//! Single-responsibility module for route definitions and path handling.
//!
//! ## Design Principles
//!
//! - **S**: `Route` only holds route metadata
//! - **O**: Unknown route keys are ignored, so configs can carry extras
//! - **D**: Decoupled from `RouteRegistry` matching details

use crate::controller::ControllerRef;
use crate::error::{Error, Result};
use crate::schema::ParamsSchema;
use regex::Regex;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// HTTP methods a route may accept
pub const METHODS: [&str; 4] = ["POST", "GET", "PUT", "DELETE"];

/// Normalize a path to the canonical `/segment/segment/` form
///
/// Surrounding whitespace and slashes are trimmed, then exactly one slash
/// is put back at each end. An empty path becomes `//`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B' | '/'));
    format!("/{trimmed}/")
}

/// Whether a path contains `{name}` placeholders
#[must_use]
pub fn has_placeholders(path: &str) -> bool {
    path.find('{').is_some_and(|open| path[open..].contains('}'))
}

/// Placeholder names in order of appearance
#[must_use]
pub fn placeholder_names(path: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        names.push(after[..close].to_string());
        rest = &after[close + 1..];
    }
    names
}

/// Compile a placeholder path into an anchored pattern
///
/// Each `{name}` becomes a `(.*)` capture; everything else matches literally.
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` if the pattern fails to compile
pub fn compile_pattern(path: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        pattern.push_str(&regex::escape(&rest[..open]));
        pattern.push_str("(.*)");
        rest = &after[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| Error::InvalidRoutePattern {
        pattern: path.to_string(),
        reason: e.to_string(),
    })
}

/// Remove placeholder segments (`{name}` plus a following slash)
#[must_use]
pub fn strip_placeholders(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &after[close + 1..];
        rest = rest.strip_prefix('/').unwrap_or(rest);
    }
    out.push_str(rest);
    out
}

/// Label derived from a path: non-word characters become spaces and each
/// word is capitalized
#[must_use]
pub fn synthesize_label(path: &str) -> String {
    let spaced: String = path
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut label = String::with_capacity(spaced.len());
    let mut boundary = true;
    for c in spaced.chars() {
        if boundary {
            label.extend(c.to_uppercase());
        } else {
            label.push(c);
        }
        boundary = c.is_whitespace();
    }
    label
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    struct MethodsVisitor;

    impl<'de> Visitor<'de> for MethodsVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a method name or a list of method names")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
            let mut methods = Vec::new();
            while let Some(method) = seq.next_element::<String>()? {
                methods.push(method);
            }
            Ok(methods)
        }
    }

    deserializer.deserialize_any(MethodsVisitor)
}

/// A route definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    /// Normalized path, possibly with `{name}` placeholders
    pub path: String,
    /// Controller to dispatch to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerRef>,
    /// Accepted methods; empty means `POST`
    #[serde(deserialize_with = "one_or_many")]
    pub methods: Vec<String>,
    /// Inactive routes are skipped at registration
    pub active: bool,
    /// Listed by `get_routes`
    pub public: bool,
    /// Human-readable label
    pub label: String,
    /// Parameter rules
    pub params: ParamsSchema,
    /// Default `trim` for every field that does not set it
    pub params_trim: bool,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            path: String::new(),
            controller: None,
            methods: Vec::new(),
            active: true,
            public: true,
            label: String::new(),
            params: ParamsSchema::new(),
            params_trim: false,
        }
    }
}

impl Route {
    /// Create a route for a controller
    pub fn new(path: &str, controller: impl Into<ControllerRef>) -> Self {
        Self {
            path: normalize_path(path),
            controller: Some(controller.into()),
            ..Self::default()
        }
    }

    /// Set accepted methods
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Set parameter rules
    #[must_use]
    pub fn params(mut self, params: ParamsSchema) -> Self {
        self.params = params;
        self
    }

    /// Whether a non-empty controller is set
    #[must_use]
    pub fn has_controller(&self) -> bool {
        self.controller.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Trimmed, upper-cased methods; `POST` when none are given
    #[must_use]
    pub fn normalized_methods(&self) -> Vec<String> {
        let methods: Vec<String> = self
            .methods
            .iter()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        if methods.is_empty() {
            vec!["POST".to_string()]
        } else {
            methods
        }
    }

    /// Whether the route accepts a request method
    #[must_use]
    pub fn allows(&self, method: Option<&str>) -> bool {
        method.is_some_and(|m| self.normalized_methods().iter().any(|allowed| allowed == m))
    }

    /// Route as JSON, for filters
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Route read back from filter output
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the value is not a route
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A route entry as written in configuration
///
/// Either a bare controller reference or a full rule object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteDef {
    /// `"/path/": "Class::method"`
    Controller(ControllerRef),
    /// `"/path/": { "controller": ..., "methods": ..., ... }`
    Rule(Box<Route>),
}

impl RouteDef {
    /// Whether the entry should be registered
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Controller(controller) => !controller.is_empty(),
            Self::Rule(route) => route.active,
        }
    }

    /// Expand into a full route at `path`
    ///
    /// Bare references get a label synthesized from the path.
    #[must_use]
    pub fn into_route(self, path: &str) -> Route {
        match self {
            Self::Controller(controller) => {
                let path = normalize_path(path);
                Route {
                    label: synthesize_label(&path),
                    path,
                    controller: Some(controller),
                    ..Route::default()
                }
            }
            Self::Rule(route) => Route {
                path: normalize_path(path),
                ..*route
            },
        }
    }
}

impl From<Route> for RouteDef {
    fn from(route: Route) -> Self {
        Self::Rule(Box::new(route))
    }
}

impl From<ControllerRef> for RouteDef {
    fn from(controller: ControllerRef) -> Self {
        Self::Controller(controller)
    }
}

impl From<&str> for RouteDef {
    fn from(controller: &str) -> Self {
        Self::Controller(ControllerRef::parse(controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("users"), "/users/");
        assert_eq!(normalize_path("  /users/list//  "), "/users/list/");
        assert_eq!(normalize_path("/"), "//");
        assert_eq!(normalize_path(&normalize_path("/a/b")), "/a/b/");
    }

    #[test]
    fn test_placeholders() {
        assert!(has_placeholders("/user/{id}/"));
        assert!(!has_placeholders("/user/"));
        assert_eq!(placeholder_names("/u/{a}/p/{b}/"), ["a", "b"]);
        assert_eq!(strip_placeholders("/user/{id}/"), "/user/");
        assert_eq!(strip_placeholders("/u/{a}/p/{b}/"), "/u/p/");
    }

    #[test]
    fn test_compile_pattern_is_anchored() {
        let pattern = compile_pattern("/user/{id}/").unwrap();
        assert!(pattern.is_match("/user/42/"));
        assert!(!pattern.is_match("/api/user/42/"));
        assert!(!pattern.is_match("/user/42/extra"));

        let dotted = compile_pattern("/file.{ext}/").unwrap();
        assert!(dotted.is_match("/file.json/"));
        assert!(!dotted.is_match("/fileXjson/"));
    }

    #[test]
    fn test_synthesize_label() {
        assert_eq!(synthesize_label("/user_list/"), " User List ");
        assert_eq!(synthesize_label("/greet/{name}/"), " Greet  Name  ");
    }

    #[test]
    fn test_methods_normalized() {
        let route = Route::new("/a/", "A::b").methods([" get ", "put"]);
        assert_eq!(route.normalized_methods(), ["GET", "PUT"]);
        assert!(route.allows(Some("GET")));
        assert!(!route.allows(Some("POST")));

        let default = Route::new("/a/", "A::b");
        assert!(default.allows(Some("POST")));
        assert!(!default.allows(None));
    }

    #[test]
    fn test_route_def_forms() {
        let bare: RouteDef = serde_json::from_value(json!("Users::list")).unwrap();
        let route = bare.into_route("users/list");
        assert_eq!(route.path, "/users/list/");
        assert_eq!(route.label, " Users List ");
        assert_eq!(route.controller, Some(ControllerRef::named("Users", "list")));

        let rule: RouteDef = serde_json::from_value(json!({
            "controller": "Users::get",
            "methods": "GET",
            "active": false,
            "params": {"id": {"required": true}}
        }))
        .unwrap();
        assert!(!rule.is_active());
        let route = rule.into_route("/users/{id}");
        assert_eq!(route.path, "/users/{id}/");
        assert_eq!(route.methods, ["GET"]);
        assert_eq!(route.params.len(), 1);
        assert!(route.label.is_empty());
    }

    #[test]
    fn test_route_value_roundtrip_keeps_callable() {
        let route = Route::new("/x/", ControllerRef::Callable(crate::controller::CallableId(2)));
        let back = Route::from_value(route.to_value().unwrap()).unwrap();
        assert_eq!(back, route);
    }
}
