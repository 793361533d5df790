//! # Components
//!
//! Modules that contribute response codes, setup, database schema, routes,
//! tests and controller classes. Components are registered explicitly and
//! loaded once during [`RequestContext::configure`].
//!
//! ## Load Order
//!
//! 1. Response codes of every component
//! 2. `setup` of every component
//! 3. Schema of every component (into `db.schema.tables`)
//! 4. Routes and tests of every component
//!
//! Code collisions are reported and the later registration wins.

use crate::codes::{CodeConflict, CodeGroup};
use crate::context::RequestContext;
use crate::controller::ClassDef;
use crate::error::Result;
use crate::route::RouteDef;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A pluggable module
///
/// Every method except [`Component::name`] has an empty default.
pub trait Component: Send + Sync {
    /// Class name; component controllers resolve under it
    fn name(&self) -> &str;

    /// Response code group claimed by this component
    fn id(&self) -> Option<i64> {
        None
    }

    /// Response codes for the component's group
    fn codes(&self) -> CodeGroup {
        CodeGroup::new()
    }

    /// One-time setup with access to the context
    ///
    /// # Errors
    ///
    /// A halt here ends the request.
    fn setup(&self, _ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    /// Table definitions merged into `db.schema.tables`
    fn schema(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Routes to register, keyed by path template
    fn routes(&self) -> Vec<(String, RouteDef)> {
        Vec::new()
    }

    /// Test declarations merged into `tests`
    fn tests(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Add the component's controller methods
    fn controllers(&self, _class: &mut ClassDef) {}
}

fn merge_into(target: &mut Map<String, Value>, path: &[&str], entries: Map<String, Value>) {
    let mut slot = target;
    for key in path {
        let entry = slot
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        slot = next;
    }
    for (key, value) in entries {
        slot.insert(key, value);
    }
}

impl RequestContext {
    /// Register a component and its controller class
    pub fn register_component(&mut self, component: Arc<dyn Component>) {
        let mut class = ClassDef::new(component.name());
        component.controllers(&mut class);
        if !class.is_empty() {
            self.controllers.register_component_class(class);
        }
        debug!(component = component.name(), "Component registered");
        self.components.push(component);
    }

    /// Registered components
    #[must_use]
    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    /// Load every registered component into the configuration
    ///
    /// # Errors
    ///
    /// Propagates halts from component setup and route serialization errors.
    pub fn load_components(&mut self) -> Result<()> {
        let components = self.components.clone();

        for component in &components {
            let codes = component.codes();
            if codes.is_empty() {
                continue;
            }
            let conflicts = match component.id() {
                Some(group) => self
                    .config
                    .response_codes
                    .register_group(group, &codes, component.name()),
                None => vec![CodeConflict::MissingGroupId {
                    component: component.name().to_string(),
                }],
            };
            for conflict in conflicts {
                let message = conflict.to_string();
                warn!(component = component.name(), "Spry Error - {message}");
                self.log_error(&message);
            }
        }

        for component in &components {
            component.setup(self)?;
        }

        for component in &components {
            let schema = component.schema();
            if !schema.is_empty() {
                merge_into(&mut self.config.db, &["schema", "tables"], schema);
            }
        }

        for component in &components {
            for (path, def) in component.routes() {
                self.config.routes.insert(path, serde_json::to_value(def)?);
            }
            let tests = component.tests();
            if !tests.is_empty() {
                merge_into(&mut self.config.tests, &[], tests);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{CodeMessages, Status};
    use crate::controller::ControllerRef;
    use serde_json::json;
    use std::sync::Mutex;

    struct Notes {
        calls: Mutex<Vec<&'static str>>,
    }

    impl Notes {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Component for Notes {
        fn name(&self) -> &str {
            "Notes"
        }

        fn id(&self) -> Option<i64> {
            Some(7)
        }

        fn codes(&self) -> CodeGroup {
            self.calls.lock().unwrap().push("codes");
            let mut codes = CodeGroup::new();
            codes.insert(1, CodeMessages::statuses(&[(Status::Success, "Note saved")]));
            codes
        }

        fn setup(&self, ctx: &mut RequestContext) -> Result<()> {
            self.calls.lock().unwrap().push("setup");
            ctx.config.extra.insert("notesReady".to_string(), json!(true));
            Ok(())
        }

        fn schema(&self) -> Map<String, Value> {
            self.calls.lock().unwrap().push("schema");
            let mut tables = Map::new();
            tables.insert("notes".to_string(), json!({"columns": {"body": "text"}}));
            tables
        }

        fn routes(&self) -> Vec<(String, RouteDef)> {
            self.calls.lock().unwrap().push("routes");
            vec![("/notes/".to_string(), "Notes::list".into())]
        }

        fn tests(&self) -> Map<String, Value> {
            let mut tests = Map::new();
            tests.insert("notes_list".to_string(), json!({"route": "/notes/"}));
            tests
        }

        fn controllers(&self, class: &mut ClassDef) {
            class.method("list", |_, _| Ok(json!(["a"])));
        }
    }

    struct Anonymous;

    impl Component for Anonymous {
        fn name(&self) -> &str {
            "Anonymous"
        }

        fn codes(&self) -> CodeGroup {
            let mut codes = CodeGroup::new();
            codes.insert(1, CodeMessages::Text("Orphan".to_string()));
            codes
        }
    }

    #[test]
    fn test_load_order_and_contributions() {
        let notes = Arc::new(Notes::new());
        let mut ctx = RequestContext::new();
        ctx.register_component(notes.clone());
        ctx.load_components().unwrap();

        assert_eq!(*notes.calls.lock().unwrap(), ["codes", "setup", "schema", "routes"]);
        assert!(ctx.config.response_codes.has_group(7));
        assert_eq!(ctx.config.db["schema"]["tables"]["notes"]["columns"]["body"], "text");
        assert_eq!(ctx.config.routes["/notes/"], "Notes::list");
        assert_eq!(ctx.config.tests["notes_list"]["route"], "/notes/");
        assert_eq!(ctx.config.extra["notesReady"], true);
    }

    #[test]
    fn test_component_controllers_resolve() {
        let mut ctx = RequestContext::new();
        ctx.register_component(Arc::new(Notes::new()));
        assert!(ctx.controller_exists(&ControllerRef::named("Notes", "list")));
        assert!(!ctx.controller_exists(&ControllerRef::named("Notes", "delete")));
    }

    #[test]
    fn test_codes_without_id_are_skipped() {
        let mut ctx = RequestContext::new();
        ctx.register_component(Arc::new(Anonymous));
        ctx.load_components().unwrap();
        assert!(!ctx.config.response_codes.has_group(1));
    }

    #[test]
    fn test_merge_into_nested() {
        let mut target = Map::new();
        target.insert("schema".to_string(), json!("not a map"));
        let mut entries = Map::new();
        entries.insert("t".to_string(), json!(1));
        merge_into(&mut target, &["schema", "tables"], entries);
        assert_eq!(target["schema"]["tables"]["t"], 1);
    }
}
