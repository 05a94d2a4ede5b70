//! Contexts handed to plugins and to request handlers.
//!
//! - [`ServiceRegistry`]: plugin name → the singleton service its factory
//!   produced.  Filled once by the plugin manager, read-only afterwards.
//!
//! - [`PluginContext`]: built once per plugin during `init()`.  Carries the
//!   core services, the already-constructed services of the plugin's declared
//!   dependencies, and the plugin's resolved configuration.
//!
//! - [`ServerContext`]: built once per request by the dispatcher and shared
//!   (behind an `Arc`) by every middleware and the handler of that request.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use trellis_core::{CoreServices, Database, ErrorRegistry, HttpError, SchemaRef};

use crate::error::PluginError;

/// A type-erased service value.
///
/// Factories return their service by value; the manager wraps it in an `Arc`
/// and upcasts it to `Any`.  Consumers downcast back with
/// [`Arc::downcast`], which keeps the allocation shared.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

fn downcast_service<T: Any + Send + Sync>(service: &ServiceArc) -> Option<Arc<T>> {
    Arc::clone(service).downcast::<T>().ok()
}

// =============================================================================
// ServiceRegistry
// =============================================================================

/// Plugin name → service produced by that plugin's factory.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceArc>,
}

impl ServiceRegistry {
    pub(crate) fn insert(&mut self, plugin: impl Into<String>, service: ServiceArc) {
        self.services.insert(plugin.into(), service);
    }

    /// Returns the service of `plugin`, downcast to `T`.
    pub fn get<T: Any + Send + Sync>(&self, plugin: &str) -> Option<Arc<T>> {
        self.services.get(plugin).and_then(downcast_service)
    }

    /// Returns the type-erased service of `plugin`.
    pub fn get_raw(&self, plugin: &str) -> Option<&ServiceArc> {
        self.services.get(plugin)
    }

    pub fn contains(&self, plugin: &str) -> bool {
        self.services.contains_key(plugin)
    }

    /// Names of the plugins that produced a service, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

// =============================================================================
// PluginContext
// =============================================================================

/// Everything a plugin's service factory may use.
#[derive(Clone)]
pub struct PluginContext {
    name: Arc<str>,
    core: Arc<CoreServices>,
    deps: HashMap<String, ServiceArc>,
    config: Arc<Value>,
}

impl PluginContext {
    /// Creates a context.  Normally only the plugin manager does this; it is
    /// public so plugin factories can be exercised in isolation.
    pub fn new(
        name: impl Into<Arc<str>>,
        core: Arc<CoreServices>,
        deps: HashMap<String, ServiceArc>,
        config: Value,
    ) -> Self {
        Self {
            name: name.into(),
            core,
            deps,
            config: Arc::new(config),
        }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core(&self) -> &Arc<CoreServices> {
        &self.core
    }

    pub fn db(&self) -> &Database {
        self.core.db()
    }

    pub fn errors(&self) -> &Arc<ErrorRegistry> {
        self.core.errors()
    }

    /// Returns the service of a declared dependency.
    ///
    /// The returned `Arc` points at the very value stored in the service
    /// registry.  `None` if `name` is not a dependency, produced no service,
    /// or is not a `T`.
    pub fn dependency<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.deps.get(name).and_then(downcast_service)
    }

    /// Returns a dependency's type-erased service.
    pub fn raw_dependency(&self, name: &str) -> Option<&ServiceArc> {
        self.deps.get(name)
    }

    /// Names of the dependencies whose services are available.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    /// The resolved configuration value (`null` when none was given).
    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// Deserializes the configuration.  A missing configuration is treated
    /// as an empty object so that `#[serde(default)]` types work unconfigured.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        let value = match self.config.as_ref() {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|source| PluginError::Config {
            plugin: self.name.to_string(),
            source,
        })
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("deps", &self.deps.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// ServerContext
// =============================================================================

/// Request-scoped context passed to middleware and handlers.
pub struct ServerContext {
    db: Database,
    services: Arc<ServiceRegistry>,
    core: Arc<CoreServices>,
    errors: Arc<ErrorRegistry>,
    events: Arc<BTreeMap<String, SchemaRef>>,
    ip: String,
    request_id: Uuid,
}

impl ServerContext {
    /// Builds a context with a freshly generated request id.
    pub fn new(services: Arc<ServiceRegistry>, core: Arc<CoreServices>, ip: impl Into<String>) -> Self {
        Self {
            db: core.db().clone(),
            errors: Arc::clone(core.errors()),
            events: Arc::default(),
            services,
            core,
            ip: ip.into(),
            request_id: Uuid::new_v4(),
        }
    }

    /// Attaches the event schemas declared by plugins.
    pub fn with_event_schemas(mut self, events: Arc<BTreeMap<String, SchemaRef>>) -> Self {
        self.events = events;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The plugin-declared schema of an event, if any.
    pub fn event_schema(&self, event: &str) -> Option<&SchemaRef> {
        self.events.get(event)
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Shorthand for `services().get::<T>(plugin)`.
    pub fn service<T: Any + Send + Sync>(&self, plugin: &str) -> Option<Arc<T>> {
        self.services.get(plugin)
    }

    pub fn core(&self) -> &Arc<CoreServices> {
        &self.core
    }

    pub fn errors(&self) -> &ErrorRegistry {
        &self.errors
    }

    /// Instantiates a named error type, e.g. `ctx.error("NotFound", None)`.
    pub fn error(&self, name: &str, message: Option<&str>) -> HttpError {
        self.errors.create(name, message)
    }

    /// The resolved client IP, or `"unknown"`.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("request_id", &self.request_id)
            .field("ip", &self.ip)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        #[serde(default = "default_max")]
        max: u32,
    }

    fn default_max() -> u32 {
        10
    }

    fn context(config: Value) -> PluginContext {
        let dep: ServiceArc = Arc::new(42_u32);
        PluginContext::new(
            "limits",
            Arc::new(CoreServices::new()),
            HashMap::from([("counter".to_string(), dep)]),
            config,
        )
    }

    #[test]
    fn test_config_defaults_when_absent() {
        let ctx = context(Value::Null);
        assert_eq!(ctx.config::<Limits>().unwrap(), Limits { max: 10 });

        let ctx = context(serde_json::json!({"max": 3}));
        assert_eq!(ctx.config::<Limits>().unwrap(), Limits { max: 3 });
    }

    #[test]
    fn test_config_type_mismatch() {
        let ctx = context(serde_json::json!({"max": "lots"}));
        let err = ctx.config::<Limits>().unwrap_err();
        assert!(matches!(err, PluginError::Config { ref plugin, .. } if plugin == "limits"));
    }

    #[test]
    fn test_dependency_is_shared_not_copied() {
        let ctx = context(Value::Null);
        let a = ctx.dependency::<u32>("counter").unwrap();
        let b = ctx.dependency::<u32>("counter").unwrap();
        assert_eq!(*a, 42);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(ctx.dependency::<String>("counter").is_none());
        assert!(ctx.dependency::<u32>("missing").is_none());
    }

    #[test]
    fn test_server_context_request_ids_are_unique() {
        let services = Arc::new(ServiceRegistry::default());
        let core = Arc::new(CoreServices::new());
        let a = ServerContext::new(Arc::clone(&services), Arc::clone(&core), "10.0.0.1");
        let b = ServerContext::new(services, core, "10.0.0.1");
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.ip(), "10.0.0.1");
        assert_eq!(a.error("NotFound", Some("gone")).message(), "gone");
    }
}
