use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use trellis_core::{BoxError, ErrorDefinition, SchemaRef};

use crate::context::{PluginContext, ServiceArc};
use crate::handler::HandlerKind;
use crate::middleware::Middleware;
use crate::plugin::migration::Migration;

/// Type-erased service factory stored inside a [`Plugin`].
///
/// Resolves to `Ok(None)` for side-effect-only plugins.
pub type ServiceFactory =
    Arc<dyn Fn(PluginContext) -> BoxFuture<'static, Result<Option<ServiceArc>, BoxError>> + Send + Sync>;

/// Erases a factory's output, dropping the unit value.
fn into_service<S: Any + Send + Sync>(service: S) -> Option<ServiceArc> {
    if TypeId::of::<S>() == TypeId::of::<()>() {
        return None;
    }
    Some(Arc::new(service) as ServiceArc)
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// An immutable plugin declaration.
///
/// Built with [`Plugin::builder`]; once registered with the plugin manager it
/// is never mutated.
pub struct Plugin {
    name: String,
    version: Option<String>,
    dependencies: Vec<String>,
    factory: Option<ServiceFactory>,
    handlers: HashMap<String, Arc<dyn HandlerKind>>,
    middleware: HashMap<String, Arc<dyn Middleware>>,
    events: HashMap<String, SchemaRef>,
    custom_errors: HashMap<String, ErrorDefinition>,
    migrations: Vec<Migration>,
}

impl Plugin {
    /// Starts a declaration for a plugin called `name`.
    pub fn builder(name: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                name: name.into(),
                version: None,
                dependencies: Vec::new(),
                factory: None,
                handlers: HashMap::new(),
                middleware: HashMap::new(),
                events: HashMap::new(),
                custom_errors: HashMap::new(),
                migrations: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Declared dependency names, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Whether the plugin declares a service factory.
    pub fn has_service(&self) -> bool {
        self.factory.is_some()
    }

    pub(crate) fn factory(&self) -> Option<&ServiceFactory> {
        self.factory.as_ref()
    }

    /// Handler kinds contributed by this plugin.
    pub fn handlers(&self) -> &HashMap<String, Arc<dyn HandlerKind>> {
        &self.handlers
    }

    /// Middleware implementations contributed by this plugin.
    pub fn middleware(&self) -> &HashMap<String, Arc<dyn Middleware>> {
        &self.middleware
    }

    /// Event schemas declared by this plugin.
    pub fn events(&self) -> &HashMap<String, SchemaRef> {
        &self.events
    }

    /// Error types this plugin adds to the error registry.
    pub fn custom_errors(&self) -> &HashMap<String, ErrorDefinition> {
        &self.custom_errors
    }

    /// Migrations shipped with the plugin itself.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Binds a configuration value to the plugin.
    pub fn with_config(self, config: Value) -> ConfiguredPlugin {
        ConfiguredPlugin {
            plugin: Arc::new(self),
            config: Some(config),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        let mut middleware: Vec<&String> = self.middleware.keys().collect();
        middleware.sort();
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("has_service", &self.factory.is_some())
            .field("handlers", &handlers)
            .field("middleware", &middleware)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

// ─── PluginBuilder ────────────────────────────────────────────────────────────

/// Fluent builder for [`Plugin`].
///
/// ```rust,ignore
/// let users = Plugin::builder("users")
///     .version("1.2.0")
///     .depends_on("db")
///     .service(|ctx| async move {
///         let pool = ctx.dependency::<Pool>("db").ok_or("db service missing")?;
///         Ok(UserService::new(pool))
///     })
///     .middleware("auth", AuthMiddleware)
///     .custom_error("UserBanned", ErrorDefinition::new(403, "USER_BANNED", "User is banned"))
///     .build();
/// ```
pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.plugin.version = Some(version.into());
        self
    }

    /// Adds one dependency.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.plugin.dependencies.push(dependency.into());
        self
    }

    /// Adds several dependencies, keeping their order.
    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugin
            .dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Sets the service factory.  The returned value becomes the plugin's
    /// singleton service; a factory returning `()` registers nothing.
    pub fn service<S, F, Fut>(mut self, factory: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
    {
        let factory: ServiceFactory = Arc::new(move |ctx: PluginContext| {
            factory(ctx)
                .map(|result| result.map(into_service::<S>))
                .boxed()
        });
        self.plugin.factory = Some(factory);
        self
    }

    /// Sets a factory that only runs side effects and produces no service.
    pub fn setup<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let factory: ServiceFactory = Arc::new(move |ctx: PluginContext| {
            factory(ctx)
                .map(|result| result.map(|()| None::<ServiceArc>))
                .boxed()
        });
        self.plugin.factory = Some(factory);
        self
    }

    /// Contributes a handler kind under `name`.
    pub fn handler_kind(mut self, name: impl Into<String>, kind: impl HandlerKind + 'static) -> Self {
        self.plugin.handlers.insert(name.into(), Arc::new(kind));
        self
    }

    /// Contributes a middleware implementation under `name`.
    pub fn middleware(mut self, name: impl Into<String>, middleware: impl Middleware + 'static) -> Self {
        self.plugin.middleware.insert(name.into(), Arc::new(middleware));
        self
    }

    /// Contributes an already-shared middleware implementation.
    pub fn middleware_arc(mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        self.plugin.middleware.insert(name.into(), middleware);
        self
    }

    /// Declares the schema of an event the plugin emits.
    pub fn event(mut self, name: impl Into<String>, schema: SchemaRef) -> Self {
        self.plugin.events.insert(name.into(), schema);
        self
    }

    /// Adds a named error type.
    pub fn custom_error(mut self, name: impl Into<String>, definition: ErrorDefinition) -> Self {
        self.plugin.custom_errors.insert(name.into(), definition);
        self
    }

    /// Ships a migration unit with the plugin.  Its name is scoped to the
    /// plugin (`<plugin>/<name>`).
    pub fn migration(mut self, migration: Migration) -> Self {
        let migration = migration.scoped(&self.plugin.name);
        self.plugin.migrations.push(migration);
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}

// ─── ConfiguredPlugin ─────────────────────────────────────────────────────────

/// A plugin ready for registration, with its optionally bound configuration.
#[derive(Clone)]
pub struct ConfiguredPlugin {
    pub(crate) plugin: Arc<Plugin>,
    pub(crate) config: Option<Value>,
}

impl ConfiguredPlugin {
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }
}

impl From<Plugin> for ConfiguredPlugin {
    fn from(plugin: Plugin) -> Self {
        Self {
            plugin: Arc::new(plugin),
            config: None,
        }
    }
}

impl From<PluginBuilder> for ConfiguredPlugin {
    fn from(builder: PluginBuilder) -> Self {
        builder.build().into()
    }
}

impl fmt::Debug for ConfiguredPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredPlugin")
            .field("plugin", &self.plugin)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::CoreServices;

    fn ctx() -> PluginContext {
        PluginContext::new("p", Arc::new(CoreServices::new()), HashMap::new(), Value::Null)
    }

    #[tokio::test]
    async fn test_service_factory_wraps_value() {
        let plugin = Plugin::builder("counter")
            .version("0.1.0")
            .service(|_ctx| async { Ok(7_u64) })
            .build();

        assert_eq!(plugin.version(), Some("0.1.0"));
        let factory = plugin.factory().unwrap();
        let service = factory(ctx()).await.unwrap().unwrap();
        assert_eq!(*service.downcast::<u64>().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_setup_produces_no_service() {
        let plugin = Plugin::builder("side-effect")
            .setup(|_ctx| async { Ok(()) })
            .build();
        let factory = plugin.factory().unwrap();
        assert!(factory(ctx()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unit_returning_service_produces_no_service() {
        let plugin = Plugin::builder("cron")
            .service(|_ctx| async { Ok(()) })
            .build();
        let factory = plugin.factory().unwrap();
        assert!(factory(ctx()).await.unwrap().is_none());
    }

    #[test]
    fn test_embedded_migrations_are_scoped_to_plugin() {
        let noop = |name: &str| Migration::new(name, |_db| async { Ok(()) });
        let plugin = Plugin::builder("users")
            .migration(noop("001_create"))
            .migration(noop("users/002_index"))
            .migration(noop("usersx/003"))
            .build();
        let names: Vec<_> = plugin.migrations().iter().map(Migration::name).collect();
        assert_eq!(names, ["users/001_create", "users/002_index", "users/usersx/003"]);
    }

    #[test]
    fn test_with_config_binds_value() {
        let configured = Plugin::builder("x")
            .dependencies(["a", "b"])
            .build()
            .with_config(serde_json::json!({"k": 1}));
        assert_eq!(configured.name(), "x");
        assert_eq!(configured.plugin().dependencies(), ["a", "b"]);
        assert_eq!(configured.config(), Some(&serde_json::json!({"k": 1})));
    }
}
