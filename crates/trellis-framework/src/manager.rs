//! Plugin lifecycle management.
//!
//! [`PluginManager`] owns every registered plugin and drives startup:
//!
//! 1. [`register`](PluginManager::register): rejects duplicate names, nothing
//!    else.
//! 2. [`migrate`](PluginManager::migrate): runs each plugin's migration units
//!    in dependency order.
//! 3. [`init`](PluginManager::init): validates dependencies, orders the
//!    plugins, and constructs their services one at a time, injecting the
//!    services of already-constructed dependencies.
//!
//! Every phase runs to completion before the next begins.  After `init()` the
//! plugin set and the [`ServiceRegistry`] are frozen.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut manager = PluginManager::new(Arc::new(core));
//! manager.register(db_plugin)?;
//! manager.register(users_plugin)?;
//! manager.migrate().await?;
//! manager.init().await?;
//!
//! let users = manager.services().get::<UserService>("users");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use trellis_core::{BoxError, CoreServices, SchemaRef};

use crate::context::{PluginContext, ServiceRegistry};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{
    AppliedMigration, ConfiguredPlugin, FailedMigration, Migration, MigrationPolicy,
    MigrationReport, MigrationSource, Plugin,
};
use crate::resolver;

/// Merges a bound configuration over the configuration-file section.
///
/// Objects merge key by key (one level deep); any other bound value replaces
/// the file value outright.
fn merge_config(file: Option<&Value>, bound: Option<&Value>) -> Value {
    match (file, bound) {
        (Some(Value::Object(base)), Some(Value::Object(overlay))) => {
            let mut merged = base.clone();
            merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        (_, Some(bound)) => bound.clone(),
        (Some(file), None) => file.clone(),
        (None, None) => Value::Null,
    }
}

/// Owner of all registered plugins and of the service registry.
pub struct PluginManager {
    core: Arc<CoreServices>,
    plugins: Vec<ConfiguredPlugin>,
    file_configs: HashMap<String, Value>,
    services: ServiceRegistry,
    migration_source: Option<Arc<dyn MigrationSource>>,
    migration_policy: MigrationPolicy,
    initialized: bool,
}

impl PluginManager {
    pub fn new(core: Arc<CoreServices>) -> Self {
        Self {
            core,
            plugins: Vec::new(),
            file_configs: HashMap::new(),
            services: ServiceRegistry::default(),
            migration_source: None,
            migration_policy: MigrationPolicy::default(),
            initialized: false,
        }
    }

    /// Sets the `plugins.<name>` sections of the configuration file.
    pub fn with_plugin_configs(mut self, configs: HashMap<String, Value>) -> Self {
        self.file_configs = configs;
        self
    }

    /// Adds a source of migration units besides those embedded in plugins.
    pub fn with_migration_source(mut self, source: Arc<dyn MigrationSource>) -> Self {
        self.migration_source = Some(source);
        self
    }

    pub fn with_migration_policy(mut self, policy: MigrationPolicy) -> Self {
        self.migration_policy = policy;
        self
    }

    // ─── Registration ─────────────────────────────────────────────────────────

    /// Registers a plugin.
    ///
    /// # Errors
    ///
    /// [`PluginError::AlreadyRegistered`] on a duplicate name and
    /// [`PluginError::AlreadyInitialized`] after `init()`.  Dependencies are
    /// not checked here.
    pub fn register(&mut self, plugin: impl Into<ConfiguredPlugin>) -> PluginResult<()> {
        let plugin = plugin.into();
        if self.initialized {
            return Err(PluginError::AlreadyInitialized);
        }
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(PluginError::AlreadyRegistered(plugin.name().to_string()));
        }
        info!(
            plugin = %plugin.name(),
            version = plugin.plugin().version().unwrap_or("-"),
            dependencies = ?plugin.plugin().dependencies(),
            "Plugin registered"
        );
        self.plugins.push(plugin);
        Ok(())
    }

    // ─── Ordering ─────────────────────────────────────────────────────────────

    /// Checks that no plugin depends on itself or on an unregistered plugin.
    fn validate_dependencies(&self) -> PluginResult<()> {
        for configured in &self.plugins {
            let plugin = configured.plugin();
            for dep in plugin.dependencies() {
                if dep == plugin.name() {
                    return Err(PluginError::SelfDependency(dep.clone()));
                }
                if !self.plugins.iter().any(|p| p.name() == dep) {
                    return Err(PluginError::MissingDependency {
                        plugin: plugin.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Plugins in dependency-first order.
    ///
    /// # Errors
    ///
    /// [`PluginError::CircularDependency`] if the graph has a cycle.
    pub fn resolve_order(&self) -> PluginResult<Vec<Arc<Plugin>>> {
        let order = resolver::resolve_order(&self.plugins)?;
        Ok(order
            .into_iter()
            .map(|i| Arc::clone(self.plugins[i].plugin()))
            .collect())
    }

    /// The configuration a plugin's context receives.
    pub fn plugin_config(&self, name: &str) -> Value {
        let bound = self
            .plugins
            .iter()
            .find(|p| p.name() == name)
            .and_then(ConfiguredPlugin::config);
        merge_config(self.file_configs.get(name), bound)
    }

    // ─── Migration ────────────────────────────────────────────────────────────

    /// Runs every plugin's migration units, plugins in dependency order and
    /// units sorted by name.
    ///
    /// Under [`MigrationPolicy::BestEffort`] a failing unit, or a failing
    /// discovery, is logged and recorded and the run continues; under
    /// [`MigrationPolicy::Abort`] the first failure is returned.
    pub async fn migrate(&self) -> PluginResult<MigrationReport> {
        let mut report = MigrationReport::default();
        for plugin in self.resolve_order()? {
            let mut units: Vec<Migration> = plugin.migrations().to_vec();
            if let Some(source) = &self.migration_source {
                match source.discover(plugin.name()).await {
                    Ok(found) => units.extend(found),
                    // embedded units still run
                    Err(err) => self.record_failure(&mut report, plugin.name(), "<discovery>", err)?,
                }
            }
            if units.is_empty() {
                continue;
            }
            units.sort_by(|a, b| a.name().cmp(b.name()));

            for unit in units {
                match unit.apply(self.core.db().clone()).await {
                    Ok(()) => {
                        info!(plugin = %plugin.name(), migration = %unit.name(), "Migration applied");
                        report.applied.push(AppliedMigration {
                            plugin: plugin.name().to_string(),
                            migration: unit.name().to_string(),
                        });
                    }
                    Err(err) => self.record_failure(&mut report, plugin.name(), unit.name(), err)?,
                }
            }
        }
        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Migrations finished"
        );
        Ok(report)
    }

    fn record_failure(
        &self,
        report: &mut MigrationReport,
        plugin: &str,
        migration: &str,
        err: BoxError,
    ) -> PluginResult<()> {
        error!(plugin = %plugin, migration = %migration, error = %err, "Migration failed");
        report.failed.push(FailedMigration {
            plugin: plugin.to_string(),
            migration: migration.to_string(),
            error: err.to_string(),
        });
        match self.migration_policy {
            MigrationPolicy::BestEffort => Ok(()),
            MigrationPolicy::Abort => Err(PluginError::Migration {
                plugin: plugin.to_string(),
                migration: migration.to_string(),
                source: err,
            }),
        }
    }

    // ─── Initialization ───────────────────────────────────────────────────────

    /// Constructs every plugin's service in dependency order.
    ///
    /// Nothing is constructed unless every dependency is registered and the
    /// graph is acyclic.  A failing factory aborts the run; no service is
    /// kept in that case.
    pub async fn init(&mut self) -> PluginResult<()> {
        if self.initialized {
            return Err(PluginError::AlreadyInitialized);
        }
        self.validate_dependencies()?;
        let order = self.resolve_order()?;
        debug!(order = ?order.iter().map(|p| p.name()).collect::<Vec<_>>(), "Plugin order resolved");

        let mut services = ServiceRegistry::default();
        for plugin in order {
            for (name, definition) in plugin.custom_errors() {
                self.core.errors().register(name.clone(), definition.clone());
            }

            let Some(factory) = plugin.factory() else {
                debug!(plugin = %plugin.name(), "Plugin declares no service");
                continue;
            };

            let deps = plugin
                .dependencies()
                .iter()
                .filter_map(|dep| services.get_raw(dep).map(|s| (dep.clone(), Arc::clone(s))))
                .collect();
            let ctx = PluginContext::new(
                plugin.name(),
                Arc::clone(&self.core),
                deps,
                self.plugin_config(plugin.name()),
            );

            match factory(ctx).await {
                Ok(Some(service)) => {
                    services.insert(plugin.name(), service);
                    info!(plugin = %plugin.name(), "Service constructed");
                }
                Ok(None) => debug!(plugin = %plugin.name(), "Plugin set up without a service"),
                Err(source) => {
                    error!(plugin = %plugin.name(), error = %source, "Service factory failed");
                    return Err(PluginError::ServiceInit {
                        plugin: plugin.name().to_string(),
                        source,
                    });
                }
            }
        }

        self.services = services;
        self.initialized = true;
        info!(
            plugins = self.plugins.len(),
            services = self.services.len(),
            "Plugins initialized"
        );
        Ok(())
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// The live service registry (empty until `init()` succeeds).
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn core(&self) -> &Arc<CoreServices> {
        &self.core
    }

    /// Registered plugins, in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<Plugin>> {
        self.plugins.iter().map(ConfiguredPlugin::plugin)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Event schemas declared by all plugins.  On a name clash the first
    /// registered plugin wins.
    pub fn event_schemas(&self) -> BTreeMap<String, SchemaRef> {
        let mut schemas = BTreeMap::new();
        for plugin in self.plugins() {
            for (name, schema) in plugin.events() {
                if schemas.contains_key(name) {
                    warn!(event = %name, plugin = %plugin.name(), "Event schema already declared, ignoring");
                    continue;
                }
                schemas.insert(name.clone(), Arc::clone(schema));
            }
        }
        schemas
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins.iter().map(ConfiguredPlugin::name).collect::<Vec<_>>())
            .field("services", &self.services)
            .field("initialized", &self.initialized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use trellis_core::{Database, ErrorDefinition, FnSchema, SchemaError};

    #[derive(Debug)]
    struct Val {
        val: i64,
    }

    fn manager() -> PluginManager {
        PluginManager::new(Arc::new(CoreServices::new()))
    }

    /// A plugin whose factory bumps `calls`.
    fn counted(name: &str, deps: &[&str], calls: &Arc<AtomicUsize>) -> Plugin {
        let calls = Arc::clone(calls);
        Plugin::builder(name)
            .dependencies(deps.iter().copied())
            .setup(move |_ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()
    }

    #[tokio::test]
    async fn test_dependency_service_is_injected() {
        let mut manager = manager();
        manager
            .register(Plugin::builder("a").service(|_ctx| async { Ok(Val { val: 1 }) }))
            .unwrap();
        manager
            .register(
                Plugin::builder("b")
                    .depends_on("a")
                    .service(|ctx| async move {
                        let a = ctx.dependency::<Val>("a").ok_or("a missing")?;
                        Ok::<_, BoxError>(Val { val: a.val + 1 })
                    }),
            )
            .unwrap();
        manager.init().await.unwrap();

        assert_eq!(manager.services().get::<Val>("b").unwrap().val, 2);
    }

    #[tokio::test]
    async fn test_dependency_is_reference_identical_and_ordered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(None));

        let mut manager = manager();
        let log_b = Arc::clone(&log);
        let seen_b = Arc::clone(&seen);
        // registered before its dependency on purpose
        manager
            .register(Plugin::builder("b").depends_on("a").service(move |ctx| {
                let log = Arc::clone(&log_b);
                let seen = Arc::clone(&seen_b);
                async move {
                    log.lock().push("b:start");
                    *seen.lock() = ctx.dependency::<Val>("a");
                    Ok(())
                }
            }))
            .unwrap();
        let log_a = Arc::clone(&log);
        manager
            .register(Plugin::builder("a").service(move |_ctx| {
                let log = Arc::clone(&log_a);
                async move {
                    log.lock().push("a:start");
                    tokio::task::yield_now().await;
                    log.lock().push("a:end");
                    Ok(Val { val: 1 })
                }
            }))
            .unwrap();

        manager.init().await.unwrap();

        assert_eq!(*log.lock(), ["a:start", "a:end", "b:start"]);
        let from_registry = manager.services().get::<Val>("a").unwrap();
        let injected = seen.lock().clone().unwrap();
        assert!(Arc::ptr_eq(&from_registry, &injected));
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_before_any_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = manager();
        manager.register(counted("x", &[], &calls)).unwrap();
        let err = manager.register(counted("x", &[], &calls)).unwrap_err();

        assert!(matches!(err, PluginError::AlreadyRegistered(ref n) if n == "x"));
        assert!(err.to_string().contains("already registered"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_self_dependency_fails_init() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = manager();
        manager.register(counted("x", &["x"], &calls)).unwrap();
        let err = manager.init().await.unwrap_err();

        assert!(matches!(err, PluginError::SelfDependency(ref n) if n == "x"));
        assert!(err.to_string().contains("'x'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_init_not_register() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = manager();
        manager.register(counted("ok", &[], &calls)).unwrap();
        manager.register(counted("needy", &["ghost"], &calls)).unwrap();

        let err = manager.init().await.unwrap_err();
        match err {
            PluginError::MissingDependency { plugin, dependency } => {
                assert_eq!(plugin, "needy");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_fails_without_constructing_anything() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = manager();
        manager.register(counted("a", &["b"], &calls)).unwrap();
        manager.register(counted("b", &["c"], &calls)).unwrap();
        manager.register(counted("c", &["a"], &calls)).unwrap();
        manager.register(counted("free", &[], &calls)).unwrap();

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, PluginError::CircularDependency(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_factory_error_aborts_init() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = manager();
        manager.register(counted("first", &[], &calls)).unwrap();
        manager
            .register(
                Plugin::builder("broken")
                    .depends_on("first")
                    .service(|_ctx| async { Err::<(), BoxError>("no connection".into()) }),
            )
            .unwrap();
        manager.register(counted("after", &["broken"], &calls)).unwrap();

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, PluginError::ServiceInit { ref plugin, .. } if plugin == "broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.services().is_empty());
    }

    #[tokio::test]
    async fn test_init_twice_and_late_registration() {
        let mut manager = manager();
        manager.init().await.unwrap();
        assert!(matches!(manager.init().await, Err(PluginError::AlreadyInitialized)));
        assert!(matches!(
            manager.register(Plugin::builder("late").build()),
            Err(PluginError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_side_effect_plugin_has_no_service() {
        let mut manager = manager();
        manager
            .register(Plugin::builder("cron").setup(|_ctx| async { Ok(()) }))
            .unwrap();
        manager.register(Plugin::builder("empty").build()).unwrap();
        manager.init().await.unwrap();
        assert!(manager.services().is_empty());
        assert_eq!(manager.plugins().count(), 2);
    }

    #[tokio::test]
    async fn test_unit_returning_service_is_not_registered() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in = Arc::clone(&seen);
        let mut manager = manager();
        manager
            .register(Plugin::builder("cron").service(|_ctx| async { Ok(()) }))
            .unwrap();
        manager
            .register(Plugin::builder("report").depends_on("cron").setup(move |ctx| {
                let seen = Arc::clone(&seen_in);
                async move {
                    *seen.lock() = Some(ctx.dependency::<()>("cron").is_some());
                    Ok(())
                }
            }))
            .unwrap();
        manager.init().await.unwrap();

        assert!(manager.services().is_empty());
        assert!(manager.services().get::<()>("cron").is_none());
        assert_eq!(*seen.lock(), Some(false));
    }

    #[tokio::test]
    async fn test_custom_errors_are_registered() {
        let mut manager = manager();
        manager
            .register(Plugin::builder("billing").custom_error(
                "QuotaExceeded",
                ErrorDefinition::new(402, "QUOTA_EXCEEDED", "Quota exceeded"),
            ))
            .unwrap();
        manager.init().await.unwrap();
        assert!(manager.core().errors().contains("QuotaExceeded"));
    }

    #[tokio::test]
    async fn test_config_file_section_merged_with_bound_config() {
        let seen = Arc::new(Mutex::new(Value::Null));
        let seen_in = Arc::clone(&seen);
        let plugin = Plugin::builder("mailer")
            .setup(move |ctx| {
                let seen = Arc::clone(&seen_in);
                async move {
                    *seen.lock() = ctx.raw_config().clone();
                    Ok(())
                }
            })
            .build()
            .with_config(json!({"sender": "bound@example.com"}));

        let mut manager = manager().with_plugin_configs(HashMap::from([(
            "mailer".to_string(),
            json!({"sender": "file@example.com", "retries": 3}),
        )]));
        manager.register(plugin).unwrap();
        manager.init().await.unwrap();

        assert_eq!(
            *seen.lock(),
            json!({"sender": "bound@example.com", "retries": 3})
        );
    }

    #[test]
    fn test_merge_config_replaces_non_objects() {
        assert_eq!(merge_config(Some(&json!({"a": 1})), Some(&json!(5))), json!(5));
        assert_eq!(merge_config(Some(&json!([1])), None), json!([1]));
        assert_eq!(merge_config(None, None), Value::Null);
    }

    fn tagged(tag: &str) -> SchemaRef {
        Arc::new(FnSchema::new(Ok::<Value, SchemaError>).described(json!(tag)))
    }

    #[test]
    fn test_event_schema_clash_first_plugin_wins() {
        let mut manager = manager();
        manager
            .register(
                Plugin::builder("todos")
                    .event("todo.created", tagged("todos"))
                    .event("todo.deleted", tagged("todos")),
            )
            .unwrap();
        manager
            .register(
                Plugin::builder("audit")
                    .event("todo.created", tagged("audit"))
                    .event("audit.logged", tagged("audit")),
            )
            .unwrap();

        let described: BTreeMap<_, _> = manager
            .event_schemas()
            .into_iter()
            .map(|(name, schema)| (name, schema.describe()))
            .collect();
        assert_eq!(
            described,
            BTreeMap::from([
                ("audit.logged".to_string(), json!("audit")),
                ("todo.created".to_string(), json!("todos")),
                ("todo.deleted".to_string(), json!("todos")),
            ])
        );
    }

    // ─── migrations ──────────────────────────────────────────────────────────

    fn recording_unit(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Migration {
        let log = Arc::clone(log);
        let label = name.to_string();
        Migration::new(name, move |_db: Database| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().push(label);
                if fail { Err::<(), BoxError>("boom".into()) } else { Ok(()) }
            }
        })
    }

    struct ListedSource {
        units: HashMap<String, Vec<Migration>>,
    }

    #[async_trait]
    impl MigrationSource for ListedSource {
        async fn discover(&self, plugin: &str) -> Result<Vec<Migration>, BoxError> {
            Ok(self.units.get(plugin).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_migrations_run_in_dependency_then_name_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let source = ListedSource {
            units: HashMap::from([(
                "users".to_string(),
                vec![recording_unit("users/002_index", &log, false)],
            )]),
        };
        let mut manager = manager().with_migration_source(Arc::new(source));
        manager
            .register(
                Plugin::builder("users")
                    .depends_on("db")
                    .migration(recording_unit("users/001_create", &log, false)),
            )
            .unwrap();
        manager
            .register(
                Plugin::builder("db")
                    .migration(recording_unit("db/002_b", &log, false))
                    .migration(recording_unit("db/001_a", &log, false)),
            )
            .unwrap();

        let report = manager.migrate().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(
            *log.lock(),
            ["db/001_a", "db/002_b", "users/001_create", "users/002_index"]
        );
        assert_eq!(report.applied.len(), 4);
    }

    #[tokio::test]
    async fn test_best_effort_continues_after_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = manager();
        manager
            .register(
                Plugin::builder("a")
                    .migration(recording_unit("1", &log, true))
                    .migration(recording_unit("2", &log, false)),
            )
            .unwrap();
        manager
            .register(Plugin::builder("b").migration(recording_unit("3", &log, false)))
            .unwrap();

        let report = manager.migrate().await.unwrap();
        assert_eq!(*log.lock(), ["1", "2", "3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].migration, "a/1");
        assert_eq!(report.failed[0].plugin, "a");
        assert_eq!(report.failed[0].error, "boom");
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = manager().with_migration_policy(MigrationPolicy::Abort);
        manager
            .register(
                Plugin::builder("a")
                    .migration(recording_unit("1", &log, true))
                    .migration(recording_unit("2", &log, false)),
            )
            .unwrap();

        let err = manager.migrate().await.unwrap_err();
        assert!(matches!(err, PluginError::Migration { ref migration, .. } if migration == "a/1"));
        assert_eq!(*log.lock(), ["1"]);
    }

    struct BrokenSource;

    #[async_trait]
    impl MigrationSource for BrokenSource {
        async fn discover(&self, _plugin: &str) -> Result<Vec<Migration>, BoxError> {
            Err("permission denied".into())
        }
    }

    #[tokio::test]
    async fn test_discovery_failure_still_runs_embedded_units() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = manager().with_migration_source(Arc::new(BrokenSource));
        manager
            .register(Plugin::builder("a").migration(recording_unit("001_embedded", &log, false)))
            .unwrap();

        let report = manager.migrate().await.unwrap();
        assert_eq!(*log.lock(), ["001_embedded"]);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].migration, "a/001_embedded");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].migration, "<discovery>");
        assert_eq!(report.failed[0].error, "permission denied");
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_under_abort_policy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = manager()
            .with_migration_source(Arc::new(BrokenSource))
            .with_migration_policy(MigrationPolicy::Abort);
        manager
            .register(Plugin::builder("a").migration(recording_unit("001_embedded", &log, false)))
            .unwrap();

        let err = manager.migrate().await.unwrap_err();
        assert!(matches!(err, PluginError::Migration { ref migration, .. } if migration == "<discovery>"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_embedded_and_discovered_units_interleave_by_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let source = ListedSource {
            units: HashMap::from([(
                "users".to_string(),
                vec![recording_unit("users/001_create.sql", &log, false)],
            )]),
        };
        let mut manager = manager().with_migration_source(Arc::new(source));
        manager
            .register(Plugin::builder("users").migration(recording_unit("002_seed", &log, false)))
            .unwrap();

        manager.migrate().await.unwrap();
        assert_eq!(*log.lock(), ["users/001_create.sql", "002_seed"]);
    }
}
