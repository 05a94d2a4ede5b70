//! Application orchestration.
//!
//! [`TrellisApp`] wires configuration, logging, plugins, migrations and the
//! dispatcher together, then serves until a shutdown signal arrives.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trellis_runtime::TrellisApp;
//!
//! // Auto-loads trellis.toml from the current directory
//! TrellisApp::new()
//!     .plugin(todos_plugin())
//!     .router(todos_router())
//!     .run()
//!     .await?;
//!
//! // Custom configuration path
//! let app = TrellisApp::builder()
//!     .config_file("config/production.toml")
//!     .profile("production")
//!     .build()?;
//! ```
//!
//! Startup order:
//!
//! 1. validate the configuration
//! 2. register plugins (with their `[plugins.<name>]` sections)
//! 3. run migrations, when enabled
//! 4. initialize plugins in dependency order
//! 5. build the [`Dispatcher`] from the routers
//! 6. serve over HTTP (`http-server` feature)

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};

use crate::config::{ConfigLoader, ConfigResult, TrellisConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use crate::migrations::{SqlDirectorySource, SqlExecutor};
use trellis_core::CoreServices;
use trellis_framework::{
    ConfiguredPlugin, Dispatcher, HeaderIpExtractor, MigrationReport, MigrationSource,
    PluginManager, Router,
};

/// A Trellis application before startup.
///
/// Collects plugins and routers; [`start`](Self::start) turns it into a
/// [`RunningApp`], [`run`](Self::run) also serves it.
pub struct TrellisApp {
    config: TrellisConfig,
    core: Arc<CoreServices>,
    plugins: Vec<ConfiguredPlugin>,
    routers: Vec<Router>,
    sql_executor: Option<Arc<dyn SqlExecutor>>,
    migration_source: Option<Arc<dyn MigrationSource>>,
}

impl TrellisApp {
    /// Creates an application, loading configuration from the current
    /// directory.  If loading fails, defaults are used.
    pub fn new() -> Self {
        match ConfigLoader::new().with_current_dir().load() {
            Ok(config) => Self::from_config(config),
            Err(e) => {
                let app = Self::from_config(TrellisConfig::default());
                warn!(error = %e, "Failed to load configuration, using defaults");
                app
            }
        }
    }

    /// Creates a builder for custom configuration loading.
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Creates an application from configuration and initializes logging.
    pub fn from_config(config: TrellisConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Application created from configuration"
        );

        Self {
            config,
            core: Arc::new(CoreServices::new()),
            plugins: Vec::new(),
            routers: Vec::new(),
            sql_executor: None,
            migration_source: None,
        }
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// Replaces the host services (database handle, error registry).
    pub fn core_services(mut self, core: CoreServices) -> Self {
        self.core = Arc::new(core);
        self
    }

    pub fn plugin(mut self, plugin: impl Into<ConfiguredPlugin>) -> Self {
        self.plugins.push(plugin.into());
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.routers.push(router);
        self
    }

    /// Runs `migrations.directory` SQL files through `executor`.
    pub fn sql_executor(mut self, executor: Arc<dyn SqlExecutor>) -> Self {
        self.sql_executor = Some(executor);
        self
    }

    /// Uses a custom migration source; takes precedence over the SQL
    /// directory.
    pub fn migration_source(mut self, source: Arc<dyn MigrationSource>) -> Self {
        self.migration_source = Some(source);
        self
    }

    fn resolve_migration_source(&mut self) -> Option<Arc<dyn MigrationSource>> {
        if let Some(source) = self.migration_source.take() {
            return Some(source);
        }
        let dir = self.config.migrations.directory.as_deref()?;
        match &self.sql_executor {
            Some(executor) => Some(Arc::new(SqlDirectorySource::new(dir, Arc::clone(executor)))),
            None => {
                warn!(
                    directory = %dir.display(),
                    "Migration directory configured without an SQL executor, skipping SQL files"
                );
                None
            }
        }
    }

    /// Registers plugins, runs migrations, initializes services and builds
    /// the dispatcher.
    pub async fn start(mut self) -> RuntimeResult<RunningApp> {
        validate_config(&self.config)?;

        let mut manager = PluginManager::new(Arc::clone(&self.core))
            .with_plugin_configs(self.config.plugins.clone())
            .with_migration_policy(self.config.migrations.policy);
        if let Some(source) = self.resolve_migration_source() {
            manager = manager.with_migration_source(source);
        }

        for plugin in std::mem::take(&mut self.plugins) {
            manager.register(plugin)?;
        }

        let migrations = if self.config.migrations.enabled {
            let report = manager.migrate().await?;
            if report.is_clean() {
                info!(applied = report.applied.len(), "Migrations complete");
            } else {
                warn!(
                    applied = report.applied.len(),
                    failed = report.failed.len(),
                    "Migrations finished with failures"
                );
            }
            Some(report)
        } else {
            info!("Migrations disabled");
            None
        };

        manager.init().await?;

        let dispatcher = Dispatcher::builder(&manager)
            .routers(std::mem::take(&mut self.routers))
            .ip_extractor(HeaderIpExtractor::new(self.config.server.trust_proxy))
            .base_path(&self.config.server.base_path)
            .build();

        info!(
            plugins = manager.plugins().count(),
            routes = dispatcher.route_names().len(),
            "Application started"
        );

        Ok(RunningApp {
            config: self.config,
            manager,
            dispatcher: Arc::new(dispatcher),
            migrations,
        })
    }

    /// Starts the application and serves it until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Starts the application and serves it until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let app = self.start().await?;
        app.serve_until(shutdown).await
    }
}

impl Default for TrellisApp {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RunningApp
// =============================================================================

/// A started application: plugins initialized, dispatcher built.
pub struct RunningApp {
    config: TrellisConfig,
    manager: PluginManager,
    dispatcher: Arc<Dispatcher>,
    migrations: Option<MigrationReport>,
}

impl RunningApp {
    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// `None` when migrations are disabled.
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.migrations.as_ref()
    }

    /// Serves over HTTP until `shutdown` completes.
    #[cfg(feature = "http-server")]
    pub async fn serve_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        use trellis_transport::HttpServer;

        let handle = HttpServer::new(Arc::clone(&self.dispatcher))
            .max_body_bytes(self.config.server.max_body_bytes)
            .bind(&self.config.server.bind_addr())
            .await?;

        info!(addr = %handle.local_addr(), "Trellis is now running. Press Ctrl+C to stop.");
        shutdown.await;

        handle.shutdown();
        handle.stopped().await?;
        info!("Trellis stopped");
        Ok(())
    }

    /// Without the `http-server` feature there is no listener; waits for
    /// `shutdown` only.
    #[cfg(not(feature = "http-server"))]
    pub async fn serve_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        warn!("Built without the http-server feature, no listener started");
        shutdown.await;
        info!("Trellis stopped");
        Ok(())
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                if let Err(e) = signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// AppBuilder
// =============================================================================

/// Builder for a [`TrellisApp`] with custom configuration loading.
pub struct AppBuilder {
    config_loader: ConfigLoader,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges programmatic defaults; files and environment override them.
    pub fn merge(mut self, config: TrellisConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<TrellisApp> {
        let config = self.config_loader.load()?;
        Ok(TrellisApp::from_config(config))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
