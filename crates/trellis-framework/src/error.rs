//! Error types for the Trellis framework.

use thiserror::Error;
use trellis_core::BoxError;

/// Errors raised while registering, migrating, or initializing plugins.
///
/// All of them are fatal: they are returned before the dispatcher starts
/// serving and are never retried.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with the same name is already registered.
    #[error("plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    /// A plugin lists itself among its dependencies.
    #[error("plugin '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// A declared dependency is not a registered plugin.
    #[error("plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency {
        /// The plugin declaring the dependency.
        plugin: String,
        /// The unregistered dependency name.
        dependency: String,
    },

    /// The dependency graph contains a cycle through this plugin.
    #[error("circular dependency detected involving plugin '{0}'")]
    CircularDependency(String),

    /// A service factory returned an error.
    #[error("service factory of plugin '{plugin}' failed: {source}")]
    ServiceInit {
        plugin: String,
        #[source]
        source: BoxError,
    },

    /// `init()` already ran; the plugin set is frozen.
    #[error("plugins are already initialized")]
    AlreadyInitialized,

    /// The plugin's configuration could not be deserialized.
    #[error("invalid configuration for plugin '{plugin}': {source}")]
    Config {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    /// A migration unit failed under [`MigrationPolicy::Abort`](crate::plugin::MigrationPolicy::Abort).
    #[error("migration '{migration}' of plugin '{plugin}' failed: {source}")]
    Migration {
        plugin: String,
        migration: String,
        #[source]
        source: BoxError,
    },
}

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;
