//! Trellis Runtime - Orchestration layer for the Trellis framework.
//!
//! This crate provides:
//! - Layered configuration (`TrellisConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`, `init_from_config`)
//! - SQL-directory migrations (`SqlDirectorySource`)
//! - Application startup and shutdown (`TrellisApp`)
//!
//! # Features
//!
//! - `toml-config` (default): `trellis.toml` / `config.toml`
//! - `yaml-config`: `trellis.yaml` / `config.yaml`
//! - `json-log`: JSON log output
//! - `http-server`: serve the dispatcher over HTTP
//!
//! ```ignore
//! use trellis_runtime::TrellisApp;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     TrellisApp::new()
//!         .plugin(todos_plugin())
//!         .router(todos_router())
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod migrations;

// Re-exports
pub use app::{AppBuilder, RunningApp, TrellisApp};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, MigrationsConfig, Profile, ServerConfig,
    TrellisConfig, load_config, load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use migrations::{SqlDirectorySource, SqlExecutor};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the commonly used logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
