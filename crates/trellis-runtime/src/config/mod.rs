//! Configuration for the Trellis runtime.
//!
//! Layered loading (defaults, config files, `TRELLIS_*` environment
//! variables) through figment, followed by validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, MigrationsConfig, ServerConfig,
    SpanEventConfig, TrellisConfig,
};
pub use validation::validate_config;
