//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use trellis_framework::PluginError;
use trellis_transport::TransportError;

/// Errors that can occur while starting or running an application.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plugin registration, migration, or initialization failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// The HTTP host failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
