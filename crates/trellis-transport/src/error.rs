//! Transport error types.

use thiserror::Error;

/// Errors raised while hosting the dispatcher.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on an established listener.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serve task panicked or was aborted.
    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
