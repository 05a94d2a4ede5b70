//! # Trellis Transport
//!
//! Hosts a [`Dispatcher`](trellis_framework::Dispatcher) on a network
//! listener.  Only the HTTP host exists today.
//!
//! ## Features
//!
//! - `http-server`: axum-based HTTP host ([`http::HttpServer`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis_transport::http::HttpServer;
//!
//! let handle = HttpServer::new(Arc::new(dispatcher))
//!     .max_body_bytes(1 << 20)
//!     .bind("0.0.0.0:3000")
//!     .await?;
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown();
//! handle.stopped().await?;
//! ```

pub mod error;

#[cfg(feature = "http-server")]
pub mod http;

pub use error::{TransportError, TransportResult};

#[cfg(feature = "http-server")]
pub use http::{HttpServer, ServerHandle};
