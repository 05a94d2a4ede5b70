//! # Trellis
//!
//! A plugin-based web application framework for Rust.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌──────────────────────────────┐
//! │  HttpServer │────▶│ Dispatcher │────▶│ middleware ─▶ handler kind   │──▶ plugin services
//! │   (axum)    │     │            │     │  (typed, stream, sse, ...)   │
//! └─────────────┘     └────────────┘     └──────────────────────────────┘
//! ```
//!
//! - **Plugins**: Named units with dependencies, a service, handler kinds,
//!   middleware, events, custom errors and migrations
//! - **PluginManager**: Resolves dependency order, migrates, initializes services
//! - **Routers**: Dot-separated route trees with per-route handler kinds
//! - **Dispatcher**: Maps a request to a route and runs its middleware chain
//! - **TrellisApp**: Loads configuration, sets up logging and serves
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut api = Router::new("api");
//!     api.route("ping").typed(TypedRoute::new(|_: (), _ctx| async { Ok("pong") }));
//!
//!     TrellisApp::new().router(api).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `http-server` (default): axum-based HTTP host

pub use trellis_core as core;
pub use trellis_framework as framework;
pub use trellis_runtime as runtime;
pub use trellis_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Application entry point
    pub use trellis_runtime::{SqlExecutor, TrellisApp};

    // Plugin system
    pub use trellis_framework::{
        Migration, MigrationPolicy, Plugin, PluginContext, PluginError, PluginManager,
    };

    // Routing and handlers
    pub use trellis_framework::{
        CustomRoute, FormInput, FormRoute, HandlerKind, HtmlRoute, Router, ServerContext,
        SseRoute, StreamRoute, TypedRoute, UploadedFile,
    };
    pub use trellis_framework::{Middleware, Next, middleware_fn};

    // Core types
    pub use trellis_core::{
        Body, BoxError, Broadcaster, Bytes, CoreServices, Database, ErrorDefinition, HttpError,
        Request, Response, SchemaRef, SseEvent, html_response, json_response, schema_fn,
        text_response,
    };
}
