//! # Trellis Framework
//!
//! Plugin composition and request dispatch.
//!
//! This layer provides:
//! - Plugin declarations and the [`PluginManager`] that orders, migrates, and
//!   constructs them
//! - [`Router`] trees of dotted, handler-kind-tagged routes
//! - Named handler kinds and middleware, contributed by plugins
//! - The [`Dispatcher`] that serves requests through middleware chains, also
//!   usable as a `tower::Service`
//!
//! Startup runs `register → migrate → init`, then the dispatcher is built from
//! the manager and the routers:
//!
//! ```rust,ignore
//! let mut manager = PluginManager::new(Arc::new(core));
//! manager.register(todos_plugin())?;
//! manager.migrate().await?;
//! manager.init().await?;
//!
//! let dispatcher = Dispatcher::builder(&manager).router(todos_router()).build();
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod ip;
pub mod manager;
pub mod middleware;
pub mod plugin;
pub mod resolver;
pub mod router;

pub use context::{PluginContext, ServerContext, ServiceArc, ServiceRegistry};
pub use dispatcher::{DispatchService, Dispatcher, DispatcherBuilder};
pub use error::{PluginError, PluginResult};
pub use handler::form::{FormInput, UploadedFile};
pub use handler::{HandlerKind, HandlerKindRegistry, kind};
pub use ip::{HeaderIpExtractor, IpExtractor};
pub use manager::PluginManager;
pub use middleware::{FnMiddleware, Middleware, MiddlewareRegistry, Next, compose, middleware_fn};
pub use plugin::{
    AppliedMigration, ConfiguredPlugin, FailedMigration, Migration, MigrationPolicy,
    MigrationReport, MigrationSource, Plugin, PluginBuilder, ServiceFactory,
};
pub use resolver::{DependencyNode, resolve_order};
pub use router::{
    CustomRoute, FormRoute, HtmlRoute, IntoRouteDefinition, MiddlewareDefinition, RouteBuilder,
    RouteDefinition, RouteHandler, RouteMetadata, Router, SseRoute, StreamRoute, TypedRoute,
};
