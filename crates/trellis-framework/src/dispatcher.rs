//! Request dispatch.
//!
//! The [`Dispatcher`] is the composition root.  At build time it flattens
//! every router into one name-keyed route map, snapshots the initialized
//! [`ServiceRegistry`], and collects the handler-kind, middleware and event
//! schema contributions of every plugin.  Per request it:
//!
//! 1. derives the route name from the path (`/api/todos.list` and
//!    `/api/todos/list` both name `todos.list` under base path `/api`),
//! 2. looks the route up, answering `404` when it is unknown,
//! 3. resolves the route's handler kind, answering `500 HANDLER_NOT_FOUND`
//!    when no implementation exists,
//! 4. checks the method against the kind's policy (`405`),
//! 5. builds a fresh [`ServerContext`],
//! 6. runs the middleware chain around the handler kind,
//! 7. turns an [`HttpError`] into its response; any other error propagates.
//!
//! # Example
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::builder(&manager)
//!     .router(api)
//!     .base_path("/api")
//!     .build();
//!
//! let response = dispatcher.handle(request).await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use serde_json::Value;
use tower::Service;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use trellis_core::{BoxError, CoreServices, HttpError, Request, Response, SchemaRef};

use crate::context::{ServerContext, ServiceRegistry};
use crate::handler::HandlerKindRegistry;
use crate::ip::{HeaderIpExtractor, IpExtractor};
use crate::manager::PluginManager;
use crate::middleware::{MiddlewareRegistry, Next, compose};
use crate::router::{RouteDefinition, RouteMetadata, Router};

/// Trims slashes; `"/api/"` → `"api"`.
fn normalize_base_path(base_path: &str) -> String {
    base_path.trim_matches('/').to_string()
}

// =============================================================================
// DispatcherBuilder
// =============================================================================

/// Collects the routers and collaborators of a [`Dispatcher`].
pub struct DispatcherBuilder<'m> {
    manager: &'m PluginManager,
    routers: Vec<Router>,
    ip_extractor: Arc<dyn IpExtractor>,
    base_path: String,
}

impl<'m> DispatcherBuilder<'m> {
    /// Adds a router.  Routers are absorbed in the order they are added.
    pub fn router(mut self, router: Router) -> Self {
        self.routers.push(router);
        self
    }

    pub fn routers(mut self, routers: impl IntoIterator<Item = Router>) -> Self {
        self.routers.extend(routers);
        self
    }

    /// Replaces the default [`HeaderIpExtractor`] (proxies untrusted).
    pub fn ip_extractor(mut self, extractor: impl IpExtractor + 'static) -> Self {
        self.ip_extractor = Arc::new(extractor);
        self
    }

    /// Path prefix stripped before route lookup, e.g. `"/api"`.
    pub fn base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn build(self) -> Dispatcher {
        if !self.manager.is_initialized() {
            warn!("Building a dispatcher before plugins are initialized, no services will be visible");
        }

        let mut routes: HashMap<String, Arc<RouteDefinition>> = HashMap::new();
        for route in self.routers.into_iter().flat_map(Router::into_routes) {
            let name = route.name().to_string();
            if routes.insert(name.clone(), Arc::new(route)).is_some() {
                warn!(route = %name, "Route defined by more than one router, last definition wins");
            }
        }

        let dispatcher = Dispatcher {
            routes,
            services: Arc::new(self.manager.services().clone()),
            core: Arc::clone(self.manager.core()),
            events: Arc::new(self.manager.event_schemas()),
            kinds: HandlerKindRegistry::from_plugins(self.manager.plugins()),
            middleware: MiddlewareRegistry::from_plugins(self.manager.plugins()),
            ip_extractor: self.ip_extractor,
            base_path: self.base_path,
        };
        info!(
            routes = dispatcher.routes.len(),
            handler_kinds = ?dispatcher.kinds.names(),
            middleware = dispatcher.middleware.len(),
            events = dispatcher.events.len(),
            base_path = %dispatcher.base_path,
            "Dispatcher ready"
        );
        dispatcher
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes requests to handler kinds through their middleware chains.
///
/// Read-only once built; share it behind an `Arc` or turn it into a
/// [`DispatchService`].
pub struct Dispatcher {
    routes: HashMap<String, Arc<RouteDefinition>>,
    services: Arc<ServiceRegistry>,
    core: Arc<CoreServices>,
    events: Arc<BTreeMap<String, SchemaRef>>,
    kinds: HandlerKindRegistry,
    middleware: MiddlewareRegistry,
    ip_extractor: Arc<dyn IpExtractor>,
    base_path: String,
}

impl Dispatcher {
    pub fn builder(manager: &PluginManager) -> DispatcherBuilder<'_> {
        DispatcherBuilder {
            manager,
            routers: Vec::new(),
            ip_extractor: Arc::new(HeaderIpExtractor::new(false)),
            base_path: String::new(),
        }
    }

    /// The route name a request path addresses, or `None` when the path lies
    /// outside the base path.
    pub fn route_name(&self, path: &str) -> Option<String> {
        let path = path.trim_matches('/');
        let rest = if self.base_path.is_empty() {
            path
        } else {
            let rest = path.strip_prefix(self.base_path.as_str())?;
            if !rest.is_empty() && !rest.starts_with('/') {
                return None;
            }
            rest.trim_start_matches('/')
        };
        Some(rest.replace('/', "."))
    }

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Errors other than [`HttpError`] raised by middleware or handlers.
    pub async fn handle(&self, req: Request) -> Result<Response, BoxError> {
        let path = req.uri().path().to_string();
        let Some(route) = self
            .route_name(&path)
            .and_then(|name| self.routes.get(&name))
            .map(Arc::clone)
        else {
            debug!(path = %path, "No route for path");
            return Ok(HttpError::not_found(format!("no route for '{path}'")).to_response());
        };

        let Some(kind) = self.kinds.get(route.kind()).map(Arc::clone) else {
            error!(
                route = %route.name(),
                handler_kind = %route.kind(),
                available = ?self.kinds.names(),
                "Route uses a handler kind no plugin provides"
            );
            return Ok(HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "HANDLER_NOT_FOUND",
                format!("route '{}' is misconfigured", route.name()),
            )
            .to_response());
        };

        if !kind.accepts(req.method()) {
            return Ok(HttpError::method_not_allowed(format!(
                "route '{}' does not accept {}",
                route.name(),
                req.method()
            ))
            .to_response());
        }

        let ip = self.ip_extractor.extract(&req);
        let ctx = Arc::new(
            ServerContext::new(Arc::clone(&self.services), Arc::clone(&self.core), ip)
                .with_event_schemas(Arc::clone(&self.events)),
        );
        let span = debug_span!("dispatch", route = %route.name(), request_id = %ctx.request_id());

        let terminal = {
            let route = Arc::clone(&route);
            let ctx = Arc::clone(&ctx);
            Next::new(move |req| async move { kind.handle(req, route, ctx).await }.boxed())
        };
        let chain = if route.middleware().is_empty() {
            terminal
        } else {
            compose(route.middleware(), &self.middleware, &ctx, route.name(), terminal)
        };

        match chain.run(req).instrument(span).await {
            Ok(response) => Ok(response),
            Err(err) => match err.downcast::<HttpError>() {
                Ok(http_error) => {
                    debug!(
                        route = %route.name(),
                        status = %http_error.status(),
                        code = %http_error.code(),
                        "Request answered with an error"
                    );
                    Ok(http_error.to_response())
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Descriptions of every route, sorted by name.
    pub fn metadata(&self) -> Vec<RouteMetadata> {
        let mut routes: Vec<_> = self.routes.values().collect();
        routes.sort_by(|a, b| a.name().cmp(b.name()));
        routes.into_iter().map(|route| route.metadata()).collect()
    }

    /// Descriptions of the events plugins declare, keyed by event name.
    ///
    /// When two plugins declare the same event the first registered wins.
    pub fn event_schemas(&self) -> BTreeMap<String, Value> {
        self.events
            .iter()
            .map(|(name, schema)| (name.clone(), schema.describe()))
            .collect()
    }

    /// Route names, sorted.
    pub fn route_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn into_service(self) -> DispatchService {
        DispatchService::new(Arc::new(self))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.route_names())
            .field("kinds", &self.kinds)
            .field("middleware", &self.middleware)
            .field("base_path", &self.base_path)
            .finish()
    }
}

// =============================================================================
// DispatchService
// =============================================================================

/// [`Dispatcher`] as a cloneable `tower::Service`.
///
/// ```rust,ignore
/// use tower::ServiceExt;
///
/// let response = dispatcher.into_service().oneshot(request).await?;
/// ```
#[derive(Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Service<Request> for DispatchService {
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Response, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);
        async move { dispatcher.handle(req).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use http::Method;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use trellis_core::{Bytes, FnSchema, HandlerResult, SchemaError, text_response};

    use crate::handler::HandlerKind;
    use crate::middleware::middleware_fn;
    use crate::plugin::Plugin;
    use crate::router::{CustomRoute, TypedRoute};

    fn post(path: &str) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    async fn initialized(plugins: Vec<Plugin>) -> PluginManager {
        let mut manager = PluginManager::new(Arc::new(CoreServices::new()));
        for plugin in plugins {
            manager.register(plugin).unwrap();
        }
        manager.init().await.unwrap();
        manager
    }

    fn ping_router() -> Router {
        let mut api = Router::new("api");
        api.route("ping")
            .raw(|_req, _ctx| async { Ok(text_response(StatusCode::OK, "pong")) });
        api
    }

    #[tokio::test]
    async fn test_exposes_plugin_event_schemas() {
        let described = |tag: &str| -> SchemaRef {
            let schema = FnSchema::new(Ok::<Value, SchemaError>).described(json!({"title": tag}));
            Arc::new(schema)
        };
        let manager = initialized(vec![
            Plugin::builder("todos")
                .event("todo.created", described("Todo"))
                .build(),
            Plugin::builder("mirror")
                .event("todo.created", described("Mirror"))
                .build(),
        ])
        .await;
        let dispatcher = Dispatcher::builder(&manager).build();

        assert_eq!(
            dispatcher.event_schemas(),
            BTreeMap::from([("todo.created".to_string(), json!({"title": "Todo"}))])
        );
    }

    #[tokio::test]
    async fn test_dispatches_by_path() {
        let manager = initialized(vec![]).await;
        let dispatcher = Dispatcher::builder(&manager).router(ping_router()).build();

        for path in ["/api.ping", "/api/ping", "api.ping/"] {
            let response = dispatcher.handle(post(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            assert_eq!(body_text(response).await, "pong");
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let manager = initialized(vec![]).await;
        let dispatcher = Dispatcher::builder(&manager).router(ping_router()).build();

        let response = dispatcher.handle(post("/api.other")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_handler_kind_is_misconfigured() {
        let manager = initialized(vec![]).await;
        let mut router = Router::default();
        router.route("report").custom(CustomRoute::new("pdf", ()));
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let response = dispatcher.handle(post("/report")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "HANDLER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_plugin_handler_kind() {
        struct Greeting(&'static str);
        struct GreetingKind;

        #[async_trait]
        impl HandlerKind for GreetingKind {
            async fn handle(
                &self,
                _req: Request,
                route: Arc<RouteDefinition>,
                _ctx: Arc<ServerContext>,
            ) -> HandlerResult {
                let greeting = route
                    .custom_handler::<Greeting>()
                    .ok_or_else(|| HttpError::internal("payload missing"))?;
                Ok(text_response(StatusCode::OK, greeting.0))
            }
        }

        let manager =
            initialized(vec![Plugin::builder("greet").handler_kind("greeting", GreetingKind).build()])
                .await;
        let mut router = Router::default();
        router.route("hello").custom(CustomRoute::new("greeting", Greeting("hi")));
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let response = dispatcher.handle(post("/hello")).await.unwrap();
        assert_eq!(body_text(response).await, "hi");
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let manager = initialized(vec![]).await;
        let dispatcher = Dispatcher::builder(&manager).router(ping_router()).build();

        let req = http::Request::builder()
            .method(Method::GET)
            .uri("/api.ping")
            .body(Bytes::new())
            .unwrap();
        let response = dispatcher.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_route_name_from_path() {
        let manager = tokio_test::block_on(initialized(vec![]));
        let dispatcher = Dispatcher::builder(&manager).build();
        assert_eq!(dispatcher.route_name("/todos/list").as_deref(), Some("todos.list"));
        assert_eq!(dispatcher.route_name("/").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_base_path_is_stripped() {
        let manager = initialized(vec![]).await;
        let dispatcher = Dispatcher::builder(&manager)
            .router(ping_router())
            .base_path("/rpc/")
            .build();

        assert_eq!(dispatcher.route_name("/rpc/api.ping").as_deref(), Some("api.ping"));
        assert_eq!(dispatcher.route_name("/rpcx/api.ping"), None);
        let response = dispatcher.handle(post("/rpc/api.ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = dispatcher.handle(post("/api.ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transparent_middleware() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let manager = initialized(vec![
            Plugin::builder("observe")
                .middleware(
                    "count",
                    middleware_fn(move |req, _ctx, next, _config| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        next.run(req)
                    }),
                )
                .build(),
        ])
        .await;
        let mut api = Router::new("api");
        api.middleware("count", Value::Null);
        api.route("ping")
            .raw(|_req, _ctx| async { Ok(text_response(StatusCode::OK, "pong")) });
        let dispatcher = Dispatcher::builder(&manager).router(api).build();

        let response = dispatcher.handle(post("/api.ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "pong");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_chain() {
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let inner_calls = Arc::new(AtomicUsize::new(0));
        let inner_seen = Arc::clone(&inner_calls);
        let manager = initialized(vec![
            Plugin::builder("guard")
                .middleware(
                    "deny",
                    middleware_fn(|_req, _ctx, _next, _config| async {
                        Err(HttpError::forbidden("denied").into())
                    }),
                )
                .middleware(
                    "inner",
                    middleware_fn(move |req, _ctx, next, _config| {
                        inner_seen.fetch_add(1, Ordering::SeqCst);
                        next.run(req)
                    }),
                )
                .build(),
        ])
        .await;

        let calls = Arc::clone(&handler_calls);
        let mut api = Router::new("api");
        api.middleware("deny", Value::Null).middleware("inner", Value::Null);
        api.route("secret").raw(move |_req, _ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(text_response(StatusCode::OK, "secret")) }
        });
        let dispatcher = Dispatcher::builder(&manager).router(api).build();

        let response = dispatcher.handle(post("/api.secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 0);
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_http_error_from_handler() {
        let manager = initialized(vec![]).await;
        let mut router = Router::new("todos");
        router.route("get").typed(TypedRoute::new(|_input: Value, _ctx| async {
            Err::<Value, BoxError>(
                HttpError::not_found("todo 7 does not exist")
                    .with_details(json!({"id": 7}))
                    .into(),
            )
        }));
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let response = dispatcher.handle(post("/todos.get")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({"error": "NOT_FOUND", "message": "todo 7 does not exist", "details": {"id": 7}})
        );
    }

    #[tokio::test]
    async fn test_registered_custom_error() {
        let manager = initialized(vec![
            Plugin::builder("billing")
                .custom_error(
                    "QuotaExceeded",
                    trellis_core::ErrorDefinition::new(402, "QUOTA_EXCEEDED", "Quota exceeded"),
                )
                .build(),
        ])
        .await;
        let mut router = Router::default();
        router.route("charge").raw(|_req, ctx| async move {
            Err(ctx.error("QuotaExceeded", None).into())
        });
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let response = dispatcher.handle(post("/charge")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body_json(response).await["error"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let manager = initialized(vec![]).await;
        let mut router = Router::default();
        router.route("boom").raw(|_req, _ctx| async {
            Err(std::io::Error::other("disk on fire").into())
        });
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let err = dispatcher.handle(post("/boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[tokio::test]
    async fn test_services_and_request_context_reach_handlers() {
        struct Greeter {
            name: String,
        }

        let ids = Arc::new(Mutex::new(Vec::new()));
        let manager = initialized(vec![
            Plugin::builder("greeter")
                .service(|_ctx| async { Ok(Greeter { name: "trellis".into() }) })
                .build(),
        ])
        .await;
        let seen = Arc::clone(&ids);
        let mut router = Router::default();
        router.route("greet").raw(move |_req, ctx| {
            seen.lock().push(ctx.request_id());
            async move {
                let greeter = ctx
                    .service::<Greeter>("greeter")
                    .ok_or_else(|| HttpError::internal("greeter missing"))?;
                Ok(text_response(StatusCode::OK, format!("{} from {}", greeter.name, ctx.ip())))
            }
        });
        let dispatcher = Dispatcher::builder(&manager).router(router).build();

        let response = dispatcher.handle(post("/greet")).await.unwrap();
        assert_eq!(body_text(response).await, "trellis from unknown");
        dispatcher.handle(post("/greet")).await.unwrap();
        let ids = ids.lock();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_duplicate_routes_last_wins() {
        let manager = initialized(vec![]).await;
        let mut second = Router::new("api");
        second
            .route("ping")
            .raw(|_req, _ctx| async { Ok(text_response(StatusCode::OK, "second")) });
        let dispatcher = Dispatcher::builder(&manager)
            .router(ping_router())
            .router(second)
            .build();

        assert_eq!(dispatcher.route_names(), ["api.ping"]);
        let response = dispatcher.handle(post("/api.ping")).await.unwrap();
        assert_eq!(body_text(response).await, "second");
    }

    #[tokio::test]
    async fn test_tower_service() {
        let manager = initialized(vec![]).await;
        let service = Dispatcher::builder(&manager).router(ping_router()).build().into_service();

        let response = service.clone().oneshot(post("/api.ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(service.dispatcher().metadata()[0].name, "api.ping");
    }
}
