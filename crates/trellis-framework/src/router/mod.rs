//! Route tree assembly.
//!
//! A [`Router`] is a named node: its prefix, its own routes, its child
//! routers, and a pending middleware stack.  Routes are named with dotted
//! identifiers (`"api.users.get"`) which double as the dispatch key and the
//! public RPC name.
//!
//! ```rust,ignore
//! let mut api = Router::new("api");
//! api.middleware("requestLog", Value::Null);
//! api.route("ping").raw(|_req, _ctx| async { Ok(text_response(StatusCode::OK, "pong")) });
//!
//! let users = api.nest("users");
//! users.middleware("auth", json!({ "role": "admin" }));
//! users.route("list").typed(TypedRoute::new(list_users));
//! // → "api.ping"        [requestLog]
//! // → "api.users.list"  [requestLog, auth]
//! ```
//!
//! Middleware accumulates parent to child: every route inherits the stack its
//! router had when the route was defined, and a nested or merged router gets
//! its parent's stack prepended.

mod route;

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use trellis_core::{HandlerResult, Request};

use crate::context::ServerContext;
use crate::handler::kind;

pub use route::{
    CustomRoute, FormFn, FormRoute, HtmlRoute, IntoRouteDefinition, MiddlewareDefinition, RawFn,
    RouteDefinition, RouteHandler, RouteMetadata, SseRoute, StreamRoute, TypedRoute, ValueFn,
};

// =============================================================================
// Router
// =============================================================================

/// A node of the route tree.
#[derive(Debug, Clone, Default)]
pub struct Router {
    prefix: String,
    routes: Vec<RouteDefinition>,
    children: Vec<Router>,
    middleware: Vec<MiddlewareDefinition>,
}

impl Router {
    /// Creates a router whose routes are named `"<prefix>.<name>"`.  An empty
    /// prefix leaves route names unqualified.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Starts defining the route `name` under this router's prefix.
    pub fn route(&mut self, name: impl Into<String>) -> RouteBuilder<'_> {
        RouteBuilder {
            router: self,
            name: name.into(),
        }
    }

    /// Pushes a middleware onto the pending stack.  Routes defined afterwards
    /// on this router (and routers nested afterwards) inherit it.
    pub fn middleware(&mut self, name: impl Into<String>, config: Value) -> &mut Self {
        self.middleware.push(MiddlewareDefinition::new(name, config));
        self
    }

    /// The pending middleware stack, outermost first.
    pub fn middleware_stack(&self) -> &[MiddlewareDefinition] {
        &self.middleware
    }

    /// Creates a child router named `"<prefix>.<child>"` that starts with
    /// this router's current middleware stack.
    pub fn nest(&mut self, prefix: &str) -> &mut Router {
        let child = Router {
            prefix: self.qualify(prefix),
            routes: Vec::new(),
            children: Vec::new(),
            middleware: self.middleware.clone(),
        };
        let index = self.children.len();
        self.children.push(child);
        &mut self.children[index]
    }

    /// Absorbs an already-built router.
    ///
    /// Every route of `other` (its descendants included) is re-qualified with
    /// this router's prefix and gets this router's current middleware stack
    /// prepended to its own.  The result is a plain list; `other` is consumed.
    pub fn merge(&mut self, other: Router) -> &mut Self {
        for mut route in other.into_routes() {
            route.name = self.qualify(&route.name);
            let mut stack = self.middleware.clone();
            stack.append(&mut route.middleware);
            route.middleware = stack;
            self.insert(route);
        }
        self
    }

    fn insert(&mut self, route: RouteDefinition) {
        match self.routes.iter().position(|r| r.name == route.name) {
            Some(index) => {
                warn!(route = %route.name, "Route redefined, replacing the earlier definition");
                self.routes[index] = route;
            }
            None => self.routes.push(route),
        }
    }

    /// All routes of this router and its descendants, own routes first.
    pub fn routes(&self) -> Vec<&RouteDefinition> {
        let mut out = Vec::new();
        self.collect_routes(&mut out);
        out
    }

    fn collect_routes<'a>(&'a self, out: &mut Vec<&'a RouteDefinition>) {
        out.extend(self.routes.iter());
        for child in &self.children {
            child.collect_routes(out);
        }
    }

    /// Consumes the router, flattening it into its routes.
    pub fn into_routes(self) -> Vec<RouteDefinition> {
        let mut out = self.routes;
        for child in self.children {
            out.extend(child.into_routes());
        }
        out
    }

    /// Serializable descriptions of [`routes`](Self::routes).
    pub fn metadata(&self) -> Vec<RouteMetadata> {
        self.routes().into_iter().map(RouteDefinition::metadata).collect()
    }
}

// =============================================================================
// RouteBuilder
// =============================================================================

/// Defines one route; each method stores it under the qualified name and
/// returns the router for chaining.
pub struct RouteBuilder<'r> {
    router: &'r mut Router,
    name: String,
}

impl<'r> RouteBuilder<'r> {
    fn define(self, mut definition: RouteDefinition) -> &'r mut Router {
        definition.name = self.router.qualify(&self.name);
        definition.middleware = self.router.middleware.clone();
        self.router.insert(definition);
        self.router
    }

    /// Validated input and output.
    pub fn typed(self, route: TypedRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }

    /// Full control over request and response.
    pub fn raw<F, Fut>(self, f: F) -> &'r mut Router
    where
        F: Fn(Request, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: RawFn = Arc::new(move |req: Request, ctx: Arc<ServerContext>| f(req, ctx).boxed());
        self.define(RouteDefinition::unnamed(kind::RAW, RouteHandler::Raw(handler)))
    }

    /// Validated input, handler-built (usually streaming) response.
    pub fn stream(self, route: StreamRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }

    /// Server-sent events over the channels the handler returns.
    pub fn sse(self, route: SseRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }

    /// `multipart/form-data` submission.
    pub fn form_data(self, route: FormRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }

    /// HTML response.
    pub fn html(self, route: HtmlRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }

    /// A plugin-contributed handler kind.
    pub fn custom(self, route: CustomRoute) -> &'r mut Router {
        self.define(route.into_definition())
    }
}
