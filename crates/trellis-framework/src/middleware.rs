//! Middleware and the chain executor.
//!
//! A middleware wraps everything nested inside it.  It receives the request,
//! the request's [`ServerContext`], a [`Next`] continuation, and the
//! per-route configuration it was attached with.  It either answers on its
//! own, which short-circuits the rest of the chain, or calls
//! [`Next::run`] and returns (possibly adjusting) the result.
//!
//! ```rust,ignore
//! let require_key = middleware_fn(|req, _ctx, next, config| async move {
//!     let expected = config["key"].as_str().unwrap_or_default();
//!     match req.headers().get("x-api-key") {
//!         Some(key) if key == expected => next.run(req).await,
//!         _ => Err(HttpError::unauthorized("missing or invalid API key").into()),
//!     }
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use trellis_core::{HandlerResult, Request};

use crate::context::ServerContext;
use crate::plugin::Plugin;
use crate::router::MiddlewareDefinition;

// ─── Next ─────────────────────────────────────────────────────────────────────

/// The rest of the chain, as a one-shot continuation.
pub struct Next {
    inner: Box<dyn FnOnce(Request) -> BoxFuture<'static, HandlerResult> + Send>,
}

impl Next {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Request) -> BoxFuture<'static, HandlerResult> + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// Invokes the remainder of the chain.
    pub fn run(self, req: Request) -> BoxFuture<'static, HandlerResult> {
        (self.inner)(req)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

// ─── Middleware ───────────────────────────────────────────────────────────────

/// A named request interceptor contributed by a plugin.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        req: Request,
        ctx: Arc<ServerContext>,
        next: Next,
        config: Arc<Value>,
    ) -> HandlerResult;
}

type MiddlewareFn = dyn Fn(Request, Arc<ServerContext>, Next, Arc<Value>) -> BoxFuture<'static, HandlerResult>
    + Send
    + Sync;

/// A [`Middleware`] backed by a closure.  Built with [`middleware_fn`].
pub struct FnMiddleware {
    f: Box<MiddlewareFn>,
}

#[async_trait]
impl Middleware for FnMiddleware {
    async fn handle(
        &self,
        req: Request,
        ctx: Arc<ServerContext>,
        next: Next,
        config: Arc<Value>,
    ) -> HandlerResult {
        (self.f)(req, ctx, next, config).await
    }
}

/// Wraps an async closure as a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> FnMiddleware
where
    F: Fn(Request, Arc<ServerContext>, Next, Arc<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnMiddleware {
        f: Box::new(move |req, ctx, next, config| f(req, ctx, next, config).boxed()),
    }
}

// ─── MiddlewareRegistry ───────────────────────────────────────────────────────

/// Name → middleware implementation, collected from every plugin.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the contributions of `plugins`.  When two plugins contribute
    /// the same name, the one registered first wins.
    pub fn from_plugins<'a, I>(plugins: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Plugin>>,
    {
        let mut registry = Self::new();
        for plugin in plugins {
            let mut contributed: Vec<_> = plugin.middleware().iter().collect();
            contributed.sort_by(|a, b| a.0.cmp(b.0));
            for (name, middleware) in contributed {
                if !registry.register(name.clone(), Arc::clone(middleware)) {
                    warn!(
                        middleware = %name,
                        plugin = %plugin.name(),
                        "Middleware name already taken by an earlier plugin, ignoring"
                    );
                }
            }
        }
        registry
    }

    /// Adds an implementation unless the name is taken.  Returns `false` if
    /// an earlier registration kept the name.
    pub fn register(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) -> bool {
        match self.entries.entry(name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(middleware);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Middleware>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("MiddlewareRegistry").field("names", &names).finish()
    }
}

// ─── Chain executor ───────────────────────────────────────────────────────────

/// Wraps `terminal` in the middleware listed in `stack`.
///
/// The list is folded from last to first, so the first entry ends up
/// outermost.  Names with no registered implementation are skipped with a
/// warning.
pub fn compose(
    stack: &[MiddlewareDefinition],
    registry: &MiddlewareRegistry,
    ctx: &Arc<ServerContext>,
    route: &str,
    terminal: Next,
) -> Next {
    let mut next = terminal;
    for def in stack.iter().rev() {
        let Some(middleware) = registry.get(&def.name) else {
            warn!(
                middleware = %def.name,
                route = %route,
                "Middleware not registered by any plugin, skipping"
            );
            continue;
        };
        let middleware = Arc::clone(middleware);
        let ctx = Arc::clone(ctx);
        let config = Arc::clone(&def.config);
        let inner = next;
        next = Next::new(move |req| {
            async move { middleware.handle(req, ctx, inner, config).await }.boxed()
        });
    }
    next
}
