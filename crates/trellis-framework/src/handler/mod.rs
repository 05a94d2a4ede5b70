//! Handler kinds.
//!
//! A handler kind is the strategy that turns a request into a call of a
//! route's declared function and turns the result into a response.  The
//! built-in kinds are listed in [`kind`]; plugins contribute more through
//! [`PluginBuilder::handler_kind`](crate::plugin::PluginBuilder::handler_kind).
//!
//! | Kind       | Methods     | Input                   | Response                    |
//! |------------|-------------|-------------------------|-----------------------------|
//! | `typed`    | POST        | JSON body, validated    | JSON, output validated      |
//! | `raw`      | POST        | the request itself      | whatever the handler builds |
//! | `stream`   | POST, GET   | JSON body or `?input=`  | whatever the handler builds |
//! | `sse`      | POST, GET   | JSON body or `?input=`  | `text/event-stream`         |
//! | `formData` | POST        | `multipart/form-data`   | JSON, output validated      |
//! | `html`     | POST, GET   | JSON body or `?input=`  | `text/html`                 |

mod builtin;
pub mod form;
pub mod input;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use tracing::warn;

use trellis_core::{HandlerResult, Request};

use crate::context::ServerContext;
use crate::plugin::Plugin;
use crate::router::RouteDefinition;

pub use builtin::{FormDataKind, HtmlKind, RawKind, SseKind, StreamKind, TypedKind};

/// Names of the built-in handler kinds.
pub mod kind {
    pub const TYPED: &str = "typed";
    pub const RAW: &str = "raw";
    pub const STREAM: &str = "stream";
    pub const SSE: &str = "sse";
    pub const FORM_DATA: &str = "formData";
    pub const HTML: &str = "html";
}

/// A strategy for invoking a route.
#[async_trait]
pub trait HandlerKind: Send + Sync {
    /// Invokes `route` for `req`.
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult;

    /// Whether requests with `method` may reach this kind.  Defaults to
    /// `POST` only.
    fn accepts(&self, method: &Method) -> bool {
        *method == Method::POST
    }
}

/// Name → handler kind.  Built-ins first, then plugin contributions.
#[derive(Clone)]
pub struct HandlerKindRegistry {
    kinds: HashMap<String, Arc<dyn HandlerKind>>,
}

impl HandlerKindRegistry {
    /// A registry holding only the built-in kinds.
    pub fn builtin() -> Self {
        let builtins: [(&str, Arc<dyn HandlerKind>); 6] = [
            (kind::TYPED, Arc::new(TypedKind)),
            (kind::RAW, Arc::new(RawKind)),
            (kind::STREAM, Arc::new(StreamKind)),
            (kind::SSE, Arc::new(SseKind)),
            (kind::FORM_DATA, Arc::new(FormDataKind)),
            (kind::HTML, Arc::new(HtmlKind)),
        ];
        Self {
            kinds: builtins
                .into_iter()
                .map(|(name, kind)| (name.to_string(), kind))
                .collect(),
        }
    }

    /// The built-in kinds plus every plugin contribution.  A built-in name
    /// cannot be overridden; between plugins the first registration wins.
    pub fn from_plugins<'a, I>(plugins: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Plugin>>,
    {
        let mut registry = Self::builtin();
        for plugin in plugins {
            let mut contributed: Vec<_> = plugin.handlers().iter().collect();
            contributed.sort_by(|a, b| a.0.cmp(b.0));
            for (name, kind) in contributed {
                if !registry.register(name.clone(), Arc::clone(kind)) {
                    warn!(
                        handler_kind = %name,
                        plugin = %plugin.name(),
                        "Handler kind already provided, ignoring plugin contribution"
                    );
                }
            }
        }
        registry
    }

    /// Adds a kind unless the name is taken.
    pub fn register(&mut self, name: impl Into<String>, kind: Arc<dyn HandlerKind>) -> bool {
        let name = name.into();
        if self.kinds.contains_key(&name) {
            return false;
        }
        self.kinds.insert(name, kind);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn HandlerKind>> {
        self.kinds.get(name)
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerKindRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for HandlerKindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerKindRegistry")
            .field("kinds", &self.names())
            .finish()
    }
}
