//! Route definitions and the per-kind route declarations that produce them.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::{BoxError, HandlerResult, HttpError, Request, Response, SchemaRef};

use crate::context::ServerContext;
use crate::handler::form::FormInput;
use crate::handler::kind;

// =============================================================================
// Handler function shapes
// =============================================================================

/// A handler taking the validated JSON input.
pub type ValueFn<T> =
    Arc<dyn Fn(Value, Arc<ServerContext>) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// A handler taking the raw request.
pub type RawFn = Arc<dyn Fn(Request, Arc<ServerContext>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A handler taking a parsed multipart submission.
pub type FormFn =
    Arc<dyn Fn(FormInput, Arc<ServerContext>) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Erases a handler over a deserializable input type.
///
/// An input that does not deserialize into `I` is answered with `400`.
fn value_fn<I, T, F, Fut>(f: F) -> ValueFn<T>
where
    I: DeserializeOwned + Send + 'static,
    T: Send + 'static,
    F: Fn(I, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    Arc::new(move |value: Value, ctx: Arc<ServerContext>| {
        match serde_json::from_value::<I>(value) {
            Ok(input) => f(input, ctx).boxed(),
            Err(err) => {
                let err: BoxError = HttpError::bad_request(format!("invalid input: {err}")).into();
                future::ready(Err::<T, BoxError>(err)).boxed()
            }
        }
    })
}

fn serialize_output<O: Serialize>(output: O) -> Result<Value, BoxError> {
    serde_json::to_value(output).map_err(BoxError::from)
}

/// The function behind a route, shaped by its handler kind.
#[derive(Clone)]
pub enum RouteHandler {
    Typed(ValueFn<Value>),
    Raw(RawFn),
    Stream(ValueFn<Response>),
    /// Returns the channel names to subscribe the client to.
    Sse(ValueFn<Vec<String>>),
    FormData(FormFn),
    Html(ValueFn<String>),
    /// Opaque payload interpreted by a plugin-contributed handler kind.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Typed(_) => "Typed",
            Self::Raw(_) => "Raw",
            Self::Stream(_) => "Stream",
            Self::Sse(_) => "Sse",
            Self::FormData(_) => "FormData",
            Self::Html(_) => "Html",
            Self::Custom(_) => "Custom",
        };
        write!(f, "RouteHandler::{variant}(..)")
    }
}

// =============================================================================
// MiddlewareDefinition / RouteDefinition
// =============================================================================

/// A middleware attached to a route: its name plus per-route configuration.
#[derive(Debug, Clone)]
pub struct MiddlewareDefinition {
    pub name: String,
    pub config: Arc<Value>,
}

impl MiddlewareDefinition {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
        }
    }
}

/// One named route.
#[derive(Clone)]
pub struct RouteDefinition {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) handler: RouteHandler,
    pub(crate) input: Option<SchemaRef>,
    pub(crate) output: Option<SchemaRef>,
    pub(crate) files: Option<SchemaRef>,
    pub(crate) events: BTreeMap<String, SchemaRef>,
    pub(crate) middleware: Vec<MiddlewareDefinition>,
}

impl RouteDefinition {
    pub(crate) fn unnamed(kind: &str, handler: RouteHandler) -> Self {
        Self {
            name: String::new(),
            kind: kind.to_string(),
            handler,
            input: None,
            output: None,
            files: None,
            events: BTreeMap::new(),
            middleware: Vec::new(),
        }
    }

    /// Fully-qualified dotted name, e.g. `"api.users.get"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler-kind tag, e.g. `"typed"`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    /// Input schema (the fields schema for `formData` routes).
    pub fn input(&self) -> Option<&SchemaRef> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&SchemaRef> {
        self.output.as_ref()
    }

    /// Files schema of a `formData` route.
    pub fn files(&self) -> Option<&SchemaRef> {
        self.files.as_ref()
    }

    /// Event schemas of an `sse` route.
    pub fn events(&self) -> &BTreeMap<String, SchemaRef> {
        &self.events
    }

    /// Middleware stack, outermost first.
    pub fn middleware(&self) -> &[MiddlewareDefinition] {
        &self.middleware
    }

    /// Downcasts the payload of a custom-kind route.
    pub fn custom_handler<T: Any + Send + Sync>(&self) -> Option<&T> {
        match &self.handler {
            RouteHandler::Custom(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Serializable description used by client generators.
    pub fn metadata(&self) -> RouteMetadata {
        RouteMetadata {
            name: self.name.clone(),
            handler: self.kind.clone(),
            input: self.input.as_ref().map(|s| s.describe()),
            output: self.output.as_ref().map(|s| s.describe()),
            files: self.files.as_ref().map(|s| s.describe()),
            events: self
                .events
                .iter()
                .map(|(name, schema)| (name.clone(), schema.describe()))
                .collect(),
            middleware: self.middleware.iter().map(|m| m.name.clone()).collect(),
        }
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("handler", &self.handler)
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("middleware", &self.middleware)
            .finish()
    }
}

/// Public description of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMetadata {
    pub name: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, Value>,
    #[serde(default)]
    pub middleware: Vec<String>,
}

// =============================================================================
// Per-kind declarations
// =============================================================================

/// A validated request/response route.
///
/// ```rust,ignore
/// router.route("get").typed(
///     TypedRoute::new(|input: GetTodo, ctx| async move { store(&ctx)?.get(input.id) })
///         .input(get_todo_schema())
///         .output(todo_schema()),
/// );
/// ```
pub struct TypedRoute {
    definition: RouteDefinition,
}

impl TypedRoute {
    pub fn new<I, O, F, Fut>(f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
    {
        let handler = value_fn(move |input: I, ctx| {
            let fut = f(input, ctx);
            async move { serialize_output(fut.await?) }
        });
        Self {
            definition: RouteDefinition::unnamed(kind::TYPED, RouteHandler::Typed(handler)),
        }
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }

    pub fn output(mut self, schema: SchemaRef) -> Self {
        self.definition.output = Some(schema);
        self
    }
}

/// A route with validated input and a handler-built response, typically a
/// streaming [`Body`](trellis_core::Body).
pub struct StreamRoute {
    definition: RouteDefinition,
}

impl StreamRoute {
    pub fn new<I, F, Fut>(f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            definition: RouteDefinition::unnamed(kind::STREAM, RouteHandler::Stream(value_fn(f))),
        }
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }
}

/// A server-sent-events route.  The handler returns the channels to
/// subscribe the client to.
pub struct SseRoute {
    definition: RouteDefinition,
}

impl SseRoute {
    pub fn new<I, F, Fut>(f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>, BoxError>> + Send + 'static,
    {
        Self {
            definition: RouteDefinition::unnamed(kind::SSE, RouteHandler::Sse(value_fn(f))),
        }
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }

    /// Declares an event; events with a schema are validated before they are
    /// sent.
    pub fn event(mut self, name: impl Into<String>, schema: SchemaRef) -> Self {
        self.definition.events.insert(name.into(), schema);
        self
    }
}

/// A `multipart/form-data` submission route.
pub struct FormRoute {
    definition: RouteDefinition,
}

impl FormRoute {
    pub fn new<O, F, Fut>(f: F) -> Self
    where
        O: Serialize + Send + 'static,
        F: Fn(FormInput, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
    {
        let handler: FormFn = Arc::new(move |form: FormInput, ctx: Arc<ServerContext>| {
            let fut = f(form, ctx);
            async move { serialize_output(fut.await?) }.boxed()
        });
        Self {
            definition: RouteDefinition::unnamed(kind::FORM_DATA, RouteHandler::FormData(handler)),
        }
    }

    /// Schema of the text fields, seen as one JSON object.
    pub fn fields(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }

    /// Schema of the uploaded-file descriptions, seen as a JSON array.
    pub fn files(mut self, schema: SchemaRef) -> Self {
        self.definition.files = Some(schema);
        self
    }

    pub fn output(mut self, schema: SchemaRef) -> Self {
        self.definition.output = Some(schema);
        self
    }
}

/// A route answering with an HTML document.
pub struct HtmlRoute {
    definition: RouteDefinition,
}

impl HtmlRoute {
    pub fn new<I, F, Fut>(f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, Arc<ServerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, BoxError>> + Send + 'static,
    {
        Self {
            definition: RouteDefinition::unnamed(kind::HTML, RouteHandler::Html(value_fn(f))),
        }
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }
}

/// A route handled by a plugin-contributed handler kind.
pub struct CustomRoute {
    definition: RouteDefinition,
}

impl CustomRoute {
    /// `payload` is handed to the handler kind registered under `kind`,
    /// which recovers it with [`RouteDefinition::custom_handler`].
    pub fn new<T: Any + Send + Sync>(kind: impl Into<String>, payload: T) -> Self {
        let mut definition = RouteDefinition::unnamed("", RouteHandler::Custom(Arc::new(payload)));
        definition.kind = kind.into();
        Self { definition }
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.definition.input = Some(schema);
        self
    }

    pub fn output(mut self, schema: SchemaRef) -> Self {
        self.definition.output = Some(schema);
        self
    }
}

/// Anything that declares a route.
pub trait IntoRouteDefinition {
    fn into_definition(self) -> RouteDefinition;
}

macro_rules! impl_into_definition {
    ($($route:ty),* $(,)?) => {
        $(
            impl IntoRouteDefinition for $route {
                fn into_definition(self) -> RouteDefinition {
                    self.definition
                }
            }
        )*
    };
}

impl_into_definition!(TypedRoute, StreamRoute, SseRoute, FormRoute, HtmlRoute, CustomRoute);
