//! The built-in handler kinds.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, future};
use http::{Method, StatusCode, header};
use tracing::{debug, warn};

use trellis_core::{
    Body, BoxError, Broadcaster, HandlerResult, HttpError, Request, SseEvent, html_response,
    json_response,
};

use super::HandlerKind;
use super::form;
use super::input::{read_input, validate_input, validate_output, validation_error};
use crate::context::ServerContext;
use crate::router::{RouteDefinition, RouteHandler};

fn accepts_get_and_post(method: &Method) -> bool {
    *method == Method::POST || *method == Method::GET
}

/// The route's kind tag and its handler shape disagree.  Only possible when a
/// custom route is tagged with a built-in kind name.
fn shape_mismatch(route: &RouteDefinition) -> BoxError {
    HttpError::internal(format!(
        "route '{}' is tagged '{}' but carries a {:?}",
        route.name(),
        route.kind(),
        route.handler()
    ))
    .into()
}

// ─── typed ────────────────────────────────────────────────────────────────────

/// JSON in, JSON out, both validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedKind;

#[async_trait]
impl HandlerKind for TypedKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::Typed(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        let input = read_input(&req, &route)?;
        let output = handler(input, ctx).await?;
        let output = validate_output(&route, output)?;
        Ok(json_response(StatusCode::OK, &output))
    }
}

// ─── raw ──────────────────────────────────────────────────────────────────────

/// Hands the request straight to the route function.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawKind;

#[async_trait]
impl HandlerKind for RawKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::Raw(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        handler(req, ctx).await
    }
}

// ─── stream ───────────────────────────────────────────────────────────────────

/// Validated input, response built by the route function.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamKind;

#[async_trait]
impl HandlerKind for StreamKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::Stream(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        let input = read_input(&req, &route)?;
        handler(input, ctx).await
    }

    fn accepts(&self, method: &Method) -> bool {
        accepts_get_and_post(method)
    }
}

// ─── sse ──────────────────────────────────────────────────────────────────────

/// Subscribes the client to the channels the route function returns and
/// streams the broadcaster's events as `text/event-stream` frames.
///
/// Event data is checked against the route's event schema, or else the schema
/// a plugin declared for that event; invalid events are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SseKind;

#[async_trait]
impl HandlerKind for SseKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::Sse(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        let broadcaster = ctx.core().get::<dyn Broadcaster>().ok_or_else(|| {
            HttpError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SSE_UNAVAILABLE",
                "server-sent events are not available",
            )
        })?;

        let input = read_input(&req, &route)?;
        let channels = handler(input, Arc::clone(&ctx)).await?;
        let client_id = ctx.request_id().to_string();
        debug!(route = %route.name(), client_id = %client_id, channels = ?channels, "SSE client subscribed");

        let events = broadcaster.subscribe(&client_id, &channels);
        let schemas = Arc::clone(&route);
        let frames = events.filter_map(move |event| {
            // route declarations take precedence over plugin-wide ones
            let schema = schemas
                .events()
                .get(&event.event)
                .or_else(|| ctx.event_schema(&event.event));
            let event = match schema {
                Some(schema) => match schema.parse(event.data.clone()) {
                    Ok(data) => Some(SseEvent { data, ..event }),
                    Err(err) => {
                        warn!(
                            route = %schemas.name(),
                            event = %event.event,
                            error = %err,
                            "Dropping SSE event that failed validation"
                        );
                        None
                    }
                },
                None => Some(event),
            };
            future::ready(event.map(|e| Ok::<Bytes, BoxError>(e.to_frame())))
        });

        let response = http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(frames))?;
        Ok(response)
    }

    fn accepts(&self, method: &Method) -> bool {
        accepts_get_and_post(method)
    }
}

// ─── formData ─────────────────────────────────────────────────────────────────

/// Multipart submissions with separately validated fields and files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormDataKind;

#[async_trait]
impl HandlerKind for FormDataKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::FormData(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        let boundary = form::boundary(&req)?;
        let mut input = form::parse(req.into_body(), boundary).await?;

        input.fields = validate_input(&route, std::mem::take(&mut input.fields))?;
        if let Some(schema) = route.files() {
            schema
                .parse(form::describe_files(&input.files))
                .map_err(|err| validation_error(&err))?;
        }

        let output = handler(input, ctx).await?;
        let output = validate_output(&route, output)?;
        Ok(json_response(StatusCode::OK, &output))
    }
}

// ─── html ─────────────────────────────────────────────────────────────────────

/// Validated input, `text/html` response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlKind;

#[async_trait]
impl HandlerKind for HtmlKind {
    async fn handle(
        &self,
        req: Request,
        route: Arc<RouteDefinition>,
        ctx: Arc<ServerContext>,
    ) -> HandlerResult {
        let RouteHandler::Html(handler) = route.handler() else {
            return Err(shape_mismatch(&route));
        };
        let input = read_input(&req, &route)?;
        let html = handler(input, ctx).await?;
        Ok(html_response(StatusCode::OK, html))
    }

    fn accepts(&self, method: &Method) -> bool {
        accepts_get_and_post(method)
    }
}
