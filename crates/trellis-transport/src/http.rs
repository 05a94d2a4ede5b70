//! axum-based HTTP host.
//!
//! Every path and method is routed to one fallback handler that buffers the
//! body (up to the configured limit), attaches the peer address as
//! [`RemoteAddr`], and calls the dispatcher through its `tower::Service`.
//! Streaming responses (`stream`, `sse`) are forwarded chunk by chunk.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request as AxumRequest, State};
use axum::http::StatusCode;
use axum::response::Response as AxumResponse;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, info};

use trellis_core::{Body, HttpError, RemoteAddr, Response};
use trellis_framework::{DispatchService, Dispatcher};

use crate::error::{TransportError, TransportResult};

/// Default request body limit, 2 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// ─── Conversion ───────────────────────────────────────────────────────────────

/// Converts a dispatcher response into an axum response.
pub fn into_axum_response(response: Response) -> AxumResponse {
    let (parts, body) = response.into_parts();
    let body = match body {
        Body::Empty => axum::body::Body::empty(),
        Body::Full(bytes) => axum::body::Body::from(bytes),
        Body::Stream(stream) => axum::body::Body::from_stream(stream),
    };
    AxumResponse::from_parts(parts, body)
}

// ─── Shared state ─────────────────────────────────────────────────────────────

struct ServerState {
    service: DispatchService,
    max_body_bytes: usize,
}

async fn dispatch(State(state): State<Arc<ServerState>>, req: AxumRequest) -> AxumResponse {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (mut parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(path = %parts.uri.path(), error = %err, "Request body rejected");
            let error = HttpError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("request body exceeds {} bytes", state.max_body_bytes),
            );
            return into_axum_response(error.to_response());
        }
    };
    if let Some(addr) = remote {
        parts.extensions.insert(RemoteAddr(addr));
    }

    let path = parts.uri.path().to_string();
    let request = axum::http::Request::from_parts(parts, bytes);
    match state.service.clone().oneshot(request).await {
        Ok(response) => into_axum_response(response),
        Err(err) => {
            error!(path = %path, error = %err, "Unhandled error while dispatching request");
            into_axum_response(HttpError::internal("internal server error").to_response())
        }
    }
}

// =============================================================================
// HttpServer
// =============================================================================

/// Serves a [`Dispatcher`] over HTTP.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

impl HttpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Requests with larger bodies are answered `413`.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// The axum router, for embedding into a larger application.
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            service: DispatchService::new(Arc::clone(&self.dispatcher)),
            max_body_bytes: self.max_body_bytes,
        });
        Router::new().fallback(dispatch).with_state(state)
    }

    /// Binds `addr` and serves in a background task until
    /// [`ServerHandle::shutdown`].
    pub async fn bind(self, addr: &str) -> TransportResult<ServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();

        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(signal);
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server error");
            }
            info!(addr = %local_addr, "HTTP server stopped");
        });

        info!(addr = %local_addr, max_body_bytes = self.max_body_bytes, "HTTP server listening");
        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// A running HTTP server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address, with the OS-assigned port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections; in-flight requests finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits until the server has stopped.
    pub async fn stopped(self) -> TransportResult<()> {
        self.task.await?;
        Ok(())
    }
}
