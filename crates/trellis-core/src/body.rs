//! Request and response types.
//!
//! Trellis speaks the [`http`] crate's types directly.  Incoming requests carry
//! a fully-buffered body ([`Bytes`]), because every built-in handler kind needs
//! the whole payload before it can validate anything.  Outgoing responses use
//! [`Body`], which can also be a byte stream for the `stream` and `sse` kinds.

use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderValue, StatusCode, header};
use serde::Serialize;

/// Boxed error type used on the request path.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An incoming request.
pub type Request = http::Request<Bytes>;

/// An outgoing response.
pub type Response = http::Response<Body>;

/// Result of a handler, a middleware, or a whole dispatch.
pub type HandlerResult = Result<Response, BoxError>;

/// Address of the peer that opened the connection.
///
/// Host adapters insert this into the request extensions so that IP
/// extraction can fall back to it when no proxy header is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Response body.
#[derive(Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// A fully-buffered body.
    Full(Bytes),
    /// A body produced incrementally.
    Stream(BoxStream<'static, Result<Bytes, BoxError>>),
}

impl Body {
    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Wraps a stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Returns `true` if the body is a stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Buffers the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, BoxError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}

// ─── Response helpers ─────────────────────────────────────────────────────────

fn with_content_type(status: StatusCode, content_type: &'static str, body: Body) -> Response {
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Builds a JSON response.
///
/// Serialization of a `serde_json::Value` cannot fail; for other types a
/// failure produces a `500` with an empty JSON object.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(bytes) => with_content_type(status, "application/json", Body::from(bytes)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            with_content_type(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Body::from("{}"),
            )
        }
    }
}

/// Builds a `text/plain` response.
pub fn text_response(status: StatusCode, text: impl Into<String>) -> Response {
    with_content_type(status, "text/plain; charset=utf-8", Body::from(text.into()))
}

/// Builds a `text/html` response.
pub fn html_response(status: StatusCode, html: impl Into<String>) -> Response {
    with_content_type(status, "text/html; charset=utf-8", Body::from(html.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_stream_body() {
        let chunks = vec![
            Ok::<_, BoxError>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));
        assert!(body.is_stream());
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn test_json_response_sets_content_type() {
        let response = json_response(StatusCode::CREATED, &serde_json::json!({"ok": true}));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
    }
}
