//! # Trellis Core
//!
//! Foundation types shared by every Trellis crate.
//!
//! - **Request / response**: [`Request`], [`Response`] and [`Body`], built on
//!   the `http` crate.
//! - **HTTP errors**: [`HttpError`], the only error the dispatcher turns into
//!   a response, and the [`ErrorRegistry`] of named error types.
//! - **Core services**: the opaque [`CoreServices`] bundle and its
//!   [`Database`] handle.
//! - **Contracts** for collaborators the framework does not implement:
//!   [`Schema`] objects and the SSE [`Broadcaster`].

pub mod body;
pub mod error;
pub mod schema;
pub mod services;
pub mod sse;

pub use body::{
    Body, BoxError, HandlerResult, RemoteAddr, Request, Response, html_response, json_response,
    text_response,
};
pub use error::{ErrorDefinition, ErrorRegistry, HttpError};
pub use schema::{FnSchema, Schema, SchemaError, SchemaIssue, SchemaRef, schema_fn};
pub use services::{CoreServices, CoreServicesBuilder, Database};
pub use sse::{Broadcaster, SseEvent};

pub use bytes::Bytes;
pub use http;
