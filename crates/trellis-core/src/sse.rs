//! Server-sent events contract.
//!
//! The broadcaster itself is a core service living outside the framework; the
//! `sse` handler kind only needs to subscribe a client to a set of channels
//! and turn the resulting events into `text/event-stream` frames.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event published on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseEvent {
    pub channel: String,
    /// Event name, written as the `event:` field.
    pub event: String,
    pub data: Value,
}

impl SseEvent {
    pub fn new(channel: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            data,
        }
    }

    /// Encodes the event as a single `text/event-stream` frame.
    pub fn to_frame(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

/// Subscription side of the SSE broadcaster core service.
pub trait Broadcaster: Send + Sync {
    /// Subscribes `client_id` to `channels`.  The stream ends when the
    /// broadcaster drops the client.
    fn subscribe(&self, client_id: &str, channels: &[String]) -> BoxStream<'static, SseEvent>;
}
