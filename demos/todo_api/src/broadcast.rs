//! A process-local SSE broadcaster.

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tracing::debug;

use trellis::core::{Broadcaster, SseEvent};

struct Client {
    id: String,
    channels: Vec<String>,
    tx: UnboundedSender<SseEvent>,
}

/// Fans events out to every subscriber of the event's channel.
#[derive(Default)]
pub struct ChannelBroadcaster {
    clients: Mutex<Vec<Client>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of clients the event was delivered to.
    pub fn publish(&self, event: SseEvent) -> usize {
        let mut clients = self.clients.lock();
        clients.retain(|client| {
            let open = !client.tx.is_closed();
            if !open {
                debug!(client_id = %client.id, "SSE client disconnected");
            }
            open
        });

        let mut delivered = 0;
        for client in clients.iter() {
            if client.channels.contains(&event.channel)
                && client.tx.unbounded_send(event.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        debug!(channel = %event.channel, event = %event.event, delivered, "Published SSE event");
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn subscribe(&self, client_id: &str, channels: &[String]) -> BoxStream<'static, SseEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.clients.lock().push(Client {
            id: client_id.to_string(),
            channels: channels.to_vec(),
            tx,
        });
        rx.boxed()
    }
}
