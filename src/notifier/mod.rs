//! Field-level change propagation.
//!
//! Every record mutation, whether made by the reconciliation cycle or by a
//! background resolver, is published as a [`RegistryEvent`] on a broadcast
//! channel. Publishing never blocks and is safe from any thread. Consumers
//! that need events on a particular runtime use an [`EventDispatcher`] to
//! hand them over explicitly.
//!
//! # Delivery
//!
//! The channel is bounded by `event_buffer_size`. A subscriber that falls
//! further behind loses the oldest events and should re-read the registry.

mod dispatcher;
mod event;

pub use dispatcher::*;
pub use event::*;


use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Broadcast hub for registry events.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<RegistryEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish one event. Returns the number of subscribers that will see it.
    pub fn publish(
        &self,
        event: RegistryEvent,
    ) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(id = %event.id(), "no subscribers for registry event");
                0
            }
        }
    }

    pub fn publish_all(
        &self,
        events: impl IntoIterator<Item = RegistryEvent>,
    ) {
        for event in events {
            self.publish(event);
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream; lagged gaps surface as stream errors.
    pub fn stream(&self) -> BroadcastStream<RegistryEvent> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
