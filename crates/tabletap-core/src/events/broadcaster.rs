//! In-process broadcast hub for inbound events.
//!
//! The `EventBroadcaster` is the single shared stream every logical consumer
//! filters. It is fed by exactly one physical Redis subscriber connection and
//! uses tokio's broadcast channel for multi-consumer fan-out.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::envelope::EventEnvelope;

/// Default buffer size for the broadcast channel.
/// Slow receivers lag (and lose the oldest events) beyond this limit, which
/// is consistent with the layer's at-most-once delivery contract.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for inbound event envelopes.
///
/// Cloneable and shareable across tasks; every subscriber receives every
/// envelope broadcast after its subscription and applies its own filter.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an envelope to all subscribers.
    ///
    /// Returns the number of subscribers that received the envelope,
    /// 0 if there are no active subscribers.
    pub fn send(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or_default()
    }

    /// Subscribe to the shared stream.
    ///
    /// The receiver only observes envelopes broadcast after subscription;
    /// earlier events are never replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers.
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
