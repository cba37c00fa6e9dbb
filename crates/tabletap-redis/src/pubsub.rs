//! Pub/sub engine: one subscriber connection fanned into filtered streams.
//!
//! The engine keeps exactly one physical subscriber connection. Every inbound
//! message, exact or pattern, is wrapped into an [`EventEnvelope`] and pushed
//! onto one shared broadcast stream; logical consumers are pure client-side
//! filters over that stream. Subscribing to a channel or pattern is
//! idempotent: the underlying command is issued the first time only, tracked
//! by an instance-owned registry.
//!
//! The subscription registry and the subscriber connection are shared by
//! every consumer of this engine: any `psubscribe` widens what arrives on
//! the shared stream, so consumers filter defensively rather than assume
//! isolation.
//!
//! Delivery is at-most-once. Malformed inbound payloads are logged and
//! dropped; if the subscriber connection dies there is no automatic
//! resubscription, and events published in that window are lost.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use redis::Msg;
use redis::aio::{PubSubSink, PubSubStream};
use tabletap_core::events::topics;
use tabletap_core::{EventBroadcaster, EventEnvelope};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::RedisConnections;
use crate::error::Result;

/// A filtered view over the shared broadcast stream.
pub type EventStream = Pin<Box<dyn Stream<Item = EventEnvelope> + Send>>;

/// Registry of channels and patterns issued to the subscriber connection.
///
/// Instance-owned, never global: independent engines (and tests) keep
/// independent registries.
#[derive(Default)]
struct SubscriberState {
    sink: Option<PubSubSink>,
    reader: Option<JoinHandle<()>>,
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

/// Pub/sub engine over one publisher and one subscriber connection.
pub struct PubSubEngine {
    connections: Arc<RedisConnections>,
    broadcaster: EventBroadcaster,
    state: Mutex<SubscriberState>,
}

impl PubSubEngine {
    pub fn new(connections: Arc<RedisConnections>) -> Self {
        Self {
            connections,
            broadcaster: EventBroadcaster::new(),
            state: Mutex::new(SubscriberState::default()),
        }
    }

    /// The in-process hub behind the shared stream (for wiring/testing).
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish `data` to `channel` wrapped in a fresh envelope.
    ///
    /// Returns Redis's delivered-subscriber count. Errors propagate: a
    /// publisher must know its write did not happen.
    pub async fn publish(&self, channel: &str, data: serde_json::Value) -> Result<u64> {
        self.publish_envelope(EventEnvelope::new(channel, data)).await
    }

    /// Publish with an explicit message id (fan-out publishes share one id).
    pub async fn publish_with_id(
        &self,
        channel: &str,
        data: serde_json::Value,
        message_id: &str,
    ) -> Result<u64> {
        self.publish_envelope(EventEnvelope::with_message_id(channel, data, message_id))
            .await
    }

    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<u64> {
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.connections.publisher().await?;
        match redis::cmd("PUBLISH")
            .arg(&envelope.channel)
            .arg(payload)
            .query_async::<u64>(&mut conn)
            .await
        {
            Ok(count) => {
                debug!(
                    channel = %envelope.channel,
                    message_id = %envelope.message_id,
                    subscribers = count,
                    "published event"
                );
                Ok(count)
            }
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                Err(e.into())
            }
        }
    }

    /// Publish one logical event to several channels.
    ///
    /// Channels are attempted independently; a failure on one is logged and
    /// does not block or roll back the others. Returns the sum of the
    /// per-channel subscriber counts.
    pub async fn fan_out(&self, channels: &[String], data: serde_json::Value) -> u64 {
        let message_id = Uuid::new_v4().to_string();
        let mut delivered = 0;
        for channel in channels {
            match self.publish_with_id(channel, data.clone(), &message_id).await {
                Ok(count) => delivered += count,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "fan-out publish failed on channel");
                }
            }
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to an exact channel. Idempotent.
    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.channels.contains(channel) {
            return Ok(());
        }
        self.ensure_reader(&mut state).await?;
        if let Some(sink) = state.sink.as_mut() {
            sink.subscribe(channel).await?;
        }
        state.channels.insert(channel.to_string());
        debug!(channel = %channel, "subscribed");
        Ok(())
    }

    /// Subscribe to a glob pattern. Idempotent.
    pub async fn psubscribe(&self, pattern: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.patterns.contains(pattern) {
            return Ok(());
        }
        self.ensure_reader(&mut state).await?;
        if let Some(sink) = state.sink.as_mut() {
            sink.psubscribe(pattern).await?;
        }
        state.patterns.insert(pattern.to_string());
        debug!(pattern = %pattern, "pattern subscribed");
        Ok(())
    }

    /// Unsubscribe from an exact channel. Unknown channels are a no-op.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.channels.contains(channel) {
            return Ok(());
        }
        // Registry entries only reflect acknowledged commands: drop the
        // entry after the server confirms, so a failed call leaves the
        // channel registered and Redis delivery still matches the registry.
        if let Some(sink) = state.sink.as_mut() {
            sink.unsubscribe(channel).await?;
        }
        state.channels.remove(channel);
        debug!(channel = %channel, "unsubscribed");
        Ok(())
    }

    /// Unsubscribe from a pattern. Unknown patterns are a no-op.
    pub async fn punsubscribe(&self, pattern: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.patterns.contains(pattern) {
            return Ok(());
        }
        if let Some(sink) = state.sink.as_mut() {
            sink.punsubscribe(pattern).await?;
        }
        state.patterns.remove(pattern);
        debug!(pattern = %pattern, "pattern unsubscribed");
        Ok(())
    }

    /// Channels currently registered with the subscriber connection.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut channels: Vec<_> = state.channels.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Patterns currently registered with the subscriber connection.
    pub async fn subscribed_patterns(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut patterns: Vec<_> = state.patterns.iter().cloned().collect();
        patterns.sort();
        patterns
    }

    async fn ensure_reader(&self, state: &mut SubscriberState) -> Result<()> {
        if state.sink.is_some() {
            return Ok(());
        }
        let pubsub = self.connections.pubsub().await?;
        let (sink, stream) = pubsub.split();
        let broadcaster = self.broadcaster.clone();
        state.reader = Some(tokio::spawn(run_reader(stream, broadcaster)));
        state.sink = Some(sink);
        info!("subscriber connection established");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumer streams
    // ------------------------------------------------------------------

    /// The raw shared stream of every inbound envelope.
    pub fn messages(&self) -> EventStream {
        self.filtered(|_| true)
    }

    /// Envelopes delivered for one exact channel.
    pub fn channel_messages(&self, channel: &str) -> EventStream {
        let channel = channel.to_string();
        self.filtered(move |env| env.matches_channel(&channel))
    }

    /// Envelopes delivered for one subscription pattern.
    pub fn pattern_messages(&self, pattern: &str) -> EventStream {
        let pattern = pattern.to_string();
        self.filtered(move |env| env.matches_pattern(&pattern))
    }

    /// Every event on a cafe's topics (`cafe:{id}:*`).
    pub fn cafe_events(&self, cafe_id: &str) -> EventStream {
        let prefix = topics::cafe_prefix(cafe_id);
        self.filtered(move |env| env.matches_prefix(&prefix))
    }

    /// Every event on a counter's topics (`counter:{id}:*`).
    pub fn counter_events(&self, counter_id: &str) -> EventStream {
        let prefix = topics::counter_prefix(counter_id);
        self.filtered(move |env| env.matches_prefix(&prefix))
    }

    /// Every event on an order's topics (`order:{id}:*`).
    pub fn order_events(&self, order_id: &str) -> EventStream {
        let prefix = topics::order_prefix(order_id);
        self.filtered(move |env| env.matches_prefix(&prefix))
    }

    fn filtered(
        &self,
        predicate: impl Fn(&EventEnvelope) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        let receiver = self.broadcaster.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(move |result| {
            let value = match result {
                Ok(env) if predicate(&env) => Some(env),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow consumer lagged, events dropped");
                    None
                }
            };
            async move { value }
        }))
    }

    /// Tear down the subscriber connection and registry.
    ///
    /// Outstanding consumer streams end once the broadcast buffer drains.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.sink = None;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.channels.clear();
        state.patterns.clear();
        info!("pub/sub engine closed");
    }
}

impl std::fmt::Debug for PubSubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubEngine")
            .field("consumers", &self.broadcaster.subscriber_count())
            .finish()
    }
}

/// Drain the subscriber stream into the broadcaster until it ends.
async fn run_reader(mut stream: PubSubStream, broadcaster: EventBroadcaster) {
    while let Some(msg) = stream.next().await {
        if let Some(envelope) = envelope_from_msg(&msg) {
            broadcaster.send(envelope);
        }
    }
    // No automatic resubscription: events published while the connection is
    // down are dropped, consistent with at-most-once delivery.
    warn!("subscriber stream ended");
}

fn envelope_from_msg(msg: &Msg) -> Option<EventEnvelope> {
    let channel = msg.get_channel_name().to_string();
    let payload = match msg.get_payload::<String>() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(channel = %channel, error = %e, "non-text pub/sub payload dropped");
            return None;
        }
    };
    let pattern = msg.get_pattern::<Option<String>>().ok().flatten();
    decode_envelope(&channel, &payload, pattern.as_deref())
}

/// Decode an inbound payload into an envelope.
///
/// The delivered channel wins over whatever the payload claims, and the
/// matched pattern (if any) is stamped on. Malformed JSON is dropped.
fn decode_envelope(channel: &str, payload: &str, pattern: Option<&str>) -> Option<EventEnvelope> {
    match serde_json::from_str::<EventEnvelope>(payload) {
        Ok(mut envelope) => {
            envelope.channel = channel.to_string();
            envelope.pattern = pattern.unwrap_or_default().to_string();
            Some(envelope)
        }
        Err(e) => {
            warn!(channel = %channel, error = %e, "malformed pub/sub message dropped");
            None
        }
    }
}
