//! Wire envelope for published events.
//!
//! Every payload sent over Redis pub/sub is wrapped in an [`EventEnvelope`]
//! before serialization. The envelope is always fully populated on publish:
//! `pattern` is the empty string for exact-channel delivery and carries the
//! matched glob for pattern delivery.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Envelope wrapped around every published payload.
///
/// Serialized as UTF-8 JSON on the wire with camelCase field names, so
/// envelopes interoperate with non-Rust publishers on the same channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Matched subscription pattern; empty for exact-channel delivery.
    #[serde(default)]
    pub pattern: String,
    /// Channel the event was published to.
    pub channel: String,
    /// Application payload.
    pub data: serde_json::Value,
    /// Publish time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Unique id for the logical event. A fan-out publish reuses the same id
    /// across all of its channels.
    pub message_id: String,
}

impl EventEnvelope {
    /// Create a fully populated envelope with a fresh message id and timestamp.
    pub fn new(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self::with_message_id(channel, data, Uuid::new_v4().to_string())
    }

    /// Create an envelope carrying an explicit message id.
    ///
    /// Used by fan-out publishes so every channel of one logical event shares
    /// the same id.
    pub fn with_message_id(
        channel: impl Into<String>,
        data: serde_json::Value,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            pattern: String::new(),
            channel: channel.into(),
            data,
            timestamp: OffsetDateTime::now_utc(),
            message_id: message_id.into(),
        }
    }

    /// Set the matched pattern (pattern delivery).
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// True when this envelope was delivered for the given exact channel.
    pub fn matches_channel(&self, channel: &str) -> bool {
        self.channel == channel
    }

    /// True when this envelope was delivered for the given subscription pattern.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        self.pattern == pattern
    }

    /// True when the envelope's channel starts with the given prefix.
    ///
    /// Domain filters (`cafe:{id}:`, `counter:{id}:`, `order:{id}:`) are
    /// prefix matches over the shared stream.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.channel.starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fully_populated() {
        let env = EventEnvelope::new("cafe:c1:orders", serde_json::json!({"orderId": "o1"}));
        assert_eq!(env.channel, "cafe:c1:orders");
        assert!(env.pattern.is_empty());
        assert!(!env.message_id.is_empty());
        assert_eq!(env.data["orderId"], "o1");
    }

    #[test]
    fn test_envelope_unique_message_ids() {
        let a = EventEnvelope::new("ch", serde_json::json!(1));
        let b = EventEnvelope::new("ch", serde_json::json!(1));
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_envelope_wire_format_is_camel_case() {
        let env = EventEnvelope::with_message_id("order:o1:status", serde_json::json!({}), "m-1");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["messageId"], "m-1");
        assert_eq!(json["channel"], "order:o1:status");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_envelope_roundtrip_preserves_data() {
        let env = EventEnvelope::new("ch", serde_json::json!({"nested": {"n": 42}}));
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_envelope_pattern_defaults_to_empty() {
        // Publishers that never do pattern delivery may omit the field.
        let json = r#"{"channel":"ch","data":1,"timestamp":"2026-08-27T00:00:00Z","messageId":"m"}"#;
        let env: EventEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.pattern.is_empty());
    }

    #[test]
    fn test_envelope_filters() {
        let env = EventEnvelope::new("cafe:c1:orders", serde_json::json!({}))
            .with_pattern("cafe:*:orders");
        assert!(env.matches_channel("cafe:c1:orders"));
        assert!(!env.matches_channel("cafe:c2:orders"));
        assert!(env.matches_pattern("cafe:*:orders"));
        assert!(env.matches_prefix("cafe:c1:"));
        assert!(!env.matches_prefix("counter:c1:"));
    }
}
