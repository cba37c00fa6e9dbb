//! Redis-backed realtime layer for TableTap.
//!
//! Three services over three logical Redis connections:
//!
//! - [`PubSubEngine`]: one subscriber connection multiplexed into many
//!   independently filtered event streams, plus publishers.
//! - [`CacheService`]: namespaced get/set/del/incr with TTL and coarse
//!   bulk invalidation.
//! - [`SessionService`]: session records with a coupled user index whose
//!   lifetimes stay paired.
//!
//! ```text
//! business logic ──► CacheService / SessionService / publish helpers
//!                              │
//!                       RedisConnections ──► Redis
//!                              │
//! business logic ◄── filtered streams ◄── EventBroadcaster ◄── subscriber
//! ```
//!
//! Delivery is at-most-once; multi-key operations are paired single-key
//! commands, never transactions.

pub mod cache;
pub mod connection;
pub mod domain;
pub mod error;
pub mod pubsub;
pub mod session;

use std::sync::Arc;

use tabletap_config::Settings;

pub use cache::{CacheService, CacheStats};
pub use connection::{ConnectionRole, ManagedConnection, RedisConnections};
pub use error::{RedisServiceError, Result};
pub use pubsub::{EventStream, PubSubEngine};
pub use session::{SessionRecord, SessionService, SessionUpdate};

/// The fully wired realtime layer.
///
/// All services share one [`RedisConnections`] set, so the process holds
/// exactly one physical connection per role.
pub struct Realtime {
    pub connections: Arc<RedisConnections>,
    pub pubsub: PubSubEngine,
    pub cache: CacheService,
    pub sessions: SessionService,
}

impl Realtime {
    /// Wire the layer from settings. No connection is dialed here; the
    /// first command on each role does that.
    pub fn from_settings(settings: &Settings) -> Self {
        let connections = Arc::new(RedisConnections::new(settings.redis.clone()));
        Self {
            pubsub: PubSubEngine::new(connections.clone()),
            cache: CacheService::new(connections.clone(), &settings.cache),
            sessions: SessionService::new(connections.clone(), &settings.session),
            connections,
        }
    }

    /// Tear down the subscriber and drop all connections, cancelling every
    /// outstanding consumer stream.
    pub async fn shutdown(&self) {
        self.pubsub.close().await;
        self.connections.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_does_not_dial() {
        let mut settings = Settings::default();
        settings.redis.host = "redis.invalid".to_string();
        let realtime = Realtime::from_settings(&settings);
        assert_eq!(realtime.pubsub.broadcaster().subscriber_count(), 0);
    }
}
