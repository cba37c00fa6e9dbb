//! Redis connection management.
//!
//! One [`RedisConnections`] value owns the three logical connections the
//! layer runs on: the cache/session connection, the publisher connection and
//! the subscriber connection. All three are built from one
//! [`RedisSettings`] source and switch between single-node and cluster
//! topology transparently.
//!
//! ## Connection model
//!
//! - Exactly one physical connection per role per process. Handles are cheap
//!   clones of a shared multiplexed connection.
//! - Connections are lazy: the handle is created up front, the dial happens
//!   on the first command, so process start never blocks on Redis.
//! - Reconnects back off exponentially, 50ms doubling per attempt up to a
//!   2000ms cap; the schedule is delegated to the client's
//!   `ConnectionManager` and reaches the cap within six attempts.
//! - A `READONLY` reply is a replica-failover signal: the cached handle is
//!   dropped so the next command dials fresh.

use std::time::Duration;

use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Cmd, Pipeline, RedisFuture, Value};
use tabletap_config::RedisSettings;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RedisServiceError, Result};

/// Reconnect delay grows by this factor per attempt.
const RECONNECT_FACTOR_MS: u64 = 50;
/// Reconnect delay cap.
const RECONNECT_MAX_DELAY_MS: u64 = 2000;
/// Per-command reconnect attempts for the cache role. Publisher and
/// subscriber roles are uncapped so a blocking subscribe never times out.
const CACHE_ROLE_RETRIES: usize = 6;

/// Logical connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Cache and session store commands
    Cache,
    /// Outbound PUBLISH commands
    Publisher,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Cache => "cache",
            ConnectionRole::Publisher => "publisher",
        }
    }
}

/// A command connection that is either a single-node multiplexed connection
/// or a cluster connection, behind one `ConnectionLike` surface.
#[derive(Clone)]
pub enum ManagedConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for ManagedConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            ManagedConnection::Single(conn) => conn.req_packed_command(cmd),
            ManagedConnection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            ManagedConnection::Single(conn) => conn.req_packed_commands(cmd, offset, count),
            ManagedConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            ManagedConnection::Single(conn) => conn.get_db(),
            ManagedConnection::Cluster(conn) => conn.get_db(),
        }
    }
}

/// The process-wide set of logical Redis connections.
pub struct RedisConnections {
    settings: RedisSettings,
    cache: Mutex<Option<ManagedConnection>>,
    publisher: Mutex<Option<ManagedConnection>>,
}

impl RedisConnections {
    /// Create the connection set. No dial happens here.
    pub fn new(settings: RedisSettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(None),
            publisher: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    /// Handle for cache and session store commands.
    pub async fn cache(&self) -> Result<ManagedConnection> {
        self.role_connection(&self.cache, ConnectionRole::Cache).await
    }

    /// Handle for outbound PUBLISH commands.
    pub async fn publisher(&self) -> Result<ManagedConnection> {
        self.role_connection(&self.publisher, ConnectionRole::Publisher)
            .await
    }

    async fn role_connection(
        &self,
        slot: &Mutex<Option<ManagedConnection>>,
        role: ConnectionRole,
    ) -> Result<ManagedConnection> {
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.dial(role).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn dial(&self, role: ConnectionRole) -> Result<ManagedConnection> {
        if self.settings.cluster_enabled {
            info!(role = role.as_str(), "connecting to Redis cluster");
            let client = ClusterClient::new(self.settings.cluster_node_urls())?;
            let conn = client.get_async_connection().await?;
            return Ok(ManagedConnection::Cluster(conn));
        }

        let url = self.settings.connection_url();
        debug!(role = role.as_str(), url = %url, "connecting to Redis");
        let client = Client::open(url)?;
        let mut config = ConnectionManagerConfig::new()
            .set_factor(RECONNECT_FACTOR_MS)
            .set_max_delay(RECONNECT_MAX_DELAY_MS)
            .set_connection_timeout(Duration::from_secs(10));
        if role == ConnectionRole::Cache {
            config = config.set_number_of_retries(CACHE_ROLE_RETRIES);
        } else {
            config = config.set_number_of_retries(usize::MAX);
        }
        let conn = client.get_connection_manager_with_config(config).await?;
        Ok(ManagedConnection::Single(conn))
    }

    /// Dedicated pub/sub connection for the subscriber role.
    ///
    /// SUBSCRIBE puts a connection into a mode where regular commands are
    /// unavailable, so the subscriber never shares a connection with the
    /// other roles. In cluster mode pub/sub messages are broadcast
    /// cluster-wide, so subscribing on one seed node is sufficient.
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub> {
        let url = if self.settings.cluster_enabled {
            self.settings
                .cluster_node_urls()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    RedisServiceError::connection("cluster mode requires at least one node")
                })?
        } else {
            self.settings.connection_url()
        };
        let client = Client::open(url)?;
        Ok(client.get_async_pubsub().await?)
    }

    /// Drop the cached command handles when a command failed with `READONLY`.
    ///
    /// The error means the node we are talking to became a replica after a
    /// failover; the next command dials fresh and rediscovers the primary.
    pub async fn reset_if_readonly(&self, err: &redis::RedisError) {
        if err.kind() != redis::ErrorKind::ReadOnly {
            return;
        }
        warn!(error = %err, "READONLY reply, dropping connections to force re-dial");
        self.cache.lock().await.take();
        self.publisher.lock().await.take();
    }

    /// Health probe on the cache connection.
    pub async fn ping(&self) -> bool {
        let mut conn = match self.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "ping failed to get connection");
                return false;
            }
        };
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                self.reset_if_readonly(&e).await;
                warn!(error = %e, "ping failed");
                false
            }
        }
    }

    /// Drop all cached command handles.
    pub async fn close(&self) {
        self.cache.lock().await.take();
        self.publisher.lock().await.take();
        info!("redis connections closed");
    }
}

impl std::fmt::Debug for RedisConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnections")
            .field("cluster_enabled", &self.settings.cluster_enabled)
            .finish()
    }
}

/// Collect every key matching `pattern` via cursor-based SCAN.
///
/// Coarse maintenance helper; never used on correctness-critical paths.
pub(crate) async fn scan_keys(conn: &mut ManagedConnection, pattern: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(&mut *conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}
