//! Session store with a coupled user index.
//!
//! Every session occupies two keys: the primary record at
//! `prefix + sessionId` and a secondary index at `prefix + "user:" + userId`
//! holding the session id. The pair is written with matching TTLs by paired
//! single-key commands; there is no multi-key atomicity, so the two can be
//! observed partially applied under concurrency or crash. Maintenance
//! operations exist to repair the drift that allows.
//!
//! Reads degrade to `None`/`false` on connection errors or corrupt records;
//! writes the caller depends on (create, update, extend) propagate errors.

use std::sync::Arc;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tabletap_config::SessionSettings;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::connection::{ManagedConnection, RedisConnections, scan_keys};
use crate::error::Result;

/// A stored session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cafe_id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When set, reads refresh `last_activity`. The remaining TTL is
    /// deliberately left untouched.
    #[serde(default)]
    pub sliding_expiration: bool,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            cafe_id: None,
            role: role.into(),
            permissions: Vec::new(),
            last_activity: OffsetDateTime::now_utc(),
            metadata: serde_json::Value::Null,
            sliding_expiration: false,
        }
    }

    pub fn with_cafe(mut self, cafe_id: impl Into<String>) -> Self {
        self.cafe_id = Some(cafe_id.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_sliding_expiration(mut self, sliding: bool) -> Self {
        self.sliding_expiration = sliding;
        self
    }
}

/// Partial update merged into a stored session. `None` fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub cafe_id: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub sliding_expiration: Option<bool>,
}

impl SessionUpdate {
    fn apply(&self, record: &mut SessionRecord) {
        if let Some(cafe_id) = &self.cafe_id {
            record.cafe_id = Some(cafe_id.clone());
        }
        if let Some(role) = &self.role {
            record.role = role.clone();
        }
        if let Some(permissions) = &self.permissions {
            record.permissions = permissions.clone();
        }
        if let Some(metadata) = &self.metadata {
            record.metadata = metadata.clone();
        }
        if let Some(sliding) = self.sliding_expiration {
            record.sliding_expiration = sliding;
        }
    }
}

/// Redis-backed session store.
pub struct SessionService {
    connections: Arc<RedisConnections>,
    prefix: String,
    default_ttl_secs: u64,
}

impl SessionService {
    pub fn new(connections: Arc<RedisConnections>, settings: &SessionSettings) -> Self {
        Self {
            connections,
            prefix: settings.prefix.clone(),
            default_ttl_secs: settings.default_ttl_secs,
        }
    }

    pub(crate) fn record_key(&self, session_id: &str) -> String {
        format!("{}{}", self.prefix, session_id)
    }

    pub(crate) fn user_key(&self, user_id: &str) -> String {
        format!("{}user:{}", self.prefix, user_id)
    }

    fn is_user_index_key(&self, key: &str) -> bool {
        key.strip_prefix(&self.prefix)
            .is_some_and(|rest| rest.starts_with("user:"))
    }

    /// Create a session: primary record plus user index, same TTL on both.
    pub async fn create_session(&self, record: &SessionRecord, ttl: Option<u64>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl_secs);
        let payload = serde_json::to_string(record)?;
        let mut conn = self.connections.cache().await?;

        // Record first, then the index; the pair is not atomic.
        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.record_key(&record.session_id), payload, ttl)
            .await
        {
            self.connections.reset_if_readonly(&e).await;
            return Err(e.into());
        }
        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.user_key(&record.user_id), &record.session_id, ttl)
            .await
        {
            self.connections.reset_if_readonly(&e).await;
            return Err(e.into());
        }
        debug!(session_id = %record.session_id, user_id = %record.user_id, ttl, "session created");
        Ok(())
    }

    /// Fetch a session. For sliding-expiration sessions the read refreshes
    /// `last_activity` (but not the remaining TTL); a failed refresh is
    /// logged and does not fail the read.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        let mut record = self.read_record(session_id).await?;
        if record.sliding_expiration {
            record.last_activity = OffsetDateTime::now_utc();
            if let Err(e) = self.write_keep_ttl(&record).await {
                warn!(session_id = %session_id, error = %e, "sliding activity refresh failed");
            }
        }
        Some(record)
    }

    /// Merge fields into an existing session, preserving its remaining TTL.
    /// Returns the updated record, or `None` when the session is gone.
    pub async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<Option<SessionRecord>> {
        let Some(mut record) = self.read_record(session_id).await else {
            return Ok(None);
        };
        update.apply(&mut record);
        record.last_activity = OffsetDateTime::now_utc();
        self.write_keep_ttl(&record).await?;
        Ok(Some(record))
    }

    /// Rewrite `last_activity` on the stored record, keeping its TTL.
    pub async fn update_last_activity(&self, session_id: &str) -> Result<bool> {
        let Some(mut record) = self.read_record(session_id).await else {
            return Ok(false);
        };
        record.last_activity = OffsetDateTime::now_utc();
        self.write_keep_ttl(&record).await?;
        Ok(true)
    }

    /// Extend both keys of a session by `additional_secs`.
    ///
    /// Two independent EXPIRE calls; under a crash between them the pair's
    /// TTLs diverge until the shorter one expires.
    pub async fn extend_session(&self, session_id: &str, additional_secs: u64) -> Result<bool> {
        let Some(record) = self.read_record(session_id).await else {
            return Ok(false);
        };
        let mut conn = self.connections.cache().await?;
        let record_key = self.record_key(session_id);
        let current = match conn.ttl::<_, i64>(&record_key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                return Err(e.into());
            }
        };
        if current < 0 {
            return Ok(false);
        }
        let new_ttl = current + additional_secs as i64;
        for key in [record_key, self.user_key(&record.user_id)] {
            if let Err(e) = conn.expire::<_, bool>(&key, new_ttl).await {
                self.connections.reset_if_readonly(&e).await;
                return Err(e.into());
            }
        }
        debug!(session_id = %session_id, new_ttl, "session extended");
        Ok(true)
    }

    /// Delete a session and its user index. Returns whether the primary
    /// record was removed.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let record = self.read_record(session_id).await;
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session delete failed to connect");
                return false;
            }
        };
        let removed = match conn.del::<_, u64>(self.record_key(session_id)).await {
            Ok(count) => count > 0,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(session_id = %session_id, error = %e, "session delete error");
                false
            }
        };
        if let Some(record) = record {
            if let Err(e) = conn.del::<_, u64>(self.user_key(&record.user_id)).await {
                warn!(user_id = %record.user_id, error = %e, "user index delete error");
            }
        }
        debug!(session_id = %session_id, removed, "session deleted");
        removed
    }

    /// Delete every session belonging to a user: the indexed one, plus a
    /// defensive full-keyspace scan for records the index no longer points
    /// at. Returns the number of sessions removed.
    pub async fn delete_user_sessions(&self, user_id: &str) -> u64 {
        let mut deleted = 0;

        if let Some(session_id) = self.session_id_for_user(user_id).await {
            if self.delete_session(&session_id).await {
                deleted += 1;
            }
        }

        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "session scan failed to connect");
                return deleted;
            }
        };
        for key in self.session_record_keys(&mut conn).await {
            let Some(record) = self.read_record_at(&mut conn, &key).await else {
                continue;
            };
            if record.user_id != user_id {
                continue;
            }
            match conn.del::<_, u64>(&key).await {
                Ok(count) if count > 0 => deleted += count,
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "drifted session delete error"),
            }
        }
        debug!(user_id = %user_id, deleted, "user sessions deleted");
        deleted
    }

    /// Look up a session through the user index.
    pub async fn get_session_by_user_id(&self, user_id: &str) -> Option<SessionRecord> {
        let session_id = self.session_id_for_user(user_id).await?;
        self.read_record(&session_id).await
    }

    /// Whether the primary record exists.
    pub async fn is_valid_session(&self, session_id: &str) -> bool {
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        match conn.exists::<_, bool>(self.record_key(session_id)).await {
            Ok(exists) => exists,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(session_id = %session_id, error = %e, "session exists error");
                false
            }
        }
    }

    /// All live sessions. Full-keyspace scan; maintenance use only.
    pub async fn get_active_sessions(&self) -> Vec<SessionRecord> {
        let mut sessions = Vec::new();
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "session scan failed to connect");
                return sessions;
            }
        };
        for key in self.session_record_keys(&mut conn).await {
            if let Some(record) = self.read_record_at(&mut conn, &key).await {
                sessions.push(record);
            }
        }
        sessions
    }

    /// Live sessions scoped to one cafe. Maintenance use only.
    pub async fn get_cafe_sessions(&self, cafe_id: &str) -> Vec<SessionRecord> {
        self.get_active_sessions()
            .await
            .into_iter()
            .filter(|record| record.cafe_id.as_deref() == Some(cafe_id))
            .collect()
    }

    /// Remove corrupt records, records that lost their expiry, and index
    /// entries pointing at sessions that no longer exist. Returns the number
    /// of keys removed.
    pub async fn cleanup_expired_sessions(&self) -> u64 {
        let mut removed = 0;
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "session cleanup failed to connect");
                return 0;
            }
        };
        let keys = match scan_keys(&mut conn, &format!("{}*", self.prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "session cleanup scan error");
                return 0;
            }
        };
        for key in keys {
            let stale = if self.is_user_index_key(&key) {
                match conn.get::<_, Option<String>>(&key).await {
                    Ok(Some(session_id)) => {
                        // Index without a record is drift.
                        !matches!(
                            conn.exists::<_, bool>(self.record_key(&session_id)).await,
                            Ok(true)
                        )
                    }
                    Ok(None) => false,
                    Err(_) => false,
                }
            } else {
                match conn.get::<_, Option<String>>(&key).await {
                    Ok(Some(raw)) => {
                        let corrupt = serde_json::from_str::<SessionRecord>(&raw).is_err();
                        let lost_expiry =
                            matches!(conn.ttl::<_, i64>(&key).await, Ok(ttl) if ttl == -1);
                        corrupt || lost_expiry
                    }
                    Ok(None) => false,
                    Err(_) => false,
                }
            };
            if stale {
                match conn.del::<_, u64>(&key).await {
                    Ok(count) => removed += count,
                    Err(e) => warn!(key = %key, error = %e, "session cleanup delete error"),
                }
            }
        }
        debug!(removed, "session cleanup finished");
        removed
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Raw record read; no sliding-expiration side effects.
    async fn read_record(&self, session_id: &str) -> Option<SessionRecord> {
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session read failed to connect");
                return None;
            }
        };
        self.read_record_at(&mut conn, &self.record_key(session_id)).await
    }

    async fn read_record_at(
        &self,
        conn: &mut ManagedConnection,
        key: &str,
    ) -> Option<SessionRecord> {
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %key, error = %e, "corrupt session record treated as absent");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %key, error = %e, "session read error");
                None
            }
        }
    }

    async fn session_id_for_user(&self, user_id: &str) -> Option<String> {
        let mut conn = self.connections.cache().await.ok()?;
        match conn.get::<_, Option<String>>(self.user_key(user_id)).await {
            Ok(session_id) => session_id,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(user_id = %user_id, error = %e, "user index read error");
                None
            }
        }
    }

    async fn session_record_keys(&self, conn: &mut ManagedConnection) -> Vec<String> {
        match scan_keys(conn, &format!("{}*", self.prefix)).await {
            Ok(keys) => keys
                .into_iter()
                .filter(|key| !self.is_user_index_key(key))
                .collect(),
            Err(e) => {
                warn!(error = %e, "session keyspace scan error");
                Vec::new()
            }
        }
    }

    /// Rewrite the primary record in place, preserving its remaining TTL.
    async fn write_keep_ttl(&self, record: &SessionRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.connections.cache().await?;
        if let Err(e) = redis::cmd("SET")
            .arg(self.record_key(&record.session_id))
            .arg(payload)
            .arg("KEEPTTL")
            .query_async::<()>(&mut conn)
            .await
        {
            self.connections.reset_if_readonly(&e).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("prefix", &self.prefix)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletap_config::Settings;

    fn service() -> SessionService {
        let settings = Settings::default();
        SessionService::new(
            Arc::new(RedisConnections::new(settings.redis)),
            &settings.session,
        )
    }

    fn record() -> SessionRecord {
        SessionRecord::new("s1", "u1", "barista")
            .with_cafe("cafe-1")
            .with_permissions(vec!["orders:read".into()])
            .with_sliding_expiration(true)
    }

    #[test]
    fn test_key_pair_layout() {
        let sessions = service();
        assert_eq!(sessions.record_key("s1"), "tabletap:session:s1");
        assert_eq!(sessions.user_key("u1"), "tabletap:session:user:u1");
        assert!(sessions.is_user_index_key("tabletap:session:user:u1"));
        assert!(!sessions.is_user_index_key("tabletap:session:s1"));
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["cafeId"], "cafe-1");
        assert_eq!(json["slidingExpiration"], true);
        assert!(json["lastActivity"].is_string());
    }

    #[test]
    fn test_record_roundtrip() {
        let original = record();
        let raw = serde_json::to_string(&original).unwrap();
        let back: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_record_optional_fields_default() {
        let json = r#"{
            "sessionId": "s2",
            "userId": "u2",
            "role": "manager",
            "lastActivity": "2026-08-27T10:00:00Z"
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert!(record.cafe_id.is_none());
        assert!(record.permissions.is_empty());
        assert!(record.metadata.is_null());
        assert!(!record.sliding_expiration);
    }

    #[test]
    fn test_update_merges_only_set_fields() {
        let mut record = record();
        let update = SessionUpdate {
            role: Some("manager".into()),
            metadata: Some(serde_json::json!({"shift": "late"})),
            ..SessionUpdate::default()
        };
        update.apply(&mut record);
        assert_eq!(record.role, "manager");
        assert_eq!(record.metadata["shift"], "late");
        // Untouched fields survive.
        assert_eq!(record.cafe_id.as_deref(), Some("cafe-1"));
        assert_eq!(record.permissions, vec!["orders:read".to_string()]);
        assert!(record.sliding_expiration);
    }

    #[test]
    fn test_empty_update_is_identity() {
        let mut before = record();
        let snapshot = before.clone();
        SessionUpdate::default().apply(&mut before);
        assert_eq!(before, snapshot);
    }
}
