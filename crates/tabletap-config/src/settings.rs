//! Settings structs with env-var loading, defaults and validation.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Connection URL (e.g. `redis://localhost:6379`). When set it overrides
    /// the discrete host/port/password/db fields.
    #[serde(default)]
    pub url: Option<String>,

    /// Redis host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index (ignored in cluster mode)
    #[serde(default)]
    pub db: i64,

    /// Enable cluster topology
    #[serde(default)]
    pub cluster_enabled: bool,

    /// Cluster seed nodes as `host:port` entries
    #[serde(default)]
    pub cluster_nodes: Vec<String>,

    /// Server-side eviction policy; informational for operators, the layer
    /// never acts on it.
    #[serde(default = "default_max_memory_policy")]
    pub max_memory_policy: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_max_memory_policy() -> String {
    "allkeys-lru".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            password: None,
            db: 0,
            cluster_enabled: false,
            cluster_nodes: Vec::new(),
            max_memory_policy: default_max_memory_policy(),
        }
    }
}

impl RedisSettings {
    /// Effective connection URL for single-node mode.
    ///
    /// `url` wins when present; otherwise the URL is composed from the
    /// discrete fields.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let auth = self
            .password
            .as_deref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        format!("redis://{auth}{host}:{port}/{db}", host = self.host, port = self.port, db = self.db)
    }

    /// Connection URLs for the configured cluster nodes.
    pub fn cluster_node_urls(&self) -> Vec<String> {
        let auth = self
            .password
            .as_deref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        self.cluster_nodes
            .iter()
            .map(|node| format!("redis://{auth}{node}"))
            .collect()
    }
}

/// Cache keyspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Default TTL in seconds for cache writes that don't specify one
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Global key prefix for the cache keyspace
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_prefix() -> String {
    "tabletap:cache:".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            prefix: default_cache_prefix(),
        }
    }
}

/// Session keyspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Default session TTL in seconds
    #[serde(default = "default_session_ttl")]
    pub default_ttl_secs: u64,

    /// Global key prefix for session records and the user index
    #[serde(default = "default_session_prefix")]
    pub prefix: String,
}

fn default_session_ttl() -> u64 {
    86400
}

fn default_session_prefix() -> String {
    "tabletap:session:".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_session_ttl(),
            prefix: default_session_prefix(),
        }
    }
}

/// Top-level settings for the realtime layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load settings from an arbitrary variable source.
    ///
    /// Separated from [`Settings::from_env`] so tests can supply variables
    /// without mutating process state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let redis = RedisSettings {
            url: get("REDIS_URL").filter(|v| !v.is_empty()),
            host: get("REDIS_HOST").unwrap_or_else(default_host),
            port: parse_var(&get, "REDIS_PORT", default_port())?,
            password: get("REDIS_PASSWORD").filter(|v| !v.is_empty()),
            db: parse_var(&get, "REDIS_DB", 0)?,
            cluster_enabled: parse_bool(&get, "REDIS_CLUSTER_ENABLED")?,
            cluster_nodes: get("REDIS_CLUSTER_NODES")
                .map(|v| {
                    v.split(',')
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_memory_policy: get("REDIS_MAX_MEMORY_POLICY")
                .unwrap_or_else(default_max_memory_policy),
        };

        let cache = CacheSettings {
            default_ttl_secs: parse_var(&get, "REDIS_CACHE_TTL", default_cache_ttl())?,
            prefix: get("REDIS_CACHE_PREFIX").unwrap_or_else(default_cache_prefix),
        };

        let session = SessionSettings {
            default_ttl_secs: parse_var(&get, "REDIS_SESSION_TTL", default_session_ttl())?,
            prefix: get("REDIS_SESSION_PREFIX").unwrap_or_else(default_session_prefix),
        };

        let settings = Self {
            redis,
            cache,
            session,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.redis.host.is_empty() {
            return Err(ConfigError::Validation("redis.host must not be empty".into()));
        }
        if self.redis.port == 0 {
            return Err(ConfigError::Validation("redis.port must be > 0".into()));
        }
        if let Some(url) = &self.redis.url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::Validation(format!("redis.url is not a valid URL: {e}"))
            })?;
        }
        if self.redis.cluster_enabled && self.redis.cluster_nodes.is_empty() {
            return Err(ConfigError::Validation(
                "cluster mode requires at least one node in REDIS_CLUSTER_NODES".into(),
            ));
        }
        for node in &self.redis.cluster_nodes {
            let valid = node
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(ConfigError::Validation(format!(
                    "cluster node {node:?} is not a host:port pair"
                )));
            }
        }
        if self.cache.prefix.is_empty() {
            return Err(ConfigError::Validation("cache.prefix must not be empty".into()));
        }
        if self.session.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "session.prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T> {
    match get(var) {
        Some(raw) if !raw.is_empty() => raw.parse().map_err(|_| {
            ConfigError::invalid_value(var, raw, format!("expected {}", std::any::type_name::<T>()))
        }),
        _ => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &str) -> Result<bool> {
    match get(var) {
        Some(raw) if !raw.is_empty() => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid_value(var, raw, "expected a boolean")),
        },
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |var| map.get(var).map(|v| v.to_string())
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.redis.host, "localhost");
        assert_eq!(settings.redis.port, 6379);
        assert_eq!(settings.redis.db, 0);
        assert!(!settings.redis.cluster_enabled);
        assert_eq!(settings.cache.default_ttl_secs, 3600);
        assert_eq!(settings.cache.prefix, "tabletap:cache:");
        assert_eq!(settings.session.default_ttl_secs, 86400);
        assert_eq!(settings.session.prefix, "tabletap:session:");
    }

    #[test]
    fn test_url_overrides_discrete_fields() {
        let settings = Settings::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache.internal:6380/2"),
            ("REDIS_HOST", "ignored"),
            ("REDIS_PORT", "1234"),
        ]))
        .unwrap();
        assert_eq!(settings.redis.connection_url(), "redis://cache.internal:6380/2");
    }

    #[test]
    fn test_composed_url_from_discrete_fields() {
        let settings = Settings::from_lookup(lookup(&[
            ("REDIS_HOST", "redis.local"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "hunter2"),
            ("REDIS_DB", "3"),
        ]))
        .unwrap();
        assert_eq!(
            settings.redis.connection_url(),
            "redis://:hunter2@redis.local:6380/3"
        );
    }

    #[test]
    fn test_composed_url_without_password() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.redis.connection_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_cluster_nodes_parsing() {
        let settings = Settings::from_lookup(lookup(&[
            ("REDIS_CLUSTER_ENABLED", "true"),
            ("REDIS_CLUSTER_NODES", "n1:7000, n2:7001 ,n3:7002"),
        ]))
        .unwrap();
        assert!(settings.redis.cluster_enabled);
        assert_eq!(settings.redis.cluster_nodes, vec!["n1:7000", "n2:7001", "n3:7002"]);
        assert_eq!(
            settings.redis.cluster_node_urls(),
            vec!["redis://n1:7000", "redis://n2:7001", "redis://n3:7002"]
        );
    }

    #[test]
    fn test_cluster_requires_nodes() {
        let err = Settings::from_lookup(lookup(&[("REDIS_CLUSTER_ENABLED", "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_malformed_cluster_node_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("REDIS_CLUSTER_ENABLED", "1"),
            ("REDIS_CLUSTER_NODES", "not-a-node"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = Settings::from_lookup(lookup(&[("REDIS_PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let err =
            Settings::from_lookup(lookup(&[("REDIS_CLUSTER_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_password_treated_as_unset() {
        let settings = Settings::from_lookup(lookup(&[("REDIS_PASSWORD", "")])).unwrap();
        assert!(settings.redis.password.is_none());
    }
}
