//! Configuration for the TableTap realtime layer.
//!
//! One [`Settings`] value is the single source the connection manager, cache
//! service and session service are built from. Settings come from environment
//! variables with documented defaults; a connection URL, when present,
//! overrides the discrete host/port/password/db fields.

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result};
pub use settings::{CacheSettings, RedisSettings, SessionSettings, Settings};
