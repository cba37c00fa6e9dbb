//! Domain conveniences over the cache service and pub/sub engine.
//!
//! - [`cache`]: fixed-namespace/TTL wrappers and per-entity invalidation
//! - [`events`]: fan-out publishers for the fixed topic hierarchy

pub mod cache;
pub mod events;
