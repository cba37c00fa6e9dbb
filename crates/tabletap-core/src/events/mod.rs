//! Event infrastructure for the TableTap realtime layer.
//!
//! Every message that crosses Redis pub/sub is wrapped in an [`EventEnvelope`]
//! and fanned out in-process through the [`EventBroadcaster`], a thin wrapper
//! around tokio's broadcast channel. Consumers filter the shared stream
//! client-side; there is no per-consumer isolation on the wire.
//!
//! # Architecture
//!
//! ```text
//! Redis subscriber connection
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────┐
//! │              Event Broadcaster              │
//! │        (tokio::sync::broadcast channel)     │
//! └─────────────────────────────────────────────┘
//!      │               │               │
//!      ▼               ▼               ▼
//!  exact filter   pattern filter  prefix filter
//!  (channel)      (psubscribe)    (cafe/counter/order)
//! ```
//!
//! # Module Structure
//!
//! - [`envelope`]: the wire envelope around every published payload
//! - [`broadcaster`]: the shared in-process broadcast hub
//! - [`topics`]: the fixed domain channel naming scheme

pub mod broadcaster;
pub mod envelope;
pub mod topics;

pub use broadcaster::EventBroadcaster;
pub use envelope::EventEnvelope;
