pub mod events;

pub use events::{EventBroadcaster, EventEnvelope};
