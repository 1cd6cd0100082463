//! Real-time update multiplexer
//!
//! Keeps a single connection to a topic-based message bus and shares it
//! between any number of consumers. Each consumer registers an *interest*
//! in a `(table, method)` topic, optionally scoped to one entity id; the
//! multiplexer keeps exactly one upstream subscription per topic that has
//! interests, and routes every inbound frame to the callbacks that want it.
//!
//! - [`registry`]: desired state, the interests per topic
//! - [`tracker`]: actual state, the upstream subscription per topic
//! - [`router`]: decodes frames and fans them out to callbacks
//! - [`connection`]: connect, reconnect, terminal error handling
//! - [`bus`]: the transport capability, plus an in-memory implementation
//!
//! Delivery is best effort and at most once. Frames published while the
//! link is down are not replayed; consumers should fetch current state on
//! their own when they start.

pub mod bus;
pub mod connection;
pub mod error;
pub mod mux;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod stats;
pub mod tracker;

pub use bus::{MemoryBus, MessageBus};
pub use connection::{ConnectionConfig, ConnectionState, ErrorPolicy};
pub use error::{ConfigError, Error, Result};
pub use mux::Multiplexer;
pub use protocol::{EntityId, Envelope, Method, Topic};
pub use stats::MuxStats;
