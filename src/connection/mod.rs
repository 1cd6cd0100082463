//! Bus connection lifecycle
//!
//! - Connects in a background task; callers never block on it
//! - Reconnects after a fixed delay (or capped exponential backoff) when the
//!   link drops or cannot be established
//! - Protocol errors are terminal or retried, per [`ErrorPolicy`]
//! - Heartbeat intervals are handed to the bus, which enforces them

pub mod config;
pub mod manager;
pub mod state;

pub use config::{ConnectionConfig, ErrorPolicy};
pub use manager::{ConnectionHooks, ConnectionManager};
pub use state::{ConnectionState, StateCell};
