//! Connection state machine
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected ──► Disconnected (drop)
//!       ▲               │                   └──► Error (protocol fault)
//!       └───────────────┘ (connect failed)
//! ```
//!
//! `Error` is terminal under [`ErrorPolicy::Terminal`](super::ErrorPolicy).

use tokio::sync::watch;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link; a reconnect may be pending
    Disconnected,
    /// Connect attempt in progress
    Connecting,
    /// Handshake complete, link up
    Connected,
    /// Protocol error; no further attempts
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Shared, observable connection state
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    /// Create a cell in the `Disconnected` state
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `state`
    ///
    /// `Error` is sticky: once entered, only [`StateCell::reset`] leaves it.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        let mut previous = state;
        self.tx.send_if_modified(|current| {
            previous = *current;
            if *current == ConnectionState::Error || *current == state {
                return false;
            }
            *current = state;
            true
        });
        previous
    }

    /// Leave the error state (used when a stopped manager is started again)
    pub fn reset(&self) {
        self.tx.send_replace(ConnectionState::Disconnected);
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
