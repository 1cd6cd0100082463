//! Message-bus capability
//!
//! The multiplexer never touches the wire. It talks to the bus through the
//! [`MessageBus`] trait, which a STOMP-over-WebSocket client (or any other
//! topic-based bus) implements:
//!
//! ```text
//!   Multiplexer ──connect()──────────► MessageBus ──► wire
//!       │       ──subscribe_topic()──►     │
//!       │       ──unsubscribe_topic()─►    │
//!       │                                  │
//!       └◄──── FrameHandler(Bytes) ◄───────┘
//! ```
//!
//! Frame encoding and heartbeats on the wire belong to the implementation.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

pub use memory::MemoryBus;

/// Callback invoked by the bus for every frame on a subscribed path
pub type FrameHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Opaque handle for one upstream subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Create a handle from a bus-assigned id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Bus-assigned id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Options passed to [`MessageBus::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Interval at which the client sends heartbeats
    pub heartbeat_outgoing: Duration,
    /// Interval at which the server is expected to send heartbeats
    pub heartbeat_incoming: Duration,
}

/// Why an established link ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Transport dropped (socket closed, missed heartbeats)
    Dropped,
    /// Bus reported a protocol-level error
    ProtocolError(String),
}

/// Failure to establish a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Transport could not connect; retried after the reconnect delay
    Transport(String),
    /// Handshake rejected by the bus
    Protocol(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ConnectError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Failure of a subscribe or send request on a live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No link is established
    NotConnected,
    /// The bus refused the request
    Rejected(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::NotConnected => write!(f, "Bus not connected"),
            BusError::Rejected(msg) => write!(f, "Bus rejected request: {}", msg),
        }
    }
}

impl std::error::Error for BusError {}

/// An established link
///
/// Resolves once, when the link ends. Subscriptions made on the link are
/// invalid afterwards.
pub struct BusLink {
    closed: oneshot::Receiver<CloseReason>,
}

impl BusLink {
    /// Create a link and the closer the bus uses to end it
    ///
    /// Dropping the closer without calling [`LinkCloser::close`] reports
    /// [`CloseReason::Dropped`].
    pub fn new() -> (Self, LinkCloser) {
        let (tx, rx) = oneshot::channel();
        (Self { closed: rx }, LinkCloser { tx })
    }

    /// Wait until the link ends
    pub async fn closed(self) -> CloseReason {
        self.closed.await.unwrap_or(CloseReason::Dropped)
    }
}

/// Bus-side end of a [`BusLink`]
#[derive(Debug)]
pub struct LinkCloser {
    tx: oneshot::Sender<CloseReason>,
}

impl LinkCloser {
    /// End the link with the given reason
    pub fn close(self, reason: CloseReason) {
        let _ = self.tx.send(reason);
    }
}

/// Topic-based message bus
///
/// `subscribe_topic` must not invoke the handler synchronously; the caller
/// may hold internal locks while subscribing.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Establish a link and complete the bus handshake
    async fn connect(&self, options: &ConnectOptions) -> Result<BusLink, ConnectError>;

    /// Subscribe to a `"<table>/<method>"` path on the current link
    fn subscribe_topic(
        &self,
        path: &str,
        on_message: FrameHandler,
    ) -> Result<SubscriptionHandle, BusError>;

    /// Cancel an upstream subscription; unknown handles are ignored
    fn unsubscribe_topic(&self, handle: SubscriptionHandle);

    /// Publish a frame to a path
    fn send(&self, path: &str, body: Bytes) -> Result<(), BusError>;

    /// Close the current link, if any
    ///
    /// Subscriptions on the link are discarded. Called on teardown after the
    /// connection task has been stopped, so the link's close signal may have
    /// no listener.
    fn disconnect(&self);
}
