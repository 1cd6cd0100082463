//! Connection configuration

use std::time::Duration;

use crate::bus::ConnectOptions;

/// What to do when the bus reports a protocol-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Enter the sticky error state and stop reconnecting
    Terminal,
    /// Treat the error like a dropped link and reconnect after the delay
    Retry,
}

/// Connection options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before the first reconnect attempt
    pub reconnect_delay: Duration,

    /// Upper bound for exponential backoff (None = fixed delay)
    pub max_reconnect_delay: Option<Duration>,

    /// Handshake must complete within this time
    pub connect_timeout: Duration,

    /// Interval at which we send heartbeats
    pub heartbeat_outgoing: Duration,

    /// Interval at which the bus must send heartbeats
    pub heartbeat_incoming: Duration,

    /// Handling of protocol errors
    pub error_policy: ErrorPolicy,

    /// While connected, how often topics whose upstream subscribe was
    /// rejected are retried
    pub resubscribe_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: None,
            connect_timeout: Duration::from_secs(10),
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            error_policy: ErrorPolicy::Terminal,
            resubscribe_interval: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Double the delay after each failed attempt, up to `max`
    pub fn exponential_backoff(mut self, max: Duration) -> Self {
        self.max_reconnect_delay = Some(max.max(self.reconnect_delay));
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set both heartbeat intervals
    pub fn heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    /// Set the protocol error policy
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Set the retry interval for rejected upstream subscriptions
    pub fn resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval;
        self
    }

    /// Options handed to the bus on connect
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            heartbeat_outgoing: self.heartbeat_outgoing,
            heartbeat_incoming: self.heartbeat_incoming,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self.max_reconnect_delay {
            None => self.reconnect_delay,
            Some(max) => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                self.reconnect_delay.saturating_mul(factor).min(max)
            }
        }
    }
}
