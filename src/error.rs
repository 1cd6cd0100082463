//! Error types
//!
//! Runtime conditions (drops, handshake failures, malformed frames) are
//! contained inside the multiplexer and surface only as missing updates.
//! The errors here cover caller misuse and explicit bus operations.

use crate::bus::BusError;

/// Invalid subscription parameters supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Table name is empty or contains `/`, whitespace or control characters
    InvalidTable(String),
    /// Method is not one of `insert`, `update`, `delete`
    InvalidMethod(String),
    /// Subscription path is not of the form `<table>/<method>`
    InvalidPath(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidTable(table) => write!(f, "Invalid table name: {:?}", table),
            ConfigError::InvalidMethod(method) => write!(f, "Invalid method: {:?}", method),
            ConfigError::InvalidPath(path) => write!(f, "Invalid topic path: {:?}", path),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Crate-level error
#[derive(Debug)]
pub enum Error {
    /// Caller supplied invalid parameters
    Config(ConfigError),
    /// Operation needs a live connection
    NotConnected,
    /// Connection is in the terminal error state
    Errored,
    /// The bus rejected the operation
    Bus(BusError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::NotConnected => write!(f, "Not connected to the message bus"),
            Error::Errored => write!(f, "Connection is in terminal error state"),
            Error::Bus(e) => write!(f, "Bus error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Bus(e) => Some(e),
            Error::NotConnected | Error::Errored => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Error::Bus(e)
    }
}

/// Result alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
