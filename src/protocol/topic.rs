//! Topic identifiers
//!
//! A topic is a `(method, table)` pair and maps to exactly one upstream
//! subscription path of the form `"<table>/<method>"`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Kind of change carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// A new entity was created
    Insert,
    /// An existing entity changed
    Update,
    /// An entity was removed
    Delete,
}

impl Method {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Insert => "insert",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }

    /// Whether interests on this method can be scoped to one entity
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self, Method::Update | Method::Delete)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Method::Insert),
            "update" => Ok(Method::Update),
            "delete" => Ok(Method::Delete),
            other => Err(ConfigError::InvalidMethod(other.to_string())),
        }
    }
}

/// Identifies one upstream subscription (table + method)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    table: String,
    method: Method,
}

impl Topic {
    /// Create a topic, validating the table name
    ///
    /// Table names must be non-empty and free of `/`, whitespace and control
    /// characters, since they are embedded in the subscription path.
    pub fn new(table: impl Into<String>, method: Method) -> Result<Self, ConfigError> {
        let table = table.into();
        validate_table(&table)?;
        Ok(Self { table, method })
    }

    /// Parse a `"<table>/<method>"` subscription path
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let (table, method) = path
            .rsplit_once('/')
            .ok_or_else(|| ConfigError::InvalidPath(path.to_string()))?;
        Self::new(table, method.parse()?)
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Upstream subscription path, e.g. `"Token/update"`
    pub fn path(&self) -> String {
        format!("{}/{}", self.table, self.method)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.table, self.method)
    }
}

fn validate_table(table: &str) -> Result<(), ConfigError> {
    let bad = table.is_empty()
        || table
            .chars()
            .any(|c| c == '/' || c.is_whitespace() || c.is_control());

    if bad {
        return Err(ConfigError::InvalidTable(table.to_string()));
    }
    Ok(())
}
