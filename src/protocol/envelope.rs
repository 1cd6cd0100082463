//! Inbound frame envelope
//!
//! Every frame delivered by the bus carries a JSON envelope:
//!
//! ```text
//! { "table": "Token", "method": "update", "content": { "id": "T1", ... } }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::topic::{Method, Topic};

/// Identifier of one entity within a table
///
/// Envelope ids may be strings or numbers; numbers are normalized to their
/// decimal representation so `7` and `"7"` address the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// Error returned for frames that cannot be routed
#[derive(Debug)]
pub enum DecodeError {
    /// Body is not a well-formed envelope
    Json(serde_json::Error),
    /// Envelope names a table that cannot form a topic
    InvalidTable(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "Malformed envelope: {}", e),
            DecodeError::InvalidTable(table) => write!(f, "Invalid envelope table: {:?}", table),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(e) => Some(e),
            DecodeError::InvalidTable(_) => None,
        }
    }
}

/// A decoded change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Table the change applies to
    pub table: String,
    /// Kind of change
    pub method: Method,
    /// Entity fields; `id` is used for entity-scoped routing
    #[serde(default)]
    pub content: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope
    pub fn new(table: impl Into<String>, method: Method, content: Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            method,
            content,
        }
    }

    /// Decode a raw frame body
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(frame).map_err(DecodeError::Json)
    }

    /// Encode into a frame body
    pub fn encode(&self) -> Bytes {
        // Serializing a struct of strings and JSON values cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Entity id from `content.id`, if present and a string or number
    pub fn entity_id(&self) -> Option<EntityId> {
        self.content.get("id").and_then(EntityId::from_json)
    }

    /// Topic this envelope belongs to
    pub fn topic(&self) -> Result<Topic, DecodeError> {
        Topic::new(self.table.clone(), self.method)
            .map_err(|_| DecodeError::InvalidTable(self.table.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_string_id() {
        let env =
            Envelope::decode(br#"{"table":"Token","method":"update","content":{"id":"T1","minted":500}}"#)
                .unwrap();

        assert_eq!(env.table, "Token");
        assert_eq!(env.method, Method::Update);
        assert_eq!(env.entity_id(), Some(EntityId::from("T1")));
        assert_eq!(env.content["minted"], 500);
    }

    #[test]
    fn test_numeric_id_normalized() {
        let env = Envelope::decode(br#"{"table":"Block","method":"delete","content":{"id":42}}"#)
            .unwrap();
        assert_eq!(env.entity_id(), Some(EntityId::from(42u64)));
        assert_eq!(env.entity_id().unwrap().as_str(), "42");
    }

    #[test]
    fn test_missing_or_odd_id() {
        let env = Envelope::decode(br#"{"table":"Block","method":"update","content":{}}"#).unwrap();
        assert_eq!(env.entity_id(), None);

        let env =
            Envelope::decode(br#"{"table":"Block","method":"update","content":{"id":null}}"#).unwrap();
        assert_eq!(env.entity_id(), None);

        let env = Envelope::decode(br#"{"table":"Block","method":"insert"}"#).unwrap();
        assert!(env.content.is_empty());
    }

    #[test]
    fn test_malformed() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"method":"update","content":{}}"#).is_err());
        assert!(Envelope::decode(br#"{"table":"T","method":"upsert","content":{}}"#).is_err());
        assert!(Envelope::decode(br#"{"table":"T","method":"update","content":[1,2]}"#).is_err());
    }

    #[test]
    fn test_topic() {
        let env = Envelope::new("Token", Method::Insert, Map::new());
        assert_eq!(env.topic().unwrap().path(), "Token/insert");

        let env = Envelope::new("", Method::Insert, Map::new());
        assert!(matches!(env.topic(), Err(DecodeError::InvalidTable(_))));
    }
}
