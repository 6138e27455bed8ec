// ABOUTME: Change event delivered to the host for every object seen in the container
// ABOUTME: Carries key, optional payload, action metadata, resume position and creation time

use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::position::Position;

pub const METADATA_ACTION: &str = "action";
pub const METADATA_CONTENT_TYPE: &str = "content-type";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    pub fn from_metadata(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(Action::Insert),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    /// An object whose creation and modification times match has never been
    /// overwritten.
    pub fn detect(created_at: DateTime<Utc>, last_modified: DateTime<Utc>) -> Self {
        if created_at == last_modified {
            Action::Insert
        } else {
            Action::Update
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    /// Object body; always `None` for deletes.
    pub payload: Option<Vec<u8>>,
    pub metadata: BTreeMap<String, String>,
    pub position: Position,
    pub created_at: DateTime<Utc>,
}

impl Record {
    pub fn upsert(
        action: Action,
        key: String,
        payload: Vec<u8>,
        content_type: String,
        position: Position,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ACTION.to_string(), action.as_str().to_string());
        metadata.insert(METADATA_CONTENT_TYPE.to_string(), content_type);
        Self {
            key,
            payload: Some(payload),
            metadata,
            position,
            created_at,
        }
    }

    pub fn delete(key: String, position: Position, created_at: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            METADATA_ACTION.to_string(),
            Action::Delete.as_str().to_string(),
        );
        Self {
            key,
            payload: None,
            metadata,
            position,
            created_at,
        }
    }

    pub fn action(&self) -> Option<Action> {
        self.metadata
            .get(METADATA_ACTION)
            .and_then(|value| Action::from_metadata(value))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(METADATA_CONTENT_TYPE).map(String::as_str)
    }

    /// The host-facing shape: key bytes, payload, metadata, opaque position, created-at.
    pub fn to_wire(&self) -> Result<WireRecord<'_>> {
        let engine = &base64::engine::general_purpose::STANDARD;
        Ok(WireRecord {
            key: &self.key,
            payload: self.payload.as_ref().map(|p| engine.encode(p)),
            metadata: &self.metadata,
            position: engine.encode(self.position.encode()?),
            created_at: self.created_at,
        })
    }
}

/// JSON-friendly view of a [`Record`]; binary fields are base64 encoded.
#[derive(Debug, Serialize)]
pub struct WireRecord<'a> {
    pub key: &'a str,
    pub payload: Option<String>,
    pub metadata: &'a BTreeMap<String, String>,
    pub position: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_action_detection() {
        let t = Utc::now();
        assert_eq!(Action::detect(t, t), Action::Insert);
        assert_eq!(Action::detect(t, t + Duration::seconds(1)), Action::Update);
    }

    #[test]
    fn test_delete_record_has_no_payload() {
        let t = Utc::now();
        let r = Record::delete("gone.txt".into(), Position::change("gone.txt", t), t);
        assert_eq!(r.action(), Some(Action::Delete));
        assert!(r.payload.is_none());
        assert!(r.content_type().is_none());
    }

    #[test]
    fn test_wire_record_encodes_binary_fields() {
        let t = Utc::now();
        let r = Record::upsert(
            Action::Insert,
            "a.txt".into(),
            b"hi".to_vec(),
            "text/plain".into(),
            Position::snapshot("a.txt", t),
            t,
        );
        let json = serde_json::to_value(r.to_wire().unwrap()).unwrap();
        assert_eq!(json["key"], "a.txt");
        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["metadata"]["action"], "insert");
        assert_eq!(json["metadata"]["content-type"], "text/plain");

        let engine = &base64::engine::general_purpose::STANDARD;
        let position = engine.decode(json["position"].as_str().unwrap()).unwrap();
        assert_eq!(Position::decode(&position).unwrap(), r.position);
    }
}
