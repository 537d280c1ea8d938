use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Field names that may carry the record id, in lookup order.
const ID_ALIASES: &[&str] = &["id", "_id", "recordId", "record_id", "leadId", "lead_id"];

/// Nested objects searched for an id when the top level has none.
const NESTED_CONTAINERS: &[&str] = &["record", "lead", "data"];

/// Field names that distinguish one occurrence from a retransmission of it.
const REVISION_ALIASES: &[&str] = &[
    "version",
    "revision",
    "updatedAt",
    "updated_at",
    "eventId",
    "event_id",
];

/// A push event as received from the transport. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn subject(&self) -> Subject {
        Subject::from_payload(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an event is about, as far as the payload tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Record(RecordId),
    /// No usable id in the payload. Routed to broad targets.
    Unidentified,
}

impl Subject {
    pub fn from_payload(payload: &Value) -> Self {
        if let Some(id) = lookup(payload, ID_ALIASES) {
            return Subject::Record(RecordId(id));
        }
        for container in NESTED_CONTAINERS {
            if let Some(id) = payload.get(*container).and_then(|v| lookup(v, ID_ALIASES)) {
                return Subject::Record(RecordId(id));
            }
        }
        Subject::Unidentified
    }

    pub fn record_id(&self) -> Option<&RecordId> {
        match self {
            Subject::Record(id) => Some(id),
            Subject::Unidentified => None,
        }
    }
}

/// Identity of a logical occurrence, used by the ingress dedup window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derive the key for an event. Pure; falls back to the bare event name
    /// when the payload has no record id.
    pub fn for_event(event: &Event) -> Self {
        match event.subject() {
            Subject::Record(id) => match lookup(&event.payload, REVISION_ALIASES) {
                Some(revision) => Self(format!("{}|{}|{}", event.name, id, revision)),
                None => Self(format!("{}|{}", event.name, id)),
            },
            Subject::Unidentified => Self(event.name.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DedupKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DedupKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn lookup(value: &Value, aliases: &[&str]) -> Option<String> {
    let object = value.as_object()?;
    aliases
        .iter()
        .filter_map(|alias| object.get(*alias))
        .find_map(scalar_to_id)
}

fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "undefined" || trimmed == "null" {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
