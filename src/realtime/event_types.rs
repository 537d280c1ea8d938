//! Event name constants, window classes and tone mapping.
//!
//! Single source of truth for which push events the engine listens to and
//! how each one is classified for dedup and presentation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const EVENT_RECORD_CREATED: &str = "record:created";
pub const EVENT_RECORD_UPDATED: &str = "record:updated";
pub const EVENT_RECORD_STATUS_UPDATED: &str = "record:status_updated";
pub const EVENT_RECORD_DELETED: &str = "record:deleted";
pub const EVENT_RECORD_ASSIGNED: &str = "record:assigned";
pub const EVENT_RECORDS_BULK_ASSIGNED: &str = "records:bulk_assigned";
pub const EVENT_FOLLOWUP_DUE: &str = "followup:due";
pub const EVENT_NOTE_ADDED: &str = "note:added";
pub const EVENT_SYNC_FAILED: &str = "sync:failed";

// ---------------------------------------------------------------------------
// Cache key families
// ---------------------------------------------------------------------------

pub const FAMILY_DETAIL: &str = "detail";
pub const FAMILY_NOTES: &str = "notes";
pub const KEY_LIST_RECORDS: &str = "list:records";
pub const KEY_LIST_ASSIGNMENTS: &str = "list:assignments";
pub const KEY_LIST_FOLLOWUPS: &str = "list:followups";
pub const KEY_STATS_DASHBOARD: &str = "stats:dashboard";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Frequency class of an event, used to pick its ingress dedup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowClass {
    /// Chatty events such as record updates: short window.
    HighFrequency,
    /// Rare, salient events such as bulk assignment: longer window.
    LowFrequency,
}

/// Presentation tone of a notification. Carries no control-flow weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tone::Info => write!(f, "info"),
            Tone::Success => write!(f, "success"),
            Tone::Warning => write!(f, "warning"),
            Tone::Error => write!(f, "error"),
        }
    }
}

/// Static tone mapping by event name. Unknown names are informational.
pub fn tone_for(event_name: &str) -> Tone {
    match event_name {
        EVENT_RECORD_CREATED => Tone::Success,
        EVENT_RECORD_DELETED | EVENT_FOLLOWUP_DUE => Tone::Warning,
        EVENT_SYNC_FAILED => Tone::Error,
        _ => Tone::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_mapping() {
        assert_eq!(tone_for(EVENT_RECORD_CREATED), Tone::Success);
        assert_eq!(tone_for(EVENT_RECORD_UPDATED), Tone::Info);
        assert_eq!(tone_for(EVENT_RECORD_DELETED), Tone::Warning);
        assert_eq!(tone_for(EVENT_FOLLOWUP_DUE), Tone::Warning);
        assert_eq!(tone_for(EVENT_SYNC_FAILED), Tone::Error);
        assert_eq!(tone_for("something:else"), Tone::Info);
    }

    #[test]
    fn test_tone_serializes_lowercase() {
        let raw = serde_json::to_string(&Tone::Warning).unwrap();
        assert_eq!(raw, "\"warning\"");
        assert_eq!(Tone::Error.to_string(), "error");
    }
}
