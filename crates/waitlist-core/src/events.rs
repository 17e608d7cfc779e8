//! Audit trail events for waitlist entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{entry::EntryId, status::EntryEventType};

/// An append-only record of something that happened to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryEvent {
    /// Store-assigned, monotonically increasing
    pub id: i64,
    pub entry_id: EntryId,
    pub event_type: EntryEventType,
    /// Optional JSON payload (e.g. the offered slot)
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An event waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntryEvent {
    pub entry_id: EntryId,
    pub event_type: EntryEventType,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl NewEntryEvent {
    /// Create a new event
    #[must_use]
    pub const fn new(entry_id: EntryId, event_type: EntryEventType, at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            event_type,
            details: None,
            created_at: at,
        }
    }

    /// Set the data for this event
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
