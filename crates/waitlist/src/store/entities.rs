//! `SQLx` database entities for the waitlist.
//!
//! Infrastructure layer types (`sqlx::FromRow` structs) separated from the
//! domain types in `waitlist-core`. Timestamps are stored as UTC
//! microseconds, dates as `YYYY-MM-DD`, times as `HH:MM:SS`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use waitlist_core::{
    AvailableSlot, EntryEvent, EntryEventType, EntryId, EntryStatus, Error, Result, TimeRange,
    WaitlistEntry,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WAITLIST ENTRY (Infrastructure Layer - sqlx dependent)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A row in the `waitlist_entries` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRow {
    pub sequence: i64,
    pub id: String,
    pub user_id: String,
    pub salon_id: String,
    pub service_id: String,
    pub staff_id: Option<String>,
    pub preferred_date: String,
    pub preferred_time_slots: String,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub offer_date: Option<String>,
    pub offer_time: Option<String>,
    pub offer_staff_id: Option<String>,
    pub offer_expires_at: Option<i64>,
    pub cascade_pending: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Column list matching `EntryRow`, for SELECT and RETURNING clauses.
pub const ENTRY_COLUMNS: &str = "sequence, id, user_id, salon_id, service_id, staff_id, \
     preferred_date, preferred_time_slots, status, offer_date, offer_time, offer_staff_id, \
     offer_expires_at, cascade_pending, created_at, updated_at";

impl TryFrom<EntryRow> for WaitlistEntry {
    type Error = Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        let preferred_time_slots: Vec<TimeRange> = serde_json::from_str(&row.preferred_time_slots)?;

        let available_slot = match (row.offer_date, row.offer_time, row.offer_expires_at) {
            (Some(date), Some(time), Some(expires_at)) => Some(AvailableSlot {
                date: parse_date(&date)?,
                time: parse_stored_time(&time)?,
                staff_id: row.offer_staff_id,
                expires_at: from_micros(expires_at)?,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Database(format!(
                    "Entry '{}' has a partially stored offer",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: EntryId::new(row.id),
            user_id: row.user_id,
            salon_id: row.salon_id,
            service_id: row.service_id,
            staff_id: row.staff_id,
            preferred_date: parse_date(&row.preferred_date)?,
            preferred_time_slots,
            status: row.status,
            available_slot,
            created_at: from_micros(row.created_at)?,
            updated_at: from_micros(row.updated_at)?,
            sequence: row.sequence,
            cascade_pending: row.cascade_pending,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENTRY EVENT (Infrastructure Layer - sqlx dependent)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A row in the `entry_events` audit table.
///
/// Events are append-only with monotonically increasing IDs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub entry_id: String,
    #[sqlx(try_from = "String")]
    pub event_type: EntryEventType,
    pub details_json: Option<String>,
    pub created_at: i64,
}

impl TryFrom<EventRow> for EntryEvent {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self> {
        let details = row
            .details_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Self {
            id: row.id,
            entry_id: EntryId::new(row.entry_id),
            event_type: row.event_type,
            details,
            created_at: from_micros(row.created_at)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COLUMN CODECS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Parse(format!("Timestamp out of range: {micros}")))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Parse(format!("Invalid stored date '{s}': {e}")))
}

fn parse_stored_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| Error::Parse(format!("Invalid stored time '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> EntryRow {
        EntryRow {
            sequence: 4,
            id: "e-1".into(),
            user_id: "u-1".into(),
            salon_id: "salon-1".into(),
            service_id: "cut".into(),
            staff_id: None,
            preferred_date: "2024-06-01".into(),
            preferred_time_slots: r#"[{"start":"10:00:00","end":"12:00:00"}]"#.into(),
            status: EntryStatus::Waiting,
            offer_date: None,
            offer_time: None,
            offer_staff_id: None,
            offer_expires_at: None,
            cascade_pending: false,
            created_at: 1_717_200_000_000_000,
            updated_at: 1_717_200_000_000_000,
        }
    }

    #[test]
    fn test_waiting_row_converts() -> Result<()> {
        let entry = WaitlistEntry::try_from(row())?;
        assert_eq!(entry.sequence, 4);
        assert_eq!(entry.preferred_time_slots.len(), 1);
        assert!(entry.available_slot.is_none());
        Ok(())
    }

    #[test]
    fn test_offer_columns_convert() -> Result<()> {
        let mut r = row();
        r.status = EntryStatus::SlotAvailable;
        r.offer_date = Some("2024-06-01".into());
        r.offer_time = Some("10:00:00".into());
        r.offer_staff_id = Some("anna".into());
        r.offer_expires_at = Some(1_717_200_300_000_000);
        let entry = WaitlistEntry::try_from(r)?;
        let offer = entry.available_slot.ok_or_else(|| Error::Parse("no offer".into()))?;
        assert_eq!(offer.staff_id.as_deref(), Some("anna"));
        assert_eq!(to_micros(offer.expires_at), 1_717_200_300_000_000);
        Ok(())
    }

    #[test]
    fn test_partial_offer_is_rejected() {
        let mut r = row();
        r.offer_date = Some("2024-06-01".into());
        assert!(WaitlistEntry::try_from(r).is_err());
    }
}
