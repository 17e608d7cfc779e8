//! Waitlist entry types

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{status::EntryStatus, Error, Result};

/// Unique waitlist entry identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Create an entry ID from an existing value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random entry ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TIME RANGE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Half-open time range `[start, end)` within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    /// Create a range, rejecting empty or inverted ones.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start >= end {
            return Err(Error::validation(
                "preferred_time_slots",
                format!("range {start}-{end} must end after it starts"),
            ));
        }
        Ok(Self { start, end })
    }

    /// True if `time` falls inside the range.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    /// True if the two ranges share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

impl FromStr for TimeRange {
    type Err = Error;

    /// Parses `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s.split_once('-').ok_or_else(|| {
            Error::validation(
                "preferred_time_slots",
                format!("expected HH:MM-HH:MM, got '{s}'"),
            )
        })?;
        let bound = |part: &str| {
            parse_time(part.trim()).map_err(|_| {
                Error::validation(
                    "preferred_time_slots",
                    format!("invalid time '{}' in '{s}'", part.trim()),
                )
            })
        };
        Self::new(bound(start)?, bound(end)?)
    }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) wall-clock time.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| Error::Parse(format!("Invalid time '{s}': {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GROUPING KEY & SLOTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The (salon, service, date) key that orders a queue and serializes work on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub salon_id: String,
    pub service_id: String,
    pub date: NaiveDate,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.salon_id, self.service_id, self.date)
    }
}

/// A unit of capacity that just became bookable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreedSlot {
    pub salon_id: String,
    pub service_id: String,
    pub staff_id: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl FreedSlot {
    /// Reject blank ids and times finer than whole seconds.
    ///
    /// Stored offers keep second precision, so a sub-second slot could never
    /// be matched back to its offer.
    pub fn validate(&self) -> Result<()> {
        require_non_blank("salon_id", &self.salon_id)?;
        require_non_blank("service_id", &self.service_id)?;
        if let Some(staff_id) = &self.staff_id {
            require_non_blank("staff_id", staff_id)?;
        }
        if self.time.nanosecond() != 0 {
            return Err(Error::validation(
                "time",
                format!("{} has a fractional second", self.time),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            salon_id: self.salon_id.clone(),
            service_id: self.service_id.clone(),
            date: self.date,
        }
    }
}

impl fmt::Display for FreedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {} (staff: {})",
            self.salon_id,
            self.service_id,
            self.date,
            self.time.format("%H:%M"),
            self.staff_id.as_deref().unwrap_or("any")
        )
    }
}

/// The outstanding offer attached to an entry in `slot_available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub staff_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AvailableSlot {
    /// Build the offer for a freed slot, valid for `ttl` from `now`.
    #[must_use]
    pub fn for_slot(slot: &FreedSlot, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            date: slot.date,
            time: slot.time,
            staff_id: slot.staff_id.clone(),
            expires_at: now + ttl,
        }
    }

    /// True while the offer can still be confirmed.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero once overdue.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WAITLIST ENTRY
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A customer's request to be offered a slot if one frees up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: EntryId,
    pub user_id: String,
    pub salon_id: String,
    pub service_id: String,
    /// Required staff member; `None` accepts anyone.
    pub staff_id: Option<String>,
    pub preferred_date: NaiveDate,
    /// Sorted by start, non-overlapping.
    pub preferred_time_slots: Vec<TimeRange>,
    pub status: EntryStatus,
    pub available_slot: Option<AvailableSlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store-assigned insertion order; breaks `created_at` ties.
    pub sequence: i64,
    /// Set when the entry gave up its offer and the slot still has to be
    /// passed down the queue. `available_slot` keeps the slot until then.
    #[serde(default)]
    pub cascade_pending: bool,
}

impl WaitlistEntry {
    /// Create a `waiting` entry from a validated join request.
    ///
    /// `sequence` is left at zero; the store assigns it on insert.
    #[must_use]
    pub fn new(id: EntryId, request: JoinRequest, now: DateTime<Utc>) -> Self {
        let preferred_time_slots = request.preferred_time_slots.into_iter().sorted().collect();
        Self {
            id,
            user_id: request.user_id,
            salon_id: request.salon_id,
            service_id: request.service_id,
            staff_id: request.staff_id,
            preferred_date: request.preferred_date,
            preferred_time_slots,
            status: EntryStatus::Waiting,
            available_slot: None,
            created_at: now,
            updated_at: now,
            sequence: 0,
            cascade_pending: false,
        }
    }

    #[must_use]
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            salon_id: self.salon_id.clone(),
            service_id: self.service_id.clone(),
            date: self.preferred_date,
        }
    }

    /// FIFO sort key.
    #[must_use]
    pub const fn fifo_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.sequence)
    }

    /// True if this entry could take `slot`, ignoring its current status.
    #[must_use]
    pub fn accepts(&self, slot: &FreedSlot) -> bool {
        let same_group = self.salon_id == slot.salon_id
            && self.service_id == slot.service_id
            && self.preferred_date == slot.date;
        let staff_ok = self
            .staff_id
            .as_ref()
            .map_or(true, |wanted| slot.staff_id.as_ref() == Some(wanted));
        let time_ok = self
            .preferred_time_slots
            .iter()
            .any(|range| range.contains(slot.time));
        same_group && staff_ok && time_ok
    }

    /// True if the entry is `waiting` and accepts `slot`.
    #[must_use]
    pub fn is_eligible_for(&self, slot: &FreedSlot) -> bool {
        self.status == EntryStatus::Waiting && self.accepts(slot)
    }

    /// Reconstruct the freed slot behind the outstanding offer.
    #[must_use]
    pub fn offered_slot(&self) -> Option<FreedSlot> {
        self.available_slot.as_ref().map(|offer| FreedSlot {
            salon_id: self.salon_id.clone(),
            service_id: self.service_id.clone(),
            staff_id: offer.staff_id.clone(),
            date: offer.date,
            time: offer.time,
        })
    }

    /// True if this entry holds an offer for exactly `slot`.
    #[must_use]
    pub fn holds_offer_for(&self, slot: &FreedSlot) -> bool {
        self.status == EntryStatus::SlotAvailable && self.offered_slot().as_ref() == Some(slot)
    }

    /// True if the entry holds an offer whose deadline has passed.
    #[must_use]
    pub fn is_offer_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::SlotAvailable
            && self
                .available_slot
                .as_ref()
                .is_some_and(|offer| !offer.is_live(now))
    }
}

/// An entry together with its computed queue position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryListing {
    #[serde(flatten)]
    pub entry: WaitlistEntry,
    /// Present only while `waiting`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JOIN REQUEST
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Criteria submitted when a customer joins the waitlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_id: String,
    pub salon_id: String,
    pub service_id: String,
    pub staff_id: Option<String>,
    pub preferred_date: NaiveDate,
    pub preferred_time_slots: Vec<TimeRange>,
}

impl JoinRequest {
    /// Validate the request against `today`, naming the first field that fails.
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        require_non_blank("user_id", &self.user_id)?;
        require_non_blank("salon_id", &self.salon_id)?;
        require_non_blank("service_id", &self.service_id)?;
        if let Some(staff_id) = &self.staff_id {
            require_non_blank("staff_id", staff_id)?;
        }

        if self.preferred_date < today {
            return Err(Error::validation(
                "preferred_date",
                format!("{} is in the past", self.preferred_date),
            ));
        }

        if self.preferred_time_slots.is_empty() {
            return Err(Error::validation(
                "preferred_time_slots",
                "at least one time range is required",
            ));
        }

        if let Some(bad) = self.preferred_time_slots.iter().find(|r| r.start >= r.end) {
            return Err(Error::validation(
                "preferred_time_slots",
                format!("range {bad} must end after it starts"),
            ));
        }

        let sorted: Vec<&TimeRange> = self.preferred_time_slots.iter().sorted().collect();
        if let Some((a, b)) = sorted
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.overlaps(b))
        {
            return Err(Error::validation(
                "preferred_time_slots",
                format!("ranges {a} and {b} overlap"),
            ));
        }

        Ok(())
    }
}

fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::validation(field, "must not be blank"))
    } else {
        Ok(())
    }
}
