//! Entry Store - persistence boundary for waitlist entries.
//!
//! The `EntryStore` trait abstracts durable keyed storage so the engine can run
//! over `SQLite` in production and an in-memory map in tests. Stores hold no
//! business rules beyond the compare-and-set primitive every status change
//! goes through.

pub mod entities;
pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use waitlist_core::{
    AvailableSlot, EntryEvent, EntryId, EntryStatus, FreedSlot, GroupKey, NewEntryEvent, Result,
    TransitionError, WaitlistEntry, WaitlistStats,
};

pub use memory::InMemoryEntryStore;
pub use sqlite::SqliteEntryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TRANSITIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extra condition on the offer deadline checked inside the CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferGuard {
    /// No deadline condition.
    None,
    /// `expires_at > at`: the offer is still live.
    LiveAt(DateTime<Utc>),
    /// `expires_at <= at`: the offer is overdue.
    OverdueAt(DateTime<Utc>),
}

impl OfferGuard {
    /// Evaluate the guard against an entry's current offer.
    #[must_use]
    pub fn admits(&self, offer: Option<&AvailableSlot>) -> bool {
        match self {
            Self::None => true,
            Self::LiveAt(at) => offer.is_some_and(|o| o.expires_at > *at),
            Self::OverdueAt(at) => offer.is_some_and(|o| o.expires_at <= *at),
        }
    }
}

/// What happens to `available_slot` when a transition applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotChange {
    Set(AvailableSlot),
    Clear,
    /// Leave the slot in place for a pending cascade.
    Keep,
}

/// An atomic compare-and-set on an entry's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: EntryStatus,
    pub to: EntryStatus,
    pub guard: OfferGuard,
    pub slot: SlotChange,
    /// Value written to `cascade_pending` in the same step.
    pub pending_cascade: bool,
    pub at: DateTime<Utc>,
}

impl Transition {
    fn checked(
        from: EntryStatus,
        to: EntryStatus,
        guard: OfferGuard,
        slot: SlotChange,
        at: DateTime<Utc>,
    ) -> std::result::Result<Self, TransitionError> {
        from.validate_transition(to)?;
        Ok(Self {
            from,
            to,
            guard,
            slot,
            pending_cascade: false,
            at,
        })
    }

    /// Keep the offered slot and mark it as owed to the next in line.
    fn handing_on(self) -> Self {
        Self {
            slot: SlotChange::Keep,
            pending_cascade: true,
            ..self
        }
    }

    /// `waiting -> slot_available` carrying the new offer.
    pub fn offer(
        offer: AvailableSlot,
        at: DateTime<Utc>,
    ) -> std::result::Result<Self, TransitionError> {
        Self::checked(
            EntryStatus::Waiting,
            EntryStatus::SlotAvailable,
            OfferGuard::None,
            SlotChange::Set(offer),
            at,
        )
    }

    /// `waiting -> cancelled`.
    pub fn leave(at: DateTime<Utc>) -> std::result::Result<Self, TransitionError> {
        Self::checked(
            EntryStatus::Waiting,
            EntryStatus::Cancelled,
            OfferGuard::None,
            SlotChange::Clear,
            at,
        )
    }

    /// `slot_available -> confirmed`, only while the offer is live.
    pub fn confirm(at: DateTime<Utc>) -> std::result::Result<Self, TransitionError> {
        Self::checked(
            EntryStatus::SlotAvailable,
            EntryStatus::Confirmed,
            OfferGuard::LiveAt(at),
            SlotChange::Clear,
            at,
        )
    }

    /// `slot_available -> cancelled`, leaving a pending cascade behind.
    pub fn skip(at: DateTime<Utc>) -> std::result::Result<Self, TransitionError> {
        Self::checked(
            EntryStatus::SlotAvailable,
            EntryStatus::Cancelled,
            OfferGuard::None,
            SlotChange::Clear,
            at,
        )
        .map(Self::handing_on)
    }

    /// `slot_available -> expired`, only once the offer is overdue. Leaves a
    /// pending cascade behind.
    pub fn expire(at: DateTime<Utc>) -> std::result::Result<Self, TransitionError> {
        Self::checked(
            EntryStatus::SlotAvailable,
            EntryStatus::Expired,
            OfferGuard::OverdueAt(at),
            SlotChange::Clear,
            at,
        )
        .map(Self::handing_on)
    }

    /// Compensation for a failed booking: `confirmed -> slot_available` with
    /// the original offer restored unchanged.
    ///
    /// This is the only way out of a terminal status and is used solely by
    /// the confirm operation that made the confirmation, under the key lock.
    #[must_use]
    pub const fn revert_confirmation(offer: AvailableSlot, at: DateTime<Utc>) -> Self {
        Self {
            from: EntryStatus::Confirmed,
            to: EntryStatus::SlotAvailable,
            guard: OfferGuard::None,
            slot: SlotChange::Set(offer),
            pending_cascade: false,
            at,
        }
    }

    /// True if applying this transition puts a slot on offer.
    #[must_use]
    pub fn claims_slot(&self) -> bool {
        self.to == EntryStatus::SlotAvailable && matches!(self.slot, SlotChange::Set(_))
    }

    /// True if the transition may apply to `entry` as it is now.
    #[must_use]
    pub fn admits(&self, entry: &WaitlistEntry) -> bool {
        entry.status == self.from && self.guard.admits(entry.available_slot.as_ref())
    }

    /// Apply the transition to an entry that `admits` it.
    pub fn apply_to(&self, entry: &mut WaitlistEntry) {
        entry.status = self.to;
        entry.updated_at = self.at;
        match &self.slot {
            SlotChange::Set(offer) => entry.available_slot = Some(offer.clone()),
            SlotChange::Clear => entry.available_slot = None,
            SlotChange::Keep => {}
        }
        entry.cascade_pending = self.pending_cascade;
    }
}

/// Result of a compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The transition applied; carries the updated entry.
    Applied(WaitlistEntry),
    /// The entry exists but did not match; carries its current state.
    Conflict(WaitlistEntry),
    /// No entry with that id.
    Missing,
    /// The transition would offer a slot that another entry already holds.
    SlotHeld,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STORE TRAIT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait defining the persistence boundary for waitlist entries.
///
/// Implementations must make `compare_and_set` atomic: the status check,
/// the guard check and the write happen as one step. At most one entry may
/// hold an offer for a given physical slot; a transition that would break
/// that yields `CasOutcome::SlotHeld`, even across processes sharing a store.
#[async_trait::async_trait]
pub trait EntryStore: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // ENTRY OPERATIONS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Persist a new entry, assigning its `sequence`.
    async fn insert(&self, entry: WaitlistEntry) -> Result<WaitlistEntry>;

    /// Get an entry by id.
    async fn get(&self, id: &EntryId) -> Result<Option<WaitlistEntry>>;

    /// Atomically apply `transition` if the entry still matches it.
    async fn compare_and_set(&self, id: &EntryId, transition: &Transition) -> Result<CasOutcome>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // INDEXED QUERIES
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Entries of a grouping key with `status`, oldest `(created_at, sequence)` first.
    async fn list_by_group(&self, key: &GroupKey, status: EntryStatus)
        -> Result<Vec<WaitlistEntry>>;

    /// All entries of a user, newest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<WaitlistEntry>>;

    /// The entry currently holding an offer for exactly this physical slot.
    async fn find_offer_for_slot(&self, slot: &FreedSlot) -> Result<Option<WaitlistEntry>>;

    /// All entries in `slot_available`.
    async fn list_offers(&self) -> Result<Vec<WaitlistEntry>>;

    /// Entries in `slot_available` whose `expires_at <= now`.
    async fn list_overdue_offers(&self, now: DateTime<Utc>) -> Result<Vec<WaitlistEntry>>;

    /// Entries whose freed slot has not been passed on yet, oldest first.
    async fn list_pending_cascades(&self) -> Result<Vec<WaitlistEntry>>;

    /// Mark the cascade for `id` as done. Returns false if it was not pending.
    async fn clear_pending_cascade(&self, id: &EntryId) -> Result<bool>;

    /// Entry counts per status.
    async fn stats(&self) -> Result<WaitlistStats>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // EVENT AUDIT TRAIL
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append an event to the audit trail.
    async fn append_event(&self, event: NewEntryEvent) -> Result<EntryEvent>;

    /// Fetch all events for an entry, oldest first.
    async fn fetch_events(&self, id: &EntryId) -> Result<Vec<EntryEvent>>;
}

/// Append an audit event, logging instead of failing.
///
/// The transition it describes has already been committed.
pub async fn record_event(store: &dyn EntryStore, event: NewEntryEvent) {
    let entry_id = event.entry_id.clone();
    let event_type = event.event_type;
    if let Err(e) = store.append_event(event).await {
        tracing::warn!(
            entry_id = %entry_id,
            event_type = %event_type,
            error = %e,
            "Failed to append audit event"
        );
    }
}
