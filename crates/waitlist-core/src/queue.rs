//! Pure FIFO queue rules.
//!
//! No I/O, no async. These functions define position and matching over a
//! snapshot of entries; the engine feeds them from the entry store.

use serde::{Deserialize, Serialize};

use crate::{
    entry::{EntryId, FreedSlot, GroupKey, WaitlistEntry},
    status::EntryStatus,
};

/// Waiting entries of `key`, oldest first.
#[must_use]
pub fn waiting_in_order<'a>(
    entries: impl IntoIterator<Item = &'a WaitlistEntry>,
    key: &GroupKey,
) -> Vec<&'a WaitlistEntry> {
    let mut waiting: Vec<&WaitlistEntry> = entries
        .into_iter()
        .filter(|e| e.status == EntryStatus::Waiting && &e.group_key() == key)
        .collect();
    waiting.sort_by_key(|e| e.fifo_key());
    waiting
}

/// 1-indexed position of `id` among the waiting entries of its group.
///
/// Returns `None` if the entry is absent or not `waiting`.
#[must_use]
pub fn position_of(entries: &[WaitlistEntry], id: &EntryId) -> Option<u32> {
    let target = entries
        .iter()
        .find(|e| &e.id == id)
        .filter(|e| e.status == EntryStatus::Waiting)?;
    let key = target.group_key();
    let ahead = entries
        .iter()
        .filter(|e| {
            e.status == EntryStatus::Waiting
                && e.group_key() == key
                && e.fifo_key() < target.fifo_key()
        })
        .count();
    u32::try_from(ahead).ok().map(|n| n + 1)
}

/// The first waiting entry, in FIFO order, eligible for `slot`.
///
/// Strict FIFO: an entry is passed over only when it is ineligible.
#[must_use]
pub fn first_eligible<'a>(
    entries: impl IntoIterator<Item = &'a WaitlistEntry>,
    slot: &FreedSlot,
) -> Option<&'a WaitlistEntry> {
    waiting_in_order(entries, &slot.group_key())
        .into_iter()
        .find(|e| e.is_eligible_for(slot))
}

/// Counts of entries per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistStats {
    pub total: usize,
    pub waiting: usize,
    pub slot_available: usize,
    pub confirmed: usize,
    pub expired: usize,
    pub cancelled: usize,
}

impl WaitlistStats {
    /// Tally a status into the counts.
    pub fn record(&mut self, status: EntryStatus, count: usize) {
        self.total += count;
        match status {
            EntryStatus::Waiting => self.waiting += count,
            EntryStatus::SlotAvailable => self.slot_available += count,
            EntryStatus::Confirmed => self.confirmed += count,
            EntryStatus::Expired => self.expired += count,
            EntryStatus::Cancelled => self.cancelled += count,
        }
    }
}

impl<'a> FromIterator<&'a WaitlistEntry> for WaitlistStats {
    fn from_iter<I: IntoIterator<Item = &'a WaitlistEntry>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut stats, entry| {
            stats.record(entry.status, 1);
            stats
        })
    }
}
