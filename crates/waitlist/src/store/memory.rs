//! In-memory entry store.
//!
//! All state sits behind one `RwLock`; a compare-and-set holds the write lock
//! for the whole check-and-update, which makes it atomic. The one-offer-per-slot
//! rule is checked under the same lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use waitlist_core::{
    EntryEvent, EntryId, EntryStatus, Error, FreedSlot, GroupKey, NewEntryEvent, Result,
    WaitlistEntry, WaitlistStats,
};

use super::{CasOutcome, EntryStore, Transition};

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<EntryId, WaitlistEntry>,
    events: Vec<EntryEvent>,
    next_sequence: i64,
    next_event_id: i64,
}

/// Entry store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryEntryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered(&self, keep: impl Fn(&WaitlistEntry) -> bool) -> Vec<WaitlistEntry> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .filter(|e| keep(*e))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn insert(&self, mut entry: WaitlistEntry) -> Result<WaitlistEntry> {
        let mut state = self.state.write().await;
        if state.entries.contains_key(&entry.id) {
            return Err(Error::Database(format!(
                "Entry '{}' already exists",
                entry.id
            )));
        }
        state.next_sequence += 1;
        entry.sequence = state.next_sequence;
        state.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: &EntryId) -> Result<Option<WaitlistEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(id).cloned())
    }

    async fn compare_and_set(&self, id: &EntryId, transition: &Transition) -> Result<CasOutcome> {
        let mut state = self.state.write().await;
        let Some(entry) = state.entries.get(id) else {
            return Ok(CasOutcome::Missing);
        };
        if !transition.admits(entry) {
            return Ok(CasOutcome::Conflict(entry.clone()));
        }
        let mut updated = entry.clone();
        transition.apply_to(&mut updated);

        if transition.claims_slot() {
            let held = updated.offered_slot().is_some_and(|slot| {
                state
                    .entries
                    .values()
                    .any(|other| &other.id != id && other.holds_offer_for(&slot))
            });
            if held {
                return Ok(CasOutcome::SlotHeld);
            }
        }

        state.entries.insert(id.clone(), updated.clone());
        Ok(CasOutcome::Applied(updated))
    }

    async fn list_by_group(
        &self,
        key: &GroupKey,
        status: EntryStatus,
    ) -> Result<Vec<WaitlistEntry>> {
        let mut entries = self
            .filtered(|e| e.status == status && &e.group_key() == key)
            .await;
        entries.sort_by_key(WaitlistEntry::fifo_key);
        Ok(entries)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<WaitlistEntry>> {
        let mut entries = self.filtered(|e| e.user_id == user_id).await;
        entries.sort_by_key(|e| std::cmp::Reverse(e.fifo_key()));
        Ok(entries)
    }

    async fn find_offer_for_slot(&self, slot: &FreedSlot) -> Result<Option<WaitlistEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .find(|e| e.holds_offer_for(slot))
            .cloned())
    }

    async fn list_offers(&self) -> Result<Vec<WaitlistEntry>> {
        Ok(self
            .filtered(|e| e.status == EntryStatus::SlotAvailable)
            .await)
    }

    async fn list_overdue_offers(&self, now: DateTime<Utc>) -> Result<Vec<WaitlistEntry>> {
        let mut entries = self.filtered(|e| e.is_offer_overdue(now)).await;
        entries.sort_by_key(WaitlistEntry::fifo_key);
        Ok(entries)
    }

    async fn list_pending_cascades(&self) -> Result<Vec<WaitlistEntry>> {
        let mut entries = self.filtered(|e| e.cascade_pending).await;
        entries.sort_by_key(|e| (e.updated_at, e.sequence));
        Ok(entries)
    }

    async fn clear_pending_cascade(&self, id: &EntryId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .entries
            .get_mut(id)
            .is_some_and(|e| std::mem::replace(&mut e.cascade_pending, false)))
    }

    async fn stats(&self) -> Result<WaitlistStats> {
        let state = self.state.read().await;
        Ok(state.entries.values().collect())
    }

    async fn append_event(&self, event: NewEntryEvent) -> Result<EntryEvent> {
        let mut state = self.state.write().await;
        state.next_event_id += 1;
        let stored = EntryEvent {
            id: state.next_event_id,
            entry_id: event.entry_id,
            event_type: event.event_type,
            details: event.details,
            created_at: event.created_at,
        };
        state.events.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_events(&self, id: &EntryId) -> Result<Vec<EntryEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| &e.entry_id == id)
            .cloned()
            .collect())
    }
}
