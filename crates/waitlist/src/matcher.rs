//! Slot Matcher - picks the first eligible waiting entry for a freed slot.

use std::sync::Arc;

use waitlist_core::{first_eligible, EntryStatus, FreedSlot, GroupKey, Result, WaitlistEntry};

use crate::{keylock::KeyGuard, store::EntryStore};

pub struct SlotMatcher {
    store: Arc<dyn EntryStore>,
}

impl SlotMatcher {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// The first waiting entry, in FIFO order, that accepts `slot`.
    ///
    /// `guard` must hold the slot's grouping key. `None` means nobody wants
    /// the slot and it goes back to the open pool.
    pub async fn find_match(
        &self,
        slot: &FreedSlot,
        guard: &KeyGuard<GroupKey>,
    ) -> Result<Option<WaitlistEntry>> {
        let key = slot.group_key();
        debug_assert_eq!(guard.key(), &key);
        let waiting = self.store.list_by_group(&key, EntryStatus::Waiting).await?;
        Ok(first_eligible(&waiting, slot).cloned())
    }

    pub async fn waiting_count(&self, key: &GroupKey) -> Result<usize> {
        Ok(self
            .store
            .list_by_group(key, EntryStatus::Waiting)
            .await?
            .len())
    }
}
