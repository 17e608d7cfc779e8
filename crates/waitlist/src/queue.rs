//! Waitlist Queue - the ordered view over the entry store.
//!
//! Queue order is never stored. It is the `(created_at, sequence)` order of
//! `waiting` entries in a grouping key, read back from the store's index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use waitlist_core::{
    position_of, Clock, EntryEventType, EntryId, EntryListing, EntryStatus, Error, GroupKey,
    JoinRequest, NewEntryEvent, Result, TransitionError, WaitlistEntry,
};

use crate::{
    keylock::KeyGuard,
    store::{record_event, CasOutcome, EntryStore, Transition},
};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub entry: WaitlistEntry,
    pub position: u32,
    pub total_waiting: usize,
}

pub struct WaitlistQueue {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
}

impl WaitlistQueue {
    pub fn new(store: Arc<dyn EntryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate `request` and enqueue a new `waiting` entry at the back.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` naming the failing field, including `user_id`
    ///   when the user already has an active entry for this key
    /// - `Error::Database` if the store fails
    pub async fn join(
        &self,
        request: JoinRequest,
        guard: &KeyGuard<GroupKey>,
    ) -> Result<JoinResponse> {
        let now = self.clock.now();
        request.validate(now.date_naive())?;

        let key = GroupKey {
            salon_id: request.salon_id.clone(),
            service_id: request.service_id.clone(),
            date: request.preferred_date,
        };
        debug_assert_eq!(guard.key(), &key);

        let duplicate = self
            .store
            .list_by_user(&request.user_id)
            .await?
            .into_iter()
            .find(|e| e.status.is_active() && e.group_key() == key);
        if let Some(existing) = duplicate {
            return Err(Error::validation(
                "user_id",
                format!(
                    "user already has an active entry {} for {key}",
                    existing.id
                ),
            ));
        }

        let entry = self
            .store
            .insert(WaitlistEntry::new(EntryId::generate(), request, now))
            .await?;
        record_event(
            self.store.as_ref(),
            NewEntryEvent::new(entry.id.clone(), EntryEventType::Joined, now),
        )
        .await;

        let waiting = self.waiting(&key).await?;
        let position = position_of(&waiting, &entry.id).ok_or_else(|| {
            Error::Database(format!("Entry '{}' missing from its queue", entry.id))
        })?;

        tracing::info!(
            entry_id = %entry.id,
            user_id = %entry.user_id,
            key = %key,
            position,
            "Joined waitlist"
        );

        Ok(JoinResponse {
            entry,
            position,
            total_waiting: waiting.len(),
        })
    }

    /// Cancel a `waiting` entry.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the entry does not exist
    /// - `Error::InvalidStateTransition` if it is not `waiting`
    pub async fn leave(&self, id: &EntryId, guard: &KeyGuard<GroupKey>) -> Result<WaitlistEntry> {
        let now = self.clock.now();
        match self.store.compare_and_set(id, &Transition::leave(now)?).await? {
            CasOutcome::Applied(entry) => {
                debug_assert_eq!(guard.key(), &entry.group_key());
                record_event(
                    self.store.as_ref(),
                    NewEntryEvent::new(id.clone(), EntryEventType::Left, now),
                )
                .await;
                tracing::info!(entry_id = %id, "Left waitlist");
                Ok(entry)
            }
            CasOutcome::Conflict(current) => Err(TransitionError {
                from: current.status,
                to: EntryStatus::Cancelled,
            }
            .into()),
            CasOutcome::Missing => Err(Error::NotFound(id.clone())),
            CasOutcome::SlotHeld => Err(Error::Database(format!(
                "Store reported a slot conflict while cancelling '{id}'"
            ))),
        }
    }

    /// Waiting entries of `key`, oldest first.
    pub async fn waiting(&self, key: &GroupKey) -> Result<Vec<WaitlistEntry>> {
        self.store.list_by_group(key, EntryStatus::Waiting).await
    }

    /// Current 1-indexed position of `entry`, `None` unless it is `waiting`.
    pub async fn position_of(&self, entry: &WaitlistEntry) -> Result<Option<u32>> {
        if entry.status != EntryStatus::Waiting {
            return Ok(None);
        }
        let waiting = self.waiting(&entry.group_key()).await?;
        Ok(position_of(&waiting, &entry.id))
    }

    /// All entries of a user, newest first, each with its position.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<EntryListing>> {
        let entries = self.store.list_by_user(user_id).await?;
        let mut listings = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = self.position_of(&entry).await?;
            listings.push(EntryListing { entry, position });
        }
        Ok(listings)
    }
}
