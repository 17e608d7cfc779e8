//! Offer Manager - time-bounded offers and the transitions that resolve them.
//!
//! Every transition is a compare-and-set in the store. Callers hold the key
//! lock of the entry's grouping key; the CAS still decides every race with
//! another process sharing the database.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::mpsc;
use waitlist_core::{
    AvailableSlot, Clock, EntryEventType, EntryId, EntryStatus, Error, FreedSlot, GroupKey,
    NewEntryEvent, Result, TransitionError, WaitlistEntry,
};

use crate::{
    collaborators::{
        BookingRef, BookingRequest, BookingService, NotificationDispatcher, OfferNotification,
    },
    keylock::KeyGuard,
    store::{record_event, CasOutcome, EntryStore, Transition},
    timers::ExpirationTimers,
};

/// What an attempt to offer a slot to one entry did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferAttempt {
    Offered(WaitlistEntry),
    /// Another entry holds the slot; carries the holder.
    SlotHeld(WaitlistEntry),
}

/// What an expiration attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExpireOutcome {
    /// The offer expired; the slot must be cascaded.
    Expired(FreedSlot),
    /// The offer is still live; the timer was re-armed for the remainder.
    NotYetDue(Duration),
    /// The entry is no longer offered (confirmed, skipped, already expired).
    Ignored(EntryStatus),
}

pub struct OfferManager {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    timers: ExpirationTimers,
    due: mpsc::UnboundedSender<EntryId>,
    booking: Arc<dyn BookingService>,
    notifier: Arc<dyn NotificationDispatcher>,
    ttl: chrono::Duration,
}

impl OfferManager {
    pub fn new(
        store: Arc<dyn EntryStore>,
        clock: Arc<dyn Clock>,
        timers: ExpirationTimers,
        due: mpsc::UnboundedSender<EntryId>,
        booking: Arc<dyn BookingService>,
        notifier: Arc<dyn NotificationDispatcher>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            timers,
            due,
            booking,
            notifier,
            ttl,
        }
    }

    /// Offer `slot` to `entry` for one TTL.
    ///
    /// Returns `OfferAttempt::SlotHeld` with the holder if another entry,
    /// possibly offered by another process, already holds the slot.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidStateTransition` if the entry is no longer `waiting`
    /// - `Error::NotFound` if the entry vanished
    /// - `Error::SlotTaken` if the slot was held but its holder resolved
    ///   before it could be read; the entry is still `waiting`
    pub async fn create_offer(
        &self,
        entry: &WaitlistEntry,
        slot: &FreedSlot,
        guard: &KeyGuard<GroupKey>,
    ) -> Result<OfferAttempt> {
        debug_assert_eq!(guard.key(), &slot.group_key());
        let now = self.clock.now();
        let offer = AvailableSlot::for_slot(slot, now, self.ttl);

        let offered = match self
            .store
            .compare_and_set(&entry.id, &Transition::offer(offer.clone(), now)?)
            .await?
        {
            CasOutcome::Applied(offered) => offered,
            CasOutcome::Conflict(current) => {
                return Err(TransitionError {
                    from: current.status,
                    to: EntryStatus::SlotAvailable,
                }
                .into())
            }
            CasOutcome::Missing => return Err(Error::NotFound(entry.id.clone())),
            CasOutcome::SlotHeld => {
                return match self.store.find_offer_for_slot(slot).await? {
                    Some(holder) => {
                        tracing::info!(
                            entry_id = %entry.id,
                            holder_id = %holder.id,
                            slot = %slot,
                            "Slot already offered elsewhere"
                        );
                        Ok(OfferAttempt::SlotHeld(holder))
                    }
                    None => Err(Error::SlotTaken(entry.id.clone())),
                };
            }
        };

        self.arm(&offered.id, offer.remaining(now)).await;
        record_event(
            self.store.as_ref(),
            NewEntryEvent::new(offered.id.clone(), EntryEventType::Offered, now)
                .with_details(serde_json::to_value(&offer)?),
        )
        .await;

        tracing::info!(
            entry_id = %offered.id,
            user_id = %offered.user_id,
            salon_id = %slot.salon_id,
            date = %slot.date,
            time = %slot.time,
            expires_at = %offer.expires_at,
            "Slot offered"
        );

        self.dispatch_notification(OfferNotification {
            user_id: offered.user_id.clone(),
            entry_id: offered.id.clone(),
            available_slot: offer,
        });

        Ok(OfferAttempt::Offered(offered))
    }

    /// Accept the outstanding offer and book it.
    ///
    /// # Errors
    ///
    /// - `Error::SlotTaken` if the offer was already resolved, its deadline
    ///   passed, or a concurrent transition won
    /// - `Error::InvalidStateTransition` from `waiting` or `cancelled`
    /// - `Error::NotFound` if the entry does not exist
    /// - `Error::Dependency` if the booking failed; the offer is restored
    pub async fn confirm(&self, id: &EntryId, guard: &KeyGuard<GroupKey>) -> Result<BookingRef> {
        let now = self.clock.now();
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        debug_assert_eq!(guard.key(), &entry.group_key());

        match entry.status {
            EntryStatus::SlotAvailable => {}
            EntryStatus::Confirmed | EntryStatus::Expired => {
                return Err(Error::SlotTaken(id.clone()))
            }
            EntryStatus::Waiting | EntryStatus::Cancelled => {
                return Err(TransitionError {
                    from: entry.status,
                    to: EntryStatus::Confirmed,
                }
                .into())
            }
        }

        let offer = entry.available_slot.clone().ok_or_else(|| {
            Error::Database(format!("Entry '{id}' is slot_available without an offer"))
        })?;
        if !offer.is_live(now) {
            tracing::debug!(entry_id = %id, expires_at = %offer.expires_at, "Confirm after deadline");
            return Err(Error::SlotTaken(id.clone()));
        }

        let confirmed = match self
            .store
            .compare_and_set(id, &Transition::confirm(now)?)
            .await?
        {
            CasOutcome::Applied(confirmed) => confirmed,
            CasOutcome::Conflict(_) | CasOutcome::Missing | CasOutcome::SlotHeld => {
                tracing::debug!(entry_id = %id, "Confirm lost the race");
                return Err(Error::SlotTaken(id.clone()));
            }
        };
        self.timers.cancel(id).await;

        let request = BookingRequest::for_offer(&confirmed, &offer);
        match self.booking.create_booking(&request).await {
            Ok(booking) => {
                record_event(
                    self.store.as_ref(),
                    NewEntryEvent::new(id.clone(), EntryEventType::Confirmed, now)
                        .with_details(serde_json::json!({ "booking_ref": booking.0 })),
                )
                .await;
                tracing::info!(entry_id = %id, booking_ref = %booking, "Offer confirmed");
                Ok(booking)
            }
            Err(booking_error) => {
                self.roll_back_confirmation(id, offer).await?;
                Err(Error::dependency("booking", booking_error.to_string()))
            }
        }
    }

    async fn roll_back_confirmation(&self, id: &EntryId, offer: AvailableSlot) -> Result<()> {
        let now = self.clock.now();
        let reverted = self
            .store
            .compare_and_set(id, &Transition::revert_confirmation(offer.clone(), now))
            .await?;
        match reverted {
            CasOutcome::Applied(_) => {
                self.arm(id, offer.remaining(now)).await;
                record_event(
                    self.store.as_ref(),
                    NewEntryEvent::new(id.clone(), EntryEventType::ConfirmationRolledBack, now),
                )
                .await;
                tracing::warn!(entry_id = %id, "Booking failed, offer restored");
                Ok(())
            }
            CasOutcome::Conflict(current) => {
                tracing::error!(
                    entry_id = %id,
                    status = %current.status,
                    "Booking failed and confirmation could not be reverted"
                );
                Err(Error::Database(format!(
                    "Entry '{id}' changed to {} during booking rollback",
                    current.status
                )))
            }
            CasOutcome::Missing => Err(Error::NotFound(id.clone())),
            CasOutcome::SlotHeld => {
                tracing::error!(
                    entry_id = %id,
                    "Booking failed and the slot was offered to another entry"
                );
                Err(Error::Database(format!(
                    "Slot of entry '{id}' was re-offered during booking rollback"
                )))
            }
        }
    }

    /// Decline the outstanding offer. Returns the slot to cascade.
    ///
    /// The entry keeps the slot with `cascade_pending` set until the
    /// cascade has run.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidStateTransition` unless the entry is `slot_available`
    /// - `Error::NotFound` if the entry does not exist
    pub async fn skip(&self, id: &EntryId, guard: &KeyGuard<GroupKey>) -> Result<FreedSlot> {
        let now = self.clock.now();
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        debug_assert_eq!(guard.key(), &entry.group_key());

        let not_offered = |status| -> Error {
            TransitionError {
                from: status,
                to: EntryStatus::Cancelled,
            }
            .into()
        };
        if entry.status != EntryStatus::SlotAvailable {
            return Err(not_offered(entry.status));
        }
        let slot = entry.offered_slot().ok_or_else(|| {
            Error::Database(format!("Entry '{id}' is slot_available without an offer"))
        })?;

        match self.store.compare_and_set(id, &Transition::skip(now)?).await? {
            CasOutcome::Applied(_) => {}
            CasOutcome::Conflict(current) => return Err(not_offered(current.status)),
            CasOutcome::Missing => return Err(Error::NotFound(id.clone())),
            CasOutcome::SlotHeld => return Err(slot_held_on_release(id)),
        }
        self.timers.cancel(id).await;

        record_event(
            self.store.as_ref(),
            NewEntryEvent::new(id.clone(), EntryEventType::Skipped, now)
                .with_details(serde_json::to_value(&slot)?),
        )
        .await;
        tracing::info!(entry_id = %id, slot = %slot, "Offer skipped");
        Ok(slot)
    }

    /// Expire the offer if its deadline has passed.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the entry does not exist
    /// - `Error::Database` if the store fails
    pub async fn expire(&self, id: &EntryId, guard: &KeyGuard<GroupKey>) -> Result<ExpireOutcome> {
        let now = self.clock.now();
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        debug_assert_eq!(guard.key(), &entry.group_key());

        let Some(slot) = entry
            .offered_slot()
            .filter(|_| entry.status == EntryStatus::SlotAvailable)
        else {
            tracing::debug!(entry_id = %id, status = %entry.status, "Expiration ignored");
            return Ok(ExpireOutcome::Ignored(entry.status));
        };

        match self
            .store
            .compare_and_set(id, &Transition::expire(now)?)
            .await?
        {
            CasOutcome::Applied(_) => {
                self.timers.cancel(id).await;
                record_event(
                    self.store.as_ref(),
                    NewEntryEvent::new(id.clone(), EntryEventType::Expired, now)
                        .with_details(serde_json::to_value(&slot)?),
                )
                .await;
                tracing::info!(entry_id = %id, slot = %slot, "Offer expired");
                Ok(ExpireOutcome::Expired(slot))
            }
            CasOutcome::Conflict(current) => match current.available_slot {
                Some(offer) if current.status == EntryStatus::SlotAvailable => {
                    let remaining = offer.remaining(now);
                    tracing::debug!(entry_id = %id, ?remaining, "Offer not yet due, re-arming");
                    self.arm(id, remaining).await;
                    Ok(ExpireOutcome::NotYetDue(remaining))
                }
                _ => Ok(ExpireOutcome::Ignored(current.status)),
            },
            CasOutcome::Missing => Err(Error::NotFound(id.clone())),
            CasOutcome::SlotHeld => Err(slot_held_on_release(id)),
        }
    }

    /// Re-arm the timer of a live offer found in the store.
    pub async fn rearm(&self, entry: &WaitlistEntry) {
        if let Some(offer) = &entry.available_slot {
            self.arm(&entry.id, offer.remaining(self.clock.now())).await;
        }
    }

    async fn arm(&self, id: &EntryId, after: Duration) {
        self.timers.schedule(id.clone(), after, self.due.clone()).await;
    }

    fn dispatch_notification(&self, notification: OfferNotification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    entry_id = %notification.entry_id,
                    user_id = %notification.user_id,
                    error = %e,
                    "Offer notification failed"
                );
            }
        });
    }
}

fn slot_held_on_release(id: &EntryId) -> Error {
    Error::Database(format!(
        "Store reported a slot conflict while releasing the offer of '{id}'"
    ))
}
