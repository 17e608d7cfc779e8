//! External collaborators: the booking system and the notification channel.
//!
//! The engine depends only on these traits. A failing booking rolls a
//! confirmation back; a failing notification is logged and ignored.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use waitlist_core::{AvailableSlot, EntryId, WaitlistEntry};

/// Everything the booking system needs to book a confirmed offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub entry_id: EntryId,
    pub user_id: String,
    pub salon_id: String,
    pub service_id: String,
    pub staff_id: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl BookingRequest {
    /// Build the request for the offer an entry currently holds.
    #[must_use]
    pub fn for_offer(entry: &WaitlistEntry, offer: &AvailableSlot) -> Self {
        Self {
            entry_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            salon_id: entry.salon_id.clone(),
            service_id: entry.service_id.clone(),
            staff_id: offer.staff_id.clone(),
            date: offer.date,
            time: offer.time,
        }
    }
}

/// Reference returned by the booking system for a created booking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingRef(pub String);

impl fmt::Display for BookingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    /// The slot was taken in the booking system.
    #[error("slot unavailable: {0}")]
    Unavailable(String),
    #[error("booking service failure: {0}")]
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Creates the real booking once an offer is confirmed.
#[async_trait::async_trait]
pub trait BookingService: Send + Sync {
    async fn create_booking(&self, request: &BookingRequest) -> Result<BookingRef, BookingError>;
}

/// Payload sent to the customer when a slot is offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferNotification {
    pub user_id: String,
    pub entry_id: EntryId,
    pub available_slot: AvailableSlot,
}

/// Delivers offer notifications. Best effort.
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: &OfferNotification) -> Result<(), NotifyError>;
}

/// Dispatcher that only writes offers to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notify(&self, notification: &OfferNotification) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %notification.user_id,
            entry_id = %notification.entry_id,
            date = %notification.available_slot.date,
            time = %notification.available_slot.time,
            expires_at = %notification.available_slot.expires_at,
            "Slot offered"
        );
        Ok(())
    }
}
