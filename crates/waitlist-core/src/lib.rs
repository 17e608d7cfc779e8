//! # Waitlist Core
//!
//! Pure domain logic for the salon waitlist engine:
//! - Entry, slot and offer types
//! - The entry status state machine
//! - FIFO position and matching rules
//! - Error taxonomy shared by the engine and its callers
//!
//! No I/O and no async live here; see the `waitlist` crate for the engine.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod clock;
pub mod entry;
pub mod error;
pub mod events;
pub mod queue;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{
    parse_time, AvailableSlot, EntryId, EntryListing, FreedSlot, GroupKey, JoinRequest, TimeRange,
    WaitlistEntry,
};
pub use error::{Error, Result};
pub use events::{EntryEvent, NewEntryEvent};
pub use queue::{first_eligible, position_of, waiting_in_order, WaitlistStats};
pub use status::{EntryEventType, EntryStatus, TransitionError};

/// Default offer time-to-live in seconds (5 minutes).
pub const DEFAULT_OFFER_TTL_SECS: i64 = 300;
