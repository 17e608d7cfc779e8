//! # Waitlist
//!
//! The salon waitlist engine: customers queue for a fully-booked
//! (salon, service, date), freed slots are offered to the first eligible
//! customer for a limited time, and skipped or expired offers cascade down
//! the queue until the slot is booked or released.
//!
//! The pure rules live in `waitlist-core`; this crate adds persistence,
//! per-key serialization, timers and the `waitlist` binary.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod cascade;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod keylock;
pub mod matcher;
pub mod offer;
pub mod queue;
pub mod store;
pub mod timers;

pub use cascade::CascadeOutcome;
pub use collaborators::{
    BookingError, BookingRef, BookingRequest, BookingService, NotificationDispatcher, NotifyError,
    OfferNotification, TracingNotifier,
};
pub use config::{load_config, EngineConfig};
pub use engine::{EngineBuilder, WaitlistEngine};
pub use offer::ExpireOutcome;
pub use queue::JoinResponse;
pub use store::{EntryStore, InMemoryEntryStore, SqliteEntryStore};
