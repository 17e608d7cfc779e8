//! Entry Status State Machine (Pure Domain Logic)
//!
//! # State Machine
//!
//! ```text
//! waiting --(match+offer)--> slot_available --(confirm)--> confirmed
//!    |                             |
//!    v                             +--(skip)--> cancelled
//! cancelled                        +--(ttl)---> expired
//! ```
//!
//! Terminal states: `confirmed`, `expired`, `cancelled`

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE MACHINE ERROR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error type for invalid entry state transitions.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Invalid state transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: EntryStatus,
    pub to: EntryStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENTRY STATUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a waitlist entry.
///
/// Valid transitions:
/// - waiting -> `slot_available` (offer created)
/// - waiting -> cancelled (user leaves)
/// - `slot_available` -> confirmed (user confirms before the TTL)
/// - `slot_available` -> cancelled (user skips)
/// - `slot_available` -> expired (TTL elapsed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Queued, waiting for a matching slot to free up.
    Waiting,
    /// Holding a time-bounded offer.
    SlotAvailable,
    /// Offer accepted and booked.
    Confirmed,
    /// Offer timed out.
    Expired,
    /// Left the queue or skipped an offer.
    Cancelled,
}

impl EntryStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::SlotAvailable => "slot_available",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this status is terminal (no valid outgoing transitions).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired | Self::Cancelled)
    }

    /// Returns true while the entry still occupies a place in the waitlist.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::SlotAvailable)
    }

    /// Returns true if a transition from `self` to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.validate_transition(target).is_ok()
    }

    /// Validates that a transition from `self` to `target` is allowed.
    ///
    /// Self-transitions are rejected: confirming twice must not succeed twice.
    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        let is_valid = match self {
            Self::Waiting => matches!(target, Self::SlotAvailable | Self::Cancelled),
            Self::SlotAvailable => {
                matches!(target, Self::Confirmed | Self::Cancelled | Self::Expired)
            }
            Self::Confirmed | Self::Expired | Self::Cancelled => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Returns all possible statuses as a slice.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Waiting,
            Self::SlotAvailable,
            Self::Confirmed,
            Self::Expired,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "slot_available" => Ok(Self::SlotAvailable),
            "confirmed" => Ok(Self::Confirmed),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(Error::Parse(format!("Invalid entry status: {s}"))),
        }
    }
}

impl TryFrom<String> for EntryStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENTRY EVENT TYPE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event types recorded in the entry audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryEventType {
    /// Entry created in `waiting`.
    Joined,
    /// User left the queue.
    Left,
    /// Offer created for a freed slot.
    Offered,
    /// Offer confirmed and booked.
    Confirmed,
    /// Booking failed; confirmation reverted to the live offer.
    ConfirmationRolledBack,
    /// User skipped the offer.
    Skipped,
    /// Offer expired.
    Expired,
}

impl EntryEventType {
    /// Returns the string representation of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Offered => "offered",
            Self::Confirmed => "confirmed",
            Self::ConfirmationRolledBack => "confirmation_rolled_back",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for EntryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "joined" => Ok(Self::Joined),
            "left" => Ok(Self::Left),
            "offered" => Ok(Self::Offered),
            "confirmed" => Ok(Self::Confirmed),
            "confirmation_rolled_back" => Ok(Self::ConfirmationRolledBack),
            "skipped" => Ok(Self::Skipped),
            "expired" => Ok(Self::Expired),
            _ => Err(Error::Parse(format!("Invalid entry event type: {s}"))),
        }
    }
}

impl TryFrom<String> for EntryEventType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    // --- Valid transitions ---

    #[test]
    fn test_waiting_to_slot_available_is_valid() {
        assert!(EntryStatus::Waiting.can_transition_to(EntryStatus::SlotAvailable));
    }

    #[test]
    fn test_waiting_to_cancelled_is_valid() {
        assert!(EntryStatus::Waiting.can_transition_to(EntryStatus::Cancelled));
    }

    #[test]
    fn test_slot_available_outcomes_are_valid() {
        for target in [
            EntryStatus::Confirmed,
            EntryStatus::Cancelled,
            EntryStatus::Expired,
        ] {
            assert!(
                EntryStatus::SlotAvailable.can_transition_to(target),
                "slot_available -> {target} should be valid"
            );
        }
    }

    // --- Invalid transitions ---

    #[test]
    fn test_waiting_cannot_be_confirmed_directly() {
        let err = EntryStatus::Waiting.validate_transition(EntryStatus::Confirmed);
        assert_eq!(
            err,
            Err(TransitionError {
                from: EntryStatus::Waiting,
                to: EntryStatus::Confirmed,
            })
        );
    }

    #[test]
    fn test_waiting_cannot_expire() {
        assert!(!EntryStatus::Waiting.can_transition_to(EntryStatus::Expired));
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        for from in EntryStatus::all().iter().filter(|s| s.is_terminal()) {
            for to in EntryStatus::all() {
                assert!(
                    !from.can_transition_to(*to),
                    "{from} -> {to} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_self_transitions_are_rejected() {
        for status in EntryStatus::all() {
            assert!(!status.can_transition_to(*status));
        }
    }

    // --- Classification ---

    #[test]
    fn test_active_and_terminal_partition_all_statuses() {
        for status in EntryStatus::all() {
            assert_ne!(status.is_active(), status.is_terminal());
        }
    }

    // --- String round trip ---

    #[test]
    fn test_status_from_str_accepts_every_as_str() {
        for status in EntryStatus::all() {
            assert_eq!(status.as_str().parse::<EntryStatus>(), Ok(*status));
        }
    }

    #[test]
    fn test_status_from_str_rejects_unknown() {
        assert!("claimed".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_as_str() -> std::result::Result<(), serde_json::Error> {
        let json = serde_json::to_string(&EntryStatus::SlotAvailable)?;
        assert_eq!(json, "\"slot_available\"");
        Ok(())
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(
            "confirmation_rolled_back".parse::<EntryEventType>(),
            Ok(EntryEventType::ConfirmationRolledBack)
        );
        assert!("merged".parse::<EntryEventType>().is_err());
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError {
            from: EntryStatus::Expired,
            to: EntryStatus::Confirmed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition: cannot transition from expired to confirmed"
        );
    }
}
