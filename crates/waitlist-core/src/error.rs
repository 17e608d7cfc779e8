//! Error types for waitlist-core
//!
//! Errors fall into three groups:
//!
//! - **Caller errors**: `Validation`, `NotFound` (exit code 1 / 3)
//! - **State-machine outcomes**: `InvalidStateTransition`, `SlotTaken` (exit code 4).
//!   These are expected under concurrency and are never logged as faults.
//! - **Infrastructure errors**: `Dependency`, `Database`, `InvalidConfig`, `Parse`
//!   (exit code 2)

use thiserror::Error;

use crate::{entry::EntryId, status::TransitionError};

/// Core error type for waitlist operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Malformed join request; names the offending field
    #[error("Validation error on `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Unknown entry id
    #[error("Entry not found: {0}")]
    NotFound(EntryId),

    /// Operation not valid from the entry's current status
    #[error(transparent)]
    InvalidStateTransition(#[from] TransitionError),

    /// Lost a compare-and-set race; the offer was resolved elsewhere
    #[error("Offer no longer available for entry {0}")]
    SlotTaken(EntryId),

    /// Booking service or notification dispatcher failure
    #[error("Dependency error ({service}): {message}")]
    Dependency { service: String, message: String },

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse stored or user-supplied data
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a dependency error for a named collaborator.
    pub fn dependency(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dependency {
            service: service.into(),
            message: message.into(),
        }
    }

    /// True for outcomes callers are expected to handle (lost races, wrong status).
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::InvalidStateTransition(_) | Self::SlotTaken(_))
    }

    /// Returns the exit code used by the CLI for this error.
    ///
    /// - 1: caller input error
    /// - 2: dependency / system error
    /// - 3: not found
    /// - 4: invalid state
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::InvalidConfig(_) | Self::Parse(_) => 1,
            Self::Dependency { .. } | Self::Database(_) => 2,
            Self::NotFound(_) => 3,
            Self::InvalidStateTransition(_) | Self::SlotTaken(_) => 4,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type alias for waitlist operations
pub type Result<T> = std::result::Result<T, Error>;
