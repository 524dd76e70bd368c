//! Error types for the admission engine.

use crate::types::{EventId, RegistrationId, RequesterId};
use admission_runtime::StoreError;
use std::fmt;
use thiserror::Error;

/// The thing a lookup failed to find
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Missing {
    /// No such event
    Event(EventId),
    /// No such registration in the addressed event
    Registration(RegistrationId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event {id}"),
            Self::Registration(id) => write!(f, "registration {id}"),
        }
    }
}

/// Errors produced by admission decisions.
///
/// All variants except [`AdmissionError::CapacityInvariantViolated`] are
/// ordinary rejections of a caller's request and leave state untouched.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum AdmissionError {
    /// Party size below 1
    #[error("party size must be at least 1, got {party_size}")]
    InvalidPartySize {
        /// Requested size
        party_size: u32,
    },

    /// Capacity below 1
    #[error("capacity must be at least 1, got {capacity}")]
    InvalidCapacity {
        /// Requested capacity
        capacity: u32,
    },

    /// Requester already holds a registration for the event
    #[error("requester {requester_id} is already registered for event {event_id}")]
    DuplicateRegistration {
        /// Event registered for
        event_id: EventId,
        /// Requester that registered twice
        requester_id: RequesterId,
    },

    /// Unknown event or registration
    #[error("{0} not found")]
    NotFound(Missing),

    /// A mutation would have left the confirmed load above capacity.
    ///
    /// Never expected in practice; signals corrupted state or a logic bug.
    #[error("capacity invariant violated for event {event_id}: confirmed load {confirmed_load} exceeds capacity {capacity}")]
    CapacityInvariantViolated {
        /// Affected event
        event_id: EventId,
        /// Load the mutation would have produced
        confirmed_load: u64,
        /// Capacity at the time
        capacity: u32,
    },
}

impl AdmissionError {
    /// Whether this error indicates corrupted state rather than a bad request
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::CapacityInvariantViolated { .. })
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPartySize { .. } => "invalid_party_size",
            Self::InvalidCapacity { .. } => "invalid_capacity",
            Self::DuplicateRegistration { .. } => "duplicate_registration",
            Self::NotFound(_) => "not_found",
            Self::CapacityInvariantViolated { .. } => "capacity_invariant_violated",
        }
    }
}

/// Failures of the registration store port
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PersistenceError {
    /// The store has no record of the event
    #[error("event {0} does not exist")]
    EventNotFound(EventId),

    /// The store could not be reached or refused the write
    #[error("registration store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the notifier port
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NotifyError {
    /// Delivery was attempted and failed
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Errors returned by [`crate::service::AdmissionService`]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The command was rejected by the engine
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Loading event state failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The decision was made but could not be made durable, so it was rolled back
    #[error("commit failed and the decision was rolled back: {0}")]
    CommitFailed(String),

    /// The runtime refused the command (for example during shutdown)
    #[error(transparent)]
    Runtime(#[from] StoreError),

    /// The reducer finished a command without recording its outcome
    #[error("command {command} completed without an outcome")]
    MissingOutcome {
        /// Command name
        command: &'static str,
    },
}

impl ServiceError {
    /// The engine error behind this failure, if any
    #[must_use]
    pub const fn admission(&self) -> Option<&AdmissionError> {
        match self {
            Self::Admission(error) => Some(error),
            _ => None,
        }
    }
}
