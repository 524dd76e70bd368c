//! Domain types for the admission engine.
//!
//! Identifiers, validated quantities (party size, capacity), registration
//! records and the per-event [`EventRoster`] the engine operates on.

use crate::error::AdmissionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a capacity-bounded event
    EventId
);

uuid_id!(
    /// Unique identifier for a registration
    RegistrationId
);

uuid_id!(
    /// Identity of the person registering (one active registration per event)
    RequesterId
);

/// Position in an event's arrival order.
///
/// Assigned once at registration from a per-event counter that only moves
/// forward, so values are never reused even after cancellations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// The first sequence value of a fresh event
    pub const FIRST: Self = Self(1);

    /// Wrap a raw sequence value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The following sequence value
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Validated quantities
// ============================================================================

/// Number of people covered by one registration (always at least 1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PartySize(u32);

impl PartySize {
    /// Validate a requested party size
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidPartySize`] when `value` is zero.
    pub const fn new(value: u32) -> Result<Self, AdmissionError> {
        if value == 0 {
            return Err(AdmissionError::InvalidPartySize { party_size: value });
        }
        Ok(Self(value))
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Value widened for load arithmetic
    #[must_use]
    pub const fn load(self) -> u64 {
        self.0 as u64
    }
}

impl TryFrom<u32> for PartySize {
    type Error = AdmissionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartySize> for u32 {
    fn from(size: PartySize) -> Self {
        size.0
    }
}

impl fmt::Display for PartySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum number of admitted attendees for an event, summed over party sizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Capacity(u32);

impl Capacity {
    /// Validate an event capacity
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidCapacity`] when `value` is zero.
    pub const fn new(value: u32) -> Result<Self, AdmissionError> {
        if value == 0 {
            return Err(AdmissionError::InvalidCapacity { capacity: value });
        }
        Ok(Self(value))
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Value widened for load arithmetic
    #[must_use]
    pub const fn load(self) -> u64 {
        self.0 as u64
    }
}

impl TryFrom<u32> for Capacity {
    type Error = AdmissionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capacity> for u32 {
    fn from(capacity: Capacity) -> Self {
        capacity.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// Admission status of a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Admitted; counts towards the confirmed load
    Confirmed,
    /// Queued until capacity frees up
    Waitlisted,
}

impl RegistrationStatus {
    /// Whether this status occupies capacity
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Waitlisted => write!(f, "WAITLISTED"),
        }
    }
}

/// A requester's registration for one event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration identifier
    pub id: RegistrationId,
    /// Owning event
    pub event_id: EventId,
    /// Who registered
    pub requester_id: RequesterId,
    /// Display name given at registration
    pub participant_name: String,
    /// People covered by this registration
    pub party_size: PartySize,
    /// Current admission status
    pub status: RegistrationStatus,
    /// Arrival order within the event
    pub sequence: Sequence,
    /// Wall-clock registration time (display only, never used for ordering)
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    /// Whether this registration counts towards the confirmed load
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.status.is_confirmed()
    }
}

// ============================================================================
// Roster
// ============================================================================

/// All registrations of one event, in arrival order, plus the event's capacity.
///
/// This is the unit of state the engine decides over. Registrations are kept
/// sorted by ascending [`Sequence`]; new registrations are appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRoster {
    /// Event identifier
    pub event_id: EventId,
    /// Current capacity
    pub capacity: Capacity,
    /// Registrations in ascending sequence order
    pub registrations: Vec<Registration>,
    /// Sequence the next registration will receive
    pub next_sequence: Sequence,
    /// Bumped by every applied mutation
    pub revision: u64,
}

impl EventRoster {
    /// An event with no registrations yet
    #[must_use]
    pub const fn new(event_id: EventId, capacity: Capacity) -> Self {
        Self {
            event_id,
            capacity,
            registrations: Vec::new(),
            next_sequence: Sequence::FIRST,
            revision: 0,
        }
    }

    /// Rebuild a roster from stored registrations.
    ///
    /// Registrations are ordered by sequence. The arrival counter resumes at
    /// the stored counter, or after the highest stored sequence if that is
    /// later, so a cancelled registration's sequence is never handed out again.
    /// Stored statuses are kept as-is.
    #[must_use]
    pub fn from_parts(
        event_id: EventId,
        capacity: Capacity,
        mut registrations: Vec<Registration>,
        next_sequence: Sequence,
    ) -> Self {
        registrations.sort_by_key(|r| r.sequence);
        let next_sequence = registrations
            .last()
            .map_or(next_sequence, |r| next_sequence.max(r.sequence.next()));

        Self {
            event_id,
            capacity,
            registrations,
            next_sequence,
            revision: 0,
        }
    }

    /// Sum of party sizes over confirmed registrations
    #[must_use]
    pub fn confirmed_load(&self) -> u64 {
        self.registrations
            .iter()
            .filter(|r| r.is_confirmed())
            .map(|r| r.party_size.load())
            .sum()
    }

    /// Capacity not yet taken by confirmed registrations
    #[must_use]
    pub fn headroom(&self) -> u64 {
        self.capacity.load().saturating_sub(self.confirmed_load())
    }

    /// Look up a registration by id
    #[must_use]
    pub fn get(&self, registration_id: &RegistrationId) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.id == *registration_id)
    }

    /// Index of a registration in arrival order
    #[must_use]
    pub fn position(&self, registration_id: &RegistrationId) -> Option<usize> {
        self.registrations
            .iter()
            .position(|r| r.id == *registration_id)
    }

    /// The active registration of a requester, if any
    #[must_use]
    pub fn find_by_requester(&self, requester_id: &RequesterId) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|r| r.requester_id == *requester_id)
    }

    /// Confirmed registrations in arrival order
    pub fn confirmed(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|r| r.is_confirmed())
    }

    /// Waitlisted registrations in arrival order
    pub fn waitlisted(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|r| !r.is_confirmed())
    }

    /// Hand out the next arrival position
    pub(crate) const fn take_sequence(&mut self) -> Sequence {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        sequence
    }
}
