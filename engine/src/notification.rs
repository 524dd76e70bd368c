//! Notifications emitted by admission decisions.

use crate::types::{EventId, RegistrationId, RegistrationStatus, RequesterId};
use serde::{Deserialize, Serialize};

/// Something a requester should hear about.
///
/// Emitted by the engine in decision order and delivered only after the
/// decision that produced it has been committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdmissionNotification {
    /// A registration was accepted, confirmed or waitlisted
    RegistrationCreated {
        /// Event
        event_id: EventId,
        /// New registration
        registration_id: RegistrationId,
        /// Owner
        requester_id: RequesterId,
        /// Initial status
        status: RegistrationStatus,
    },

    /// A registration was withdrawn by its owner
    RegistrationCancelled {
        /// Event
        event_id: EventId,
        /// Removed registration
        registration_id: RegistrationId,
        /// Owner
        requester_id: RequesterId,
    },

    /// A waitlisted registration was admitted
    RegistrationPromoted {
        /// Event
        event_id: EventId,
        /// Promoted registration
        registration_id: RegistrationId,
        /// Owner
        requester_id: RequesterId,
    },

    /// A confirmed registration went back to the waitlist
    RegistrationDemoted {
        /// Event
        event_id: EventId,
        /// Demoted registration
        registration_id: RegistrationId,
        /// Owner
        requester_id: RequesterId,
    },

    /// A registration's party size changed
    RegistrationResized {
        /// Event
        event_id: EventId,
        /// Resized registration
        registration_id: RegistrationId,
        /// Owner
        requester_id: RequesterId,
        /// New party size
        party_size: u32,
        /// Status after the resize and any resulting promotion or demotion
        status: RegistrationStatus,
    },
}

impl AdmissionNotification {
    /// The registration this notification is about
    #[must_use]
    pub const fn registration_id(&self) -> RegistrationId {
        match self {
            Self::RegistrationCreated { registration_id, .. }
            | Self::RegistrationCancelled { registration_id, .. }
            | Self::RegistrationPromoted { registration_id, .. }
            | Self::RegistrationDemoted { registration_id, .. }
            | Self::RegistrationResized { registration_id, .. } => *registration_id,
        }
    }

    /// The requester to notify
    #[must_use]
    pub const fn requester_id(&self) -> RequesterId {
        match self {
            Self::RegistrationCreated { requester_id, .. }
            | Self::RegistrationCancelled { requester_id, .. }
            | Self::RegistrationPromoted { requester_id, .. }
            | Self::RegistrationDemoted { requester_id, .. }
            | Self::RegistrationResized { requester_id, .. } => *requester_id,
        }
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RegistrationCreated { .. } => "created",
            Self::RegistrationCancelled { .. } => "cancelled",
            Self::RegistrationPromoted { .. } => "promoted",
            Self::RegistrationDemoted { .. } => "demoted",
            Self::RegistrationResized { .. } => "resized",
        }
    }
}
