//! Ports to the outside world.
//!
//! The engine never talks to a database or a mail relay directly. The service
//! is handed implementations of these traits and the reducer describes calls
//! to them as effects.

use crate::error::{NotifyError, PersistenceError};
use crate::notification::AdmissionNotification;
use crate::types::{Capacity, EventId, EventRoster, Registration, Sequence};
use async_trait::async_trait;

/// Durable storage for events and their registrations
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Capacity of an event
    ///
    /// # Errors
    ///
    /// [`PersistenceError::EventNotFound`] if the event does not exist.
    async fn load_capacity(&self, event_id: &EventId) -> Result<Capacity, PersistenceError>;

    /// All active registrations of an event, in any order
    ///
    /// # Errors
    ///
    /// [`PersistenceError::EventNotFound`] if the event does not exist.
    async fn load_registrations(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, PersistenceError>;

    /// Next arrival sequence of an event.
    ///
    /// Persisted with every commit so it survives cancellation of the newest
    /// registration.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::EventNotFound`] if the event does not exist.
    async fn load_next_sequence(&self, event_id: &EventId) -> Result<Sequence, PersistenceError>;

    /// Replace the stored capacity, registrations and arrival counter of the
    /// roster's event.
    ///
    /// Must be atomic: concurrent loads see either the old or the new roster.
    ///
    /// # Errors
    ///
    /// Any [`PersistenceError`]; the caller rolls its decision back.
    async fn commit(&self, roster: &EventRoster) -> Result<(), PersistenceError>;
}

/// Delivers notifications to requesters (email, push, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification
    ///
    /// # Errors
    ///
    /// [`NotifyError`] if delivery failed; the dispatcher may retry.
    async fn notify(&self, notification: &AdmissionNotification) -> Result<(), NotifyError>;
}
