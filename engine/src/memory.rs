//! In-memory registration store.
//!
//! The reference [`RegistrationStore`] adapter: a `HashMap` of events behind a
//! lock. Used by the demo binary and throughout the tests; commits can be made
//! to fail on demand to exercise rollback.

use crate::error::{AdmissionError, PersistenceError};
use crate::ports::RegistrationStore;
use crate::types::{Capacity, EventId, EventRoster, Registration, Sequence};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug)]
struct StoredEvent {
    capacity: Capacity,
    registrations: Vec<Registration>,
    next_sequence: Sequence,
}

/// `HashMap`-backed [`RegistrationStore`]
///
/// # Example
///
/// ```
/// use admission_engine::memory::InMemoryRegistrationStore;
///
/// let store = InMemoryRegistrationStore::new();
/// let event_id = store.create_event(8).unwrap();
/// assert_eq!(store.registrations(&event_id).map(|r| r.len()), Some(0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    events: Arc<RwLock<HashMap<EventId, StoredEvent>>>,
    failing_commits: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event with the given capacity and no registrations
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidCapacity`] if `capacity` is zero.
    pub fn create_event(&self, capacity: u32) -> Result<EventId, AdmissionError> {
        let event_id = EventId::new();
        self.insert_event(event_id, Capacity::new(capacity)?, Vec::new());
        Ok(event_id)
    }

    /// Seed an event with existing registrations, stored as given.
    ///
    /// The arrival counter starts after the highest seeded sequence.
    pub fn insert_event(
        &self,
        event_id: EventId,
        capacity: Capacity,
        registrations: Vec<Registration>,
    ) {
        let next_sequence = registrations
            .iter()
            .map(|r| r.sequence.next())
            .max()
            .unwrap_or(Sequence::FIRST);
        self.write().insert(
            event_id,
            StoredEvent {
                capacity,
                registrations,
                next_sequence,
            },
        );
    }

    /// Make the next `count` commits fail with [`PersistenceError::Unavailable`]
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Stored registrations of an event
    #[must_use]
    pub fn registrations(&self, event_id: &EventId) -> Option<Vec<Registration>> {
        self.read()
            .get(event_id)
            .map(|event| event.registrations.clone())
    }

    /// Stored capacity of an event
    #[must_use]
    pub fn capacity(&self, event_id: &EventId) -> Option<Capacity> {
        self.read().get(event_id).map(|event| event.capacity)
    }

    /// Stored arrival counter of an event
    #[must_use]
    pub fn next_sequence(&self, event_id: &EventId) -> Option<Sequence> {
        self.read().get(event_id).map(|event| event.next_sequence)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EventId, StoredEvent>> {
        self.events
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EventId, StoredEvent>> {
        self.events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn load_capacity(&self, event_id: &EventId) -> Result<Capacity, PersistenceError> {
        self.capacity(event_id)
            .ok_or(PersistenceError::EventNotFound(*event_id))
    }

    async fn load_registrations(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, PersistenceError> {
        self.registrations(event_id)
            .ok_or(PersistenceError::EventNotFound(*event_id))
    }

    async fn load_next_sequence(&self, event_id: &EventId) -> Result<Sequence, PersistenceError> {
        self.next_sequence(event_id)
            .ok_or(PersistenceError::EventNotFound(*event_id))
    }

    async fn commit(&self, roster: &EventRoster) -> Result<(), PersistenceError> {
        if self.take_injected_failure() {
            tracing::warn!(event_id = %roster.event_id, "Injected commit failure");
            return Err(PersistenceError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }

        let mut events = self.write();
        let event = events
            .get_mut(&roster.event_id)
            .ok_or(PersistenceError::EventNotFound(roster.event_id))?;
        event.capacity = roster.capacity;
        event.registrations.clone_from(&roster.registrations);
        event.next_sequence = event.next_sequence.max(roster.next_sequence);
        drop(events);

        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            event_id = %roster.event_id,
            revision = roster.revision,
            "Roster committed"
        );
        Ok(())
    }
}
