//! Admission service: per-event serialization over the admission reducer.
//!
//! Every event gets a slot holding a runtime [`Store`] for its roster and a
//! single-writer lane. A mutation holds the lane from the moment it is decided
//! until its commit has either been acknowledged or rolled back, so two
//! mutations of the same event never interleave, and a caller is only told
//! about a decision once it is durable. Reads go straight to the store's
//! state and never wait on the lane.
//!
//! Slots are created on first use by loading the event from the
//! [`RegistrationStore`] and stay resident until [`AdmissionService::forget`]
//! evicts them, so memory grows with the set of events touched. Callers with
//! an unbounded set of events forget the ones that have closed. Events share
//! nothing beyond the slot map lookup.

use crate::config::Config;
use crate::engine;
use crate::error::{AdmissionError, Missing, PersistenceError, ServiceError};
use crate::metrics;
use crate::notifier::{NotificationDispatcher, NotificationOutbox};
use crate::ports::{Notifier, RegistrationStore};
use crate::reducer::{
    AdmissionAction, AdmissionEnvironment, AdmissionReducer, AdmissionState, CommandOutcome,
};
use crate::types::{EventId, EventRoster, Registration, RegistrationId, RequesterId};
use admission_core::environment::Clock;
use admission_runtime::{Store, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

type AdmissionStore = Store<AdmissionState, AdmissionAction, AdmissionEnvironment, AdmissionReducer>;

/// One event's store and its single-writer lane
struct EventSlot {
    lane: Mutex<()>,
    store: AdmissionStore,
    /// Set under the lane when the slot is evicted
    retired: AtomicBool,
}

/// Admission decisions for any number of events
///
/// # Example
///
/// ```ignore
/// let service = AdmissionService::new(store, notifier, Arc::new(SystemClock), &Config::from_env());
///
/// let registration = service.register(event_id, requester_id, "Ada", 2).await?;
/// service.cancel(event_id, registration.id).await?;
/// ```
pub struct AdmissionService {
    store: Arc<dyn RegistrationStore>,
    clock: Arc<dyn Clock>,
    outbox: NotificationOutbox,
    dispatcher: Mutex<Option<NotificationDispatcher>>,
    slots: RwLock<HashMap<EventId, Arc<EventSlot>>>,
    closed: AtomicBool,
    /// Bumped under the slot map lock by every eviction
    evictions: AtomicU64,
}

impl AdmissionService {
    /// Create the service and start its notification dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let (outbox, receiver) = NotificationOutbox::channel();
        let dispatcher = NotificationDispatcher::spawn(
            receiver,
            notifier,
            config.notifications.retry_policy(),
        );

        Self {
            store,
            clock,
            outbox,
            dispatcher: Mutex::new(Some(dispatcher)),
            slots: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            evictions: AtomicU64::new(0),
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Register a requester for an event.
    ///
    /// The registration is confirmed if the party fits in the remaining
    /// capacity, otherwise waitlisted.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::InvalidPartySize`], [`AdmissionError::DuplicateRegistration`]
    ///   or [`AdmissionError::NotFound`] wrapped in [`ServiceError::Admission`]
    /// - [`ServiceError::CommitFailed`] if the decision could not be stored
    #[tracing::instrument(skip_all, fields(event_id = %event_id, requester_id = %requester_id, party_size = party_size))]
    pub async fn register(
        &self,
        event_id: EventId,
        requester_id: RequesterId,
        participant_name: impl Into<String>,
        party_size: u32,
    ) -> Result<Registration, ServiceError> {
        let action = AdmissionAction::Register {
            requester_id,
            participant_name: participant_name.into(),
            party_size,
        };
        self.execute_for_registration(event_id, action).await
    }

    /// Cancel a registration, promoting waitlisted registrations into the
    /// freed capacity. Returns the removed registration.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::NotFound`] wrapped in [`ServiceError::Admission`]
    /// - [`ServiceError::CommitFailed`] if the decision could not be stored
    #[tracing::instrument(skip_all, fields(event_id = %event_id, registration_id = %registration_id))]
    pub async fn cancel(
        &self,
        event_id: EventId,
        registration_id: RegistrationId,
    ) -> Result<Registration, ServiceError> {
        self.execute_for_registration(event_id, AdmissionAction::Cancel { registration_id })
            .await
    }

    /// Change the party size of a registration.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::InvalidPartySize`] or [`AdmissionError::NotFound`]
    ///   wrapped in [`ServiceError::Admission`]
    /// - [`ServiceError::CommitFailed`] if the decision could not be stored
    #[tracing::instrument(skip_all, fields(event_id = %event_id, registration_id = %registration_id, party_size = party_size))]
    pub async fn modify_party_size(
        &self,
        event_id: EventId,
        registration_id: RegistrationId,
        party_size: u32,
    ) -> Result<Registration, ServiceError> {
        let action = AdmissionAction::ModifyPartySize {
            registration_id,
            party_size,
        };
        self.execute_for_registration(event_id, action).await
    }

    /// Re-derive every status of an event from arrival order.
    ///
    /// # Errors
    ///
    /// [`ServiceError::CommitFailed`] if the result could not be stored.
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn recompute(&self, event_id: EventId) -> Result<Vec<Registration>, ServiceError> {
        self.execute_for_roster(event_id, AdmissionAction::Recompute)
            .await
    }

    /// Change an event's capacity and re-derive every status under it.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::InvalidCapacity`] wrapped in [`ServiceError::Admission`]
    /// - [`ServiceError::CommitFailed`] if the result could not be stored
    #[tracing::instrument(skip_all, fields(event_id = %event_id, capacity = capacity))]
    pub async fn change_capacity(
        &self,
        event_id: EventId,
        capacity: u32,
    ) -> Result<Vec<Registration>, ServiceError> {
        self.execute_for_roster(event_id, AdmissionAction::ChangeCapacity { capacity })
            .await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of an event's roster
    ///
    /// # Errors
    ///
    /// [`AdmissionError::NotFound`] if the event does not exist, or a
    /// [`ServiceError::Persistence`] error while loading it.
    pub async fn roster(&self, event_id: EventId) -> Result<EventRoster, ServiceError> {
        let slot = self.slot(event_id).await?;
        Ok(slot.store.state(|state| state.roster.clone()).await)
    }

    /// A requester's registration for an event, if any
    ///
    /// # Errors
    ///
    /// As for [`AdmissionService::roster`].
    pub async fn registration_for(
        &self,
        event_id: EventId,
        requester_id: RequesterId,
    ) -> Result<Option<Registration>, ServiceError> {
        let slot = self.slot(event_id).await?;
        Ok(slot
            .store
            .state(|state| state.roster.find_by_requester(&requester_id).cloned())
            .await)
    }

    /// Latest revision of an event the store has acknowledged
    ///
    /// # Errors
    ///
    /// As for [`AdmissionService::roster`].
    pub async fn durable_revision(&self, event_id: EventId) -> Result<u64, ServiceError> {
        let slot = self.slot(event_id).await?;
        Ok(slot.store.state(|state| state.durable_revision).await)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Evict an event's slot. The next command or read reloads it from the
    /// [`RegistrationStore`].
    ///
    /// Waits for the event's in-flight command, so everything decided so far is
    /// committed before the slot goes. Returns `false` if the event was not
    /// resident.
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn forget(&self, event_id: EventId) -> bool {
        let Some(slot) = self.slots.read().await.get(&event_id).cloned() else {
            return false;
        };

        let _lane = slot.lane.lock().await;
        let mut slots = self.slots.write().await;
        let resident = slots
            .get(&event_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !resident {
            return false;
        }

        slot.retired.store(true, Ordering::Release);
        slots.remove(&event_id);
        self.evictions.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Event slot evicted");
        true
    }

    /// Number of events currently held in memory
    pub async fn resident_events(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Stop accepting commands, wait for in-flight commits, then deliver
    /// queued notifications.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Runtime`] if an event's effects did not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ServiceError> {
        tracing::info!("Shutting down admission service");
        self.closed.store(true, Ordering::Release);

        let slots: Vec<Arc<EventSlot>> = self.slots.read().await.values().cloned().collect();
        let results = futures::future::join_all(slots.iter().map(|slot| async move {
            let _lane = slot.lane.lock().await;
            slot.store.shutdown(timeout).await
        }))
        .await;

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if !dispatcher.shutdown(timeout).await {
                tracing::warn!("Some notifications were not delivered before shutdown");
            }
        }

        for result in results {
            result?;
        }
        tracing::info!(events = slots.len(), "Admission service stopped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn execute_for_registration(
        &self,
        event_id: EventId,
        action: AdmissionAction,
    ) -> Result<Registration, ServiceError> {
        let command = action.name();
        match self.execute(event_id, action).await? {
            CommandOutcome::Registration(registration) => Ok(registration),
            CommandOutcome::Roster(_) => Err(ServiceError::MissingOutcome { command }),
        }
    }

    async fn execute_for_roster(
        &self,
        event_id: EventId,
        action: AdmissionAction,
    ) -> Result<Vec<Registration>, ServiceError> {
        let command = action.name();
        match self.execute(event_id, action).await? {
            CommandOutcome::Roster(registrations) => Ok(registrations),
            CommandOutcome::Registration(_) => Err(ServiceError::MissingOutcome { command }),
        }
    }

    async fn execute(
        &self,
        event_id: EventId,
        action: AdmissionAction,
    ) -> Result<CommandOutcome, ServiceError> {
        let command = action.name();
        let started = Instant::now();
        let result = self.execute_in_lane(event_id, action).await;
        metrics::record_command(command, &result, started.elapsed().as_secs_f64());
        result
    }

    /// Decide, commit and report one command while holding the event's lane
    async fn execute_in_lane(
        &self,
        event_id: EventId,
        action: AdmissionAction,
    ) -> Result<CommandOutcome, ServiceError> {
        loop {
            let slot = self.slot(event_id).await?;
            let _lane = slot.lane.lock().await;
            if slot.retired.load(Ordering::Acquire) {
                // Evicted while we waited; the next lookup reloads from the store.
                continue;
            }
            return Self::decide(&slot, action).await;
        }
    }

    async fn decide(
        slot: &EventSlot,
        action: AdmissionAction,
    ) -> Result<CommandOutcome, ServiceError> {
        let command = action.name();
        let (outcome, mut handle) = slot
            .store
            .send_and_inspect(action, |state| state.last_outcome.clone())
            .await?;
        let outcome = outcome.ok_or(ServiceError::MissingOutcome { command })??;

        handle.wait().await;

        if let Some(error) = slot.store.state(|state| state.commit_failure.clone()).await {
            tracing::warn!(command, %error, "Decision rolled back");
            return Err(ServiceError::CommitFailed(error));
        }

        tracing::debug!(command, "Decision committed");
        Ok(outcome)
    }

    async fn slot(&self, event_id: EventId) -> Result<Arc<EventSlot>, ServiceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ShutdownInProgress.into());
        }

        loop {
            if let Some(slot) = self.slots.read().await.get(&event_id) {
                return Ok(Arc::clone(slot));
            }

            // Loaded outside the map lock so a slow load never blocks other events.
            let evictions = self.evictions.load(Ordering::Acquire);
            let roster = self.load_roster(event_id).await?;
            let mut slots = self.slots.write().await;
            if self.evictions.load(Ordering::Acquire) != evictions {
                // A slot was evicted mid-load; its last commit may postdate this roster.
                continue;
            }

            let slot = slots.entry(event_id).or_insert_with(|| {
                let environment = AdmissionEnvironment::new(
                    Arc::clone(&self.clock),
                    Arc::clone(&self.store),
                    self.outbox.clone(),
                );
                Arc::new(EventSlot {
                    lane: Mutex::new(()),
                    store: Store::new(
                        AdmissionState::new(roster),
                        AdmissionReducer::new(),
                        environment,
                    ),
                    retired: AtomicBool::new(false),
                })
            });
            return Ok(Arc::clone(slot));
        }
    }

    async fn load_roster(&self, event_id: EventId) -> Result<EventRoster, ServiceError> {
        let capacity = self
            .store
            .load_capacity(&event_id)
            .await
            .map_err(Self::persistence_error)?;
        let registrations = self
            .store
            .load_registrations(&event_id)
            .await
            .map_err(Self::persistence_error)?;
        let next_sequence = self
            .store
            .load_next_sequence(&event_id)
            .await
            .map_err(Self::persistence_error)?;

        let roster = EventRoster::from_parts(event_id, capacity, registrations, next_sequence);
        engine::verify_capacity(&roster)?;

        tracing::debug!(
            event_id = %event_id,
            capacity = %roster.capacity,
            registrations = roster.registrations.len(),
            "Loaded event roster"
        );
        Ok(roster)
    }

    fn persistence_error(error: PersistenceError) -> ServiceError {
        match error {
            PersistenceError::EventNotFound(event_id) => {
                AdmissionError::NotFound(Missing::Event(event_id)).into()
            },
            other => other.into(),
        }
    }
}

impl std::fmt::Debug for AdmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionService")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
