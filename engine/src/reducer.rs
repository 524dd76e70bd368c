//! Admission reducer: one event's roster driven through the `Reducer` trait.
//!
//! Commands are decided synchronously by [`crate::engine`] while the store
//! holds its write lock. A successful decision returns a single effect that
//! commits the new roster and, only once the commit succeeded, publishes the
//! decision's notifications. The effect feeds back [`AdmissionAction::Committed`]
//! or [`AdmissionAction::CommitFailed`]; the latter restores the roster as it
//! was before the command.

use crate::engine::{self, Decision};
use crate::error::AdmissionError;
use crate::metrics;
use crate::notification::AdmissionNotification;
use crate::notifier::NotificationOutbox;
use crate::ports::RegistrationStore;
use crate::types::{EventRoster, Registration, RegistrationId, RequesterId};
use admission_core::{async_effect, effect::Effect, environment::Clock, reducer::Reducer};
use admission_core::{smallvec, SmallVec};
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// Commands and fed-back events for one event's roster
#[derive(Clone, Debug)]
pub enum AdmissionAction {
    // Commands
    /// Register a requester
    Register {
        /// Who registers
        requester_id: RequesterId,
        /// Display name
        participant_name: String,
        /// People in the party
        party_size: u32,
    },

    /// Cancel a registration
    Cancel {
        /// Registration to remove
        registration_id: RegistrationId,
    },

    /// Change a registration's party size
    ModifyPartySize {
        /// Registration to resize
        registration_id: RegistrationId,
        /// New party size
        party_size: u32,
    },

    /// Re-derive every status from arrival order
    Recompute,

    /// Change the event's capacity and re-derive every status
    ChangeCapacity {
        /// New capacity
        capacity: u32,
    },

    // Events
    /// The store accepted the roster at this revision
    Committed {
        /// Committed revision
        revision: u64,
    },

    /// The store refused the roster at this revision
    CommitFailed {
        /// Revision that failed
        revision: u64,
        /// Roster before the failed command
        previous: Box<EventRoster>,
        /// Store error message
        error: String,
    },
}

impl AdmissionAction {
    /// Action name for logs and metrics
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Cancel { .. } => "cancel",
            Self::ModifyPartySize { .. } => "modify_party_size",
            Self::Recompute => "recompute",
            Self::ChangeCapacity { .. } => "change_capacity",
            Self::Committed { .. } => "committed",
            Self::CommitFailed { .. } => "commit_failed",
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// What a successful command produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The registration created, removed or resized
    Registration(Registration),
    /// All registrations after a re-derivation
    Roster(Vec<Registration>),
}

/// State of one event's admission store
#[derive(Clone, Debug)]
pub struct AdmissionState {
    /// Current roster, including decisions not yet committed
    pub roster: EventRoster,
    /// Result of the most recent command
    pub last_outcome: Option<Result<CommandOutcome, AdmissionError>>,
    /// Store error of the most recent command, if its commit failed
    pub commit_failure: Option<String>,
    /// Latest revision the store acknowledged
    pub durable_revision: u64,
}

impl AdmissionState {
    /// State for a roster loaded from the store
    #[must_use]
    pub const fn new(roster: EventRoster) -> Self {
        let durable_revision = roster.revision;
        Self {
            roster,
            last_outcome: None,
            commit_failure: None,
            durable_revision,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the admission reducer
#[derive(Clone)]
pub struct AdmissionEnvironment {
    /// Registration timestamps
    pub clock: Arc<dyn Clock>,
    /// Durable storage
    pub store: Arc<dyn RegistrationStore>,
    /// Where committed notifications go
    pub outbox: NotificationOutbox,
}

impl AdmissionEnvironment {
    /// Bundle the reducer's dependencies
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn RegistrationStore>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            clock,
            store,
            outbox,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer deciding admission for one event
#[derive(Clone, Copy, Debug, Default)]
pub struct AdmissionReducer;

impl AdmissionReducer {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Record a command's result and describe its commit
    fn conclude(
        state: &mut AdmissionState,
        previous: EventRoster,
        result: Result<Decision<CommandOutcome>, AdmissionError>,
        env: &AdmissionEnvironment,
    ) -> SmallVec<[Effect<AdmissionAction>; 4]> {
        state.commit_failure = None;

        match result {
            Ok(decision) => {
                state.last_outcome = Some(Ok(decision.value));
                smallvec![Self::commit(
                    previous,
                    state.roster.clone(),
                    decision.notifications,
                    env,
                )]
            },
            Err(error) => {
                if error.is_fatal() {
                    tracing::error!(
                        event_id = %state.roster.event_id,
                        %error,
                        "Command aborted to protect event capacity"
                    );
                } else {
                    tracing::debug!(
                        event_id = %state.roster.event_id,
                        %error,
                        "Command rejected"
                    );
                }
                state.last_outcome = Some(Err(error));
                SmallVec::new()
            },
        }
    }

    /// Commit `roster`, then publish `notifications` or request a rollback
    fn commit(
        previous: EventRoster,
        roster: EventRoster,
        notifications: Vec<AdmissionNotification>,
        env: &AdmissionEnvironment,
    ) -> Effect<AdmissionAction> {
        let store = Arc::clone(&env.store);
        let outbox = env.outbox.clone();

        async_effect! {
            let revision = roster.revision;
            match store.commit(&roster).await {
                Ok(()) => {
                    metrics::record_notifications(&notifications);
                    metrics::record_load(roster.confirmed_load(), roster.capacity.value());
                    outbox.publish(notifications);
                    Some(AdmissionAction::Committed { revision })
                },
                Err(error) => {
                    tracing::warn!(
                        event_id = %roster.event_id,
                        revision,
                        %error,
                        "Commit failed, rolling back"
                    );
                    Some(AdmissionAction::CommitFailed {
                        revision,
                        previous: Box::new(previous),
                        error: error.to_string(),
                    })
                },
            }
        }
    }
}

impl Reducer for AdmissionReducer {
    type State = AdmissionState;
    type Action = AdmissionAction;
    type Environment = AdmissionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            AdmissionAction::Register {
                requester_id,
                participant_name,
                party_size,
            } => {
                let previous = state.roster.clone();
                let result = engine::register(
                    &mut state.roster,
                    requester_id,
                    participant_name,
                    party_size,
                    env.clock.now(),
                )
                .map(|decision| decision.map(CommandOutcome::Registration));
                Self::conclude(state, previous, result, env)
            },

            AdmissionAction::Cancel { registration_id } => {
                let previous = state.roster.clone();
                let result = engine::cancel(&mut state.roster, registration_id)
                    .map(|decision| decision.map(CommandOutcome::Registration));
                Self::conclude(state, previous, result, env)
            },

            AdmissionAction::ModifyPartySize {
                registration_id,
                party_size,
            } => {
                let previous = state.roster.clone();
                let result =
                    engine::modify_party_size(&mut state.roster, registration_id, party_size)
                        .map(|decision| decision.map(CommandOutcome::Registration));
                Self::conclude(state, previous, result, env)
            },

            AdmissionAction::Recompute => {
                let previous = state.roster.clone();
                let result = engine::rederive(&mut state.roster)
                    .map(|decision| decision.map(CommandOutcome::Roster));
                Self::conclude(state, previous, result, env)
            },

            AdmissionAction::ChangeCapacity { capacity } => {
                let previous = state.roster.clone();
                let result = engine::change_capacity(&mut state.roster, capacity)
                    .map(|decision| decision.map(CommandOutcome::Roster));
                Self::conclude(state, previous, result, env)
            },

            AdmissionAction::Committed { revision } => {
                state.durable_revision = state.durable_revision.max(revision);
                tracing::trace!(event_id = %state.roster.event_id, revision, "Revision durable");
                SmallVec::new()
            },

            AdmissionAction::CommitFailed {
                revision,
                previous,
                error,
            } => {
                if state.roster.revision == revision {
                    state.roster = *previous;
                    tracing::info!(
                        event_id = %state.roster.event_id,
                        failed_revision = revision,
                        restored_revision = state.roster.revision,
                        "Rolled back uncommitted decision"
                    );
                } else {
                    tracing::error!(
                        event_id = %state.roster.event_id,
                        failed_revision = revision,
                        current_revision = state.roster.revision,
                        "Commit failure for a superseded revision, not rolling back"
                    );
                }
                state.commit_failure = Some(error);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistrationStore;
    use crate::types::{Capacity, EventId, RegistrationStatus};
    use admission_testing::{assertions, test_clock, ReducerTest};

    fn environment() -> AdmissionEnvironment {
        let (outbox, _receiver) = NotificationOutbox::channel();
        AdmissionEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(InMemoryRegistrationStore::new()),
            outbox,
        )
    }

    fn state(capacity: u32) -> AdmissionState {
        AdmissionState::new(EventRoster::new(
            EventId::new(),
            Capacity::new(capacity).unwrap(),
        ))
    }

    fn register(party_size: u32) -> AdmissionAction {
        AdmissionAction::Register {
            requester_id: RequesterId::new(),
            participant_name: "guest".to_string(),
            party_size,
        }
    }

    fn registered(state: &AdmissionState) -> Registration {
        match state.last_outcome.clone() {
            Some(Ok(CommandOutcome::Registration(registration))) => registration,
            other => unreachable!("expected a registration outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_register_decides_and_commits() {
        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(state(8))
            .given_actions(vec![register(5)])
            .when_action(register(4))
            .then_state(|state| {
                let registration = registered(state);
                assert_eq!(registration.status, RegistrationStatus::Waitlisted);
                assert_eq!(registration.registered_at, test_clock().now());
                assert_eq!(state.roster.confirmed_load(), 5);
                assert_eq!(state.roster.revision, 2);
                assert_eq!(state.durable_revision, 0);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_rejected_command_has_no_effects() {
        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(state(8))
            .when_action(register(0))
            .then_state(|state| {
                assert!(matches!(
                    state.last_outcome,
                    Some(Err(AdmissionError::InvalidPartySize { party_size: 0 }))
                ));
                assert_eq!(state.roster.revision, 0);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_commit_failure_restores_previous_roster() {
        let initial = state(8);
        let previous = initial.roster.clone();

        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(initial)
            .given_actions(vec![register(3)])
            .when_action(AdmissionAction::CommitFailed {
                revision: 1,
                previous: Box::new(previous.clone()),
                error: "store down".to_string(),
            })
            .then_state(move |state| {
                assert_eq!(state.roster, previous);
                assert_eq!(state.commit_failure.as_deref(), Some("store down"));
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_stale_commit_failure_keeps_roster() {
        let initial = state(8);
        let previous = initial.roster.clone();

        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(initial)
            .given_actions(vec![register(3), register(2)])
            .when_action(AdmissionAction::CommitFailed {
                revision: 1,
                previous: Box::new(previous),
                error: "store down".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.roster.revision, 2);
                assert_eq!(state.roster.registrations.len(), 2);
                assert!(state.commit_failure.is_some());
            })
            .run();
    }

    #[test]
    fn test_committed_advances_durable_revision() {
        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(state(8))
            .given_actions(vec![
                register(1),
                AdmissionAction::Committed { revision: 1 },
            ])
            .when_action(AdmissionAction::Committed { revision: 0 })
            .then_state(|state| assert_eq!(state.durable_revision, 1))
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_next_command_clears_commit_failure() {
        let initial = state(8);
        let previous = initial.roster.clone();

        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(initial)
            .given_actions(vec![
                register(3),
                AdmissionAction::CommitFailed {
                    revision: 1,
                    previous: Box::new(previous),
                    error: "store down".to_string(),
                },
            ])
            .when_action(AdmissionAction::Recompute)
            .then_state(|state| {
                assert!(state.commit_failure.is_none());
                assert!(matches!(
                    state.last_outcome,
                    Some(Ok(CommandOutcome::Roster(ref registrations))) if registrations.is_empty()
                ));
            })
            .run();
    }

    #[test]
    fn test_change_capacity_rejects_zero() {
        ReducerTest::new(AdmissionReducer::new())
            .with_env(environment())
            .given_state(state(8))
            .when_action(AdmissionAction::ChangeCapacity { capacity: 0 })
            .then_state(|state| {
                assert!(matches!(
                    state.last_outcome,
                    Some(Err(AdmissionError::InvalidCapacity { capacity: 0 }))
                ));
                assert_eq!(state.roster.capacity.value(), 8);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[tokio::test]
    async fn test_commit_effect_publishes_after_store_accepts() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let event_id = store.create_event(8).unwrap();
        let (outbox, mut receiver) = NotificationOutbox::channel();
        let env = AdmissionEnvironment::new(Arc::new(test_clock()), store.clone(), outbox);
        let mut state = AdmissionState::new(EventRoster::new(event_id, Capacity::new(8).unwrap()));

        let mut effects = AdmissionReducer.reduce(&mut state, register(2), &env);
        let Some(Effect::Future(commit)) = effects.pop() else {
            unreachable!("register always commits");
        };

        assert!(matches!(
            commit.await,
            Some(AdmissionAction::Committed { revision: 1 })
        ));
        assert_eq!(store.registrations(&event_id).map(|r| r.len()), Some(1));
        assert_eq!(
            receiver.try_recv().map(|n| n.kind()).ok(),
            Some("created")
        );
    }

    #[tokio::test]
    async fn test_commit_effect_requests_rollback_on_failure() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let event_id = store.create_event(8).unwrap();
        store.fail_next_commits(1);
        let (outbox, mut receiver) = NotificationOutbox::channel();
        let env = AdmissionEnvironment::new(Arc::new(test_clock()), store.clone(), outbox);
        let mut state = AdmissionState::new(EventRoster::new(event_id, Capacity::new(8).unwrap()));

        let mut effects = AdmissionReducer.reduce(&mut state, register(2), &env);
        let Some(Effect::Future(commit)) = effects.pop() else {
            unreachable!("register always commits");
        };

        assert!(matches!(
            commit.await,
            Some(AdmissionAction::CommitFailed { revision: 1, .. })
        ));
        assert!(receiver.try_recv().is_err());
    }
}
