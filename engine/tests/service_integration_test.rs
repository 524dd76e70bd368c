//! Integration tests for the admission service
//!
//! Runs the full stack: service lanes, runtime stores, the in-memory
//! registration store and a recording notifier.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use admission_engine::{
    AdmissionError, AdmissionNotification, AdmissionService, Capacity, Config, EventId,
    EventRoster, InMemoryRegistrationStore, Missing, PartySize, RecordingNotifier, Registration,
    RegistrationId, RegistrationStatus, RequesterId, Sequence, ServiceError,
};
use admission_testing::test_clock;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    store: Arc<InMemoryRegistrationStore>,
    notifier: RecordingNotifier,
    service: Arc<AdmissionService>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let notifier = RecordingNotifier::new();
    let mut config = Config::default();
    config.notifications.max_retries = 1;
    config.notifications.initial_delay_ms = 1;
    config.notifications.max_delay_ms = 5;

    let service = Arc::new(AdmissionService::new(
        store.clone(),
        Arc::new(notifier.clone()),
        Arc::new(test_clock()),
        &config,
    ));

    Harness {
        store,
        notifier,
        service,
    }
}

fn kinds(notifications: &[AdmissionNotification]) -> Vec<&'static str> {
    notifications.iter().map(AdmissionNotification::kind).collect()
}

#[tokio::test]
async fn test_cancel_promotes_and_persists() {
    let h = harness();
    let event = h.store.create_event(8).unwrap();

    let a = h.service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    let b = h.service.register(event, RequesterId::new(), "B", 4).await.unwrap();
    assert_eq!(a.status, RegistrationStatus::Confirmed);
    assert_eq!(b.status, RegistrationStatus::Waitlisted);

    let removed = h.service.cancel(event, a.id).await.unwrap();
    assert_eq!(removed.id, a.id);

    let stored = h.store.registrations(&event).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, b.id);
    assert_eq!(stored[0].status, RegistrationStatus::Confirmed);
    assert_eq!(h.service.durable_revision(event).await.unwrap(), 3);

    let delivered = h.notifier.wait_for(4, WAIT).await;
    assert_eq!(kinds(&delivered), vec!["created", "created", "cancelled", "promoted"]);
    assert_eq!(delivered[3].registration_id(), b.id);
}

#[tokio::test]
async fn test_party_size_scenarios() {
    let h = harness();

    // Shrink makes room for the waitlist
    let event = h.store.create_event(8).unwrap();
    let a = h.service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    h.service.register(event, RequesterId::new(), "B", 3).await.unwrap();
    let c = h.service.register(event, RequesterId::new(), "C", 2).await.unwrap();
    h.service.modify_party_size(event, a.id, 3).await.unwrap();
    let roster = h.service.roster(event).await.unwrap();
    assert_eq!(roster.get(&c.id).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(roster.confirmed_load(), 8);

    // Growth within headroom
    let event = h.store.create_event(8).unwrap();
    let a = h.service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    h.service.register(event, RequesterId::new(), "B", 2).await.unwrap();
    let grown = h.service.modify_party_size(event, a.id, 6).await.unwrap();
    assert_eq!(grown.status, RegistrationStatus::Confirmed);
    assert_eq!(h.service.roster(event).await.unwrap().confirmed_load(), 8);

    // Growth past headroom
    let event = h.store.create_event(8).unwrap();
    let a = h.service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    h.service.register(event, RequesterId::new(), "B", 2).await.unwrap();
    let demoted = h.service.modify_party_size(event, a.id, 7).await.unwrap();
    assert_eq!(demoted.status, RegistrationStatus::Waitlisted);
    assert_eq!(demoted.party_size.value(), 7);
    assert_eq!(h.service.roster(event).await.unwrap().confirmed_load(), 2);
}

#[tokio::test]
async fn test_rejections_are_reported() {
    let h = harness();
    let event = h.store.create_event(4).unwrap();
    let requester = RequesterId::new();
    h.service.register(event, requester, "A", 1).await.unwrap();

    let duplicate = h.service.register(event, requester, "A", 1).await.unwrap_err();
    assert!(matches!(
        duplicate.admission(),
        Some(AdmissionError::DuplicateRegistration { .. })
    ));

    let invalid = h.service.register(event, RequesterId::new(), "B", 0).await.unwrap_err();
    assert!(matches!(
        invalid.admission(),
        Some(AdmissionError::InvalidPartySize { party_size: 0 })
    ));

    let missing = RegistrationId::new();
    let not_found = h.service.cancel(event, missing).await.unwrap_err();
    assert_eq!(
        not_found.admission(),
        Some(&AdmissionError::NotFound(Missing::Registration(missing)))
    );

    let unknown_event = EventId::new();
    let no_event = h.service.roster(unknown_event).await.unwrap_err();
    assert_eq!(
        no_event.admission(),
        Some(&AdmissionError::NotFound(Missing::Event(unknown_event)))
    );

    assert_eq!(h.store.registrations(&event).unwrap().len(), 1);
}

#[tokio::test]
async fn test_commit_failure_rolls_back_without_notifying() {
    let h = harness();
    let event = h.store.create_event(8).unwrap();
    let a = h.service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    h.service.register(event, RequesterId::new(), "B", 4).await.unwrap();
    let before = h.service.roster(event).await.unwrap();
    h.notifier.wait_for(2, WAIT).await;

    h.store.fail_next_commits(1);
    let error = h.service.cancel(event, a.id).await.unwrap_err();
    assert!(matches!(error, ServiceError::CommitFailed(_)));

    assert_eq!(h.service.roster(event).await.unwrap(), before);
    assert_eq!(h.store.registrations(&event).unwrap().len(), 2);

    // The retry succeeds and only its notifications go out
    h.service.cancel(event, a.id).await.unwrap();
    let delivered = h.notifier.wait_for(4, WAIT).await;
    assert_eq!(kinds(&delivered), vec!["created", "created", "cancelled", "promoted"]);
}

#[tokio::test]
async fn test_notifications_follow_decision_order() {
    let h = harness();
    let event = h.store.create_event(6).unwrap();

    // A(4) confirmed, B(3) waitlisted, C(2) confirmed
    let a = h.service.register(event, RequesterId::new(), "A", 4).await.unwrap();
    let b = h.service.register(event, RequesterId::new(), "B", 3).await.unwrap();
    let c = h.service.register(event, RequesterId::new(), "C", 2).await.unwrap();
    // Capacity 3: only B fits first
    h.service.change_capacity(event, 3).await.unwrap();
    // B shrinks to 1, leaving room for C
    h.service.modify_party_size(event, b.id, 1).await.unwrap();

    let delivered = h.notifier.wait_for(8, WAIT).await;
    let summary: Vec<_> = delivered
        .iter()
        .map(|n| (n.kind(), n.registration_id()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("created", a.id),
            ("created", b.id),
            ("created", c.id),
            ("demoted", a.id),
            ("promoted", b.id),
            ("demoted", c.id),
            ("resized", b.id),
            ("promoted", c.id),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_registrations_never_oversell() {
    let h = harness();
    let event = h.store.create_event(10).unwrap();

    let tasks: Vec<_> = (0..50u32)
        .map(|i| {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service
                    .register(event, RequesterId::new(), format!("guest-{i}"), i % 4 + 1)
                    .await
            })
        })
        .collect();

    let mut registrations = Vec::new();
    for task in tasks {
        registrations.push(task.await.unwrap().unwrap());
    }

    let roster = h.service.roster(event).await.unwrap();
    assert!(roster.confirmed_load() <= 10);
    assert_eq!(roster.registrations.len(), 50);
    assert!(roster.waitlisted().all(|r| r.party_size.load() > roster.headroom()));

    let confirmed_by_caller: u64 = registrations
        .iter()
        .filter(|r| r.is_confirmed())
        .map(|r| r.party_size.load())
        .sum();
    assert_eq!(confirmed_by_caller, roster.confirmed_load());

    let stored = EventRoster::from_parts(
        event,
        h.store.capacity(&event).unwrap(),
        h.store.registrations(&event).unwrap(),
        h.store.next_sequence(&event).unwrap(),
    );
    assert_eq!(stored.registrations, roster.registrations);
}

#[tokio::test]
async fn test_concurrent_cancellations_promote_in_order() {
    let h = harness();
    let event = h.store.create_event(5).unwrap();

    let mut confirmed = Vec::new();
    for i in 0..5 {
        let r = h.service.register(event, RequesterId::new(), format!("c{i}"), 1).await.unwrap();
        confirmed.push(r);
    }
    let mut waiting = Vec::new();
    for i in 0..5 {
        let r = h.service.register(event, RequesterId::new(), format!("w{i}"), 1).await.unwrap();
        assert_eq!(r.status, RegistrationStatus::Waitlisted);
        waiting.push(r);
    }

    let tasks: Vec<_> = confirmed
        .iter()
        .take(3)
        .map(|r| {
            let service = Arc::clone(&h.service);
            let id = r.id;
            tokio::spawn(async move { service.cancel(event, id).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let roster = h.service.roster(event).await.unwrap();
    let statuses: Vec<_> = waiting
        .iter()
        .map(|w| roster.get(&w.id).unwrap().status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            RegistrationStatus::Confirmed,
            RegistrationStatus::Confirmed,
            RegistrationStatus::Confirmed,
            RegistrationStatus::Waitlisted,
            RegistrationStatus::Waitlisted,
        ]
    );
}

#[tokio::test]
async fn test_events_are_independent() {
    let h = harness();
    let busy = h.store.create_event(3).unwrap();
    let quiet = h.store.create_event(3).unwrap();

    h.store.fail_next_commits(1);
    let failed = h.service.register(busy, RequesterId::new(), "A", 2).await;
    assert!(matches!(failed, Err(ServiceError::CommitFailed(_))));

    let ok = h.service.register(quiet, RequesterId::new(), "B", 3).await.unwrap();
    assert_eq!(ok.status, RegistrationStatus::Confirmed);
    assert!(h.service.roster(busy).await.unwrap().registrations.is_empty());
}

#[tokio::test]
async fn test_reads_see_whole_decisions() {
    let h = harness();
    let event = h.store.create_event(20).unwrap();
    let mut first = Vec::new();
    for i in 0..20 {
        first.push(h.service.register(event, RequesterId::new(), format!("a{i}"), 1).await.unwrap());
    }
    for i in 0..20 {
        h.service.register(event, RequesterId::new(), format!("w{i}"), 1).await.unwrap();
    }

    let reader = {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            for _ in 0..200 {
                let roster = service.roster(event).await.unwrap();
                assert_eq!(roster.confirmed_load(), 20, "observed a half-applied cancellation");
                tokio::task::yield_now().await;
            }
        })
    };

    for registration in first {
        h.service.cancel(event, registration.id).await.unwrap();
    }
    reader.await.unwrap();
}

#[tokio::test]
async fn test_loads_existing_registrations() {
    let h = harness();
    let event = EventId::new();
    let seeded: Vec<Registration> = (1..=3u64)
        .map(|n| Registration {
            id: RegistrationId::new(),
            event_id: event,
            requester_id: RequesterId::new(),
            participant_name: format!("seed-{n}"),
            party_size: PartySize::new(2).unwrap(),
            status: if n < 3 {
                RegistrationStatus::Confirmed
            } else {
                RegistrationStatus::Waitlisted
            },
            sequence: Sequence::new(n * 10),
            registered_at: test_clock_now(),
        })
        .collect();
    h.store.insert_event(event, Capacity::new(4).unwrap(), seeded.clone());

    let late = h.service.register(event, RequesterId::new(), "late", 1).await.unwrap();
    assert_eq!(late.sequence, Sequence::new(31));
    assert_eq!(late.status, RegistrationStatus::Waitlisted);

    h.service.cancel(event, seeded[0].id).await.unwrap();
    let roster = h.service.roster(event).await.unwrap();
    assert_eq!(roster.get(&seeded[2].id).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(roster.get(&late.id).unwrap().status, RegistrationStatus::Waitlisted);
}

#[tokio::test]
async fn test_corrupted_event_is_refused() {
    let h = harness();
    let event = EventId::new();
    let overbooked = Registration {
        id: RegistrationId::new(),
        event_id: event,
        requester_id: RequesterId::new(),
        participant_name: "too many".to_string(),
        party_size: PartySize::new(5).unwrap(),
        status: RegistrationStatus::Confirmed,
        sequence: Sequence::FIRST,
        registered_at: test_clock_now(),
    };
    h.store.insert_event(event, Capacity::new(4).unwrap(), vec![overbooked]);

    let error = h.service.register(event, RequesterId::new(), "x", 1).await.unwrap_err();
    assert!(error.admission().is_some_and(AdmissionError::is_fatal));
}

#[tokio::test]
async fn test_shutdown_rejects_new_commands() {
    let h = harness();
    let event = h.store.create_event(4).unwrap();
    h.service.register(event, RequesterId::new(), "A", 1).await.unwrap();

    h.service.shutdown(WAIT).await.unwrap();
    assert_eq!(h.notifier.delivered().len(), 1);

    let result = h.service.register(event, RequesterId::new(), "B", 1).await;
    assert!(matches!(result, Err(ServiceError::Runtime(_))));
}

#[tokio::test]
async fn test_sequence_survives_reload_after_cancelling_newest() {
    let h = harness();
    let event = h.store.create_event(8).unwrap();

    let a = h.service.register(event, RequesterId::new(), "A", 2).await.unwrap();
    let b = h.service.register(event, RequesterId::new(), "B", 2).await.unwrap();
    h.service.cancel(event, b.id).await.unwrap();
    h.service.shutdown(WAIT).await.unwrap();
    assert_eq!(h.store.next_sequence(&event), Some(Sequence::new(3)));

    let restarted = AdmissionService::new(
        h.store.clone(),
        Arc::new(RecordingNotifier::new()),
        Arc::new(test_clock()),
        &Config::default(),
    );
    let c = restarted.register(event, RequesterId::new(), "C", 2).await.unwrap();

    assert_eq!(a.sequence, Sequence::FIRST);
    assert_eq!(b.sequence, Sequence::new(2));
    assert_eq!(c.sequence, Sequence::new(3));
    assert_eq!(h.store.next_sequence(&event), Some(Sequence::new(4)));
}

#[tokio::test]
async fn test_failed_delivery_keeps_decision() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let notifier = RecordingNotifier::new();
    let mut config = Config::default();
    config.notifications.max_retries = 0;
    let service = AdmissionService::new(
        store.clone(),
        Arc::new(notifier.clone()),
        Arc::new(test_clock()),
        &config,
    );
    let event = store.create_event(8).unwrap();

    let a = service.register(event, RequesterId::new(), "A", 5).await.unwrap();
    let b = service.register(event, RequesterId::new(), "B", 4).await.unwrap();
    assert_eq!(notifier.wait_for(2, WAIT).await.len(), 2);

    // Both the cancellation and the promotion notice are lost
    notifier.fail_next(2);
    service.cancel(event, a.id).await.unwrap();
    let c = service.register(event, RequesterId::new(), "C", 1).await.unwrap();

    let delivered = notifier.wait_for(3, WAIT).await;
    assert_eq!(kinds(&delivered), vec!["created", "created", "created"]);
    assert_eq!(delivered[2].registration_id(), c.id);

    let roster = service.roster(event).await.unwrap();
    assert!(roster.get(&a.id).is_none());
    assert_eq!(roster.get(&b.id).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(roster.confirmed_load(), 5);

    let stored = store.registrations(&event).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| r.id != a.id));
    assert_eq!(
        stored.iter().find(|r| r.id == b.id).unwrap().status,
        RegistrationStatus::Confirmed
    );
}

#[tokio::test]
async fn test_forget_reloads_from_store() {
    let h = harness();
    let event = h.store.create_event(4).unwrap();
    let requester = RequesterId::new();
    let a = h.service.register(event, requester, "A", 3).await.unwrap();
    assert_eq!(h.service.resident_events().await, 1);

    assert!(h.service.forget(event).await);
    assert!(!h.service.forget(event).await);
    assert!(!h.service.forget(EventId::new()).await);
    assert_eq!(h.service.resident_events().await, 0);

    let again = h.service.register(event, requester, "A", 1).await;
    assert!(matches!(
        again,
        Err(ServiceError::Admission(AdmissionError::DuplicateRegistration { .. }))
    ));
    assert_eq!(h.service.resident_events().await, 1);

    let b = h.service.register(event, RequesterId::new(), "B", 2).await.unwrap();
    assert_eq!(b.sequence, a.sequence.next());
    assert_eq!(b.status, RegistrationStatus::Waitlisted);
}

#[tokio::test]
async fn test_forget_during_registrations_never_oversells() {
    let h = harness();
    let event = h.store.create_event(10).unwrap();

    let registrations: Vec<_> = (0..30)
        .map(|i| {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service
                    .register(event, RequesterId::new(), format!("guest-{i}"), 1)
                    .await
            })
        })
        .collect();
    let evictions: Vec<_> = (0..10)
        .map(|_| {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move { service.forget(event).await })
        })
        .collect();

    for handle in registrations {
        handle.await.unwrap().unwrap();
    }
    for handle in evictions {
        handle.await.unwrap();
    }

    let stored = h.store.registrations(&event).unwrap();
    assert_eq!(stored.len(), 30);
    let confirmed = stored.iter().filter(|r| r.is_confirmed()).count();
    assert_eq!(confirmed, 10);

    let mut sequences: Vec<u64> = stored.iter().map(|r| r.sequence.value()).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 30);
}

fn test_clock_now() -> chrono::DateTime<chrono::Utc> {
    use admission_core::environment::Clock;
    test_clock().now()
}
