//! Notification outbox, dispatcher and notifier adapters.
//!
//! Committed decisions publish their notifications to a [`NotificationOutbox`].
//! A [`NotificationDispatcher`] task drains it in publication order and hands
//! each notification to a [`Notifier`], retrying with backoff. A delivery that
//! still fails is logged and counted; the admission decision stands.

use crate::error::NotifyError;
use crate::notification::AdmissionNotification;
use crate::ports::Notifier;
use crate::types::RegistrationStatus;
use admission_runtime::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// ============================================================================
// Outbox
// ============================================================================

/// Sending half of the notification queue
#[derive(Clone, Debug)]
pub struct NotificationOutbox {
    sender: mpsc::UnboundedSender<AdmissionNotification>,
}

impl NotificationOutbox {
    /// Create an outbox and the receiver a dispatcher drains
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AdmissionNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue notifications for delivery, preserving their order
    pub fn publish(&self, notifications: Vec<AdmissionNotification>) {
        for notification in notifications {
            let kind = notification.kind();
            if self.sender.send(notification).is_err() {
                tracing::warn!(kind, "Outbox closed, notification dropped");
                metrics::counter!("admission_notifications_dropped_total", "kind" => kind)
                    .increment(1);
            }
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Background task delivering outbox notifications one at a time
#[derive(Debug)]
pub struct NotificationDispatcher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Start draining `receiver` into `notifier`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        receiver: mpsc::UnboundedReceiver<AdmissionNotification>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(receiver, notifier, policy, shutdown_rx));
        Self { shutdown, task }
    }

    /// Deliver what is already queued, then stop
    ///
    /// Returns `false` if the queue was not drained within `timeout`; the task
    /// is aborted in that case.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let _ = self.shutdown.send(true);
        let abort = self.task.abort_handle();

        if tokio::time::timeout(timeout, self.task).await.is_ok() {
            true
        } else {
            tracing::warn!("Notification dispatcher did not drain in time, aborting");
            abort.abort();
            false
        }
    }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<AdmissionNotification>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Notification dispatcher started");

    loop {
        tokio::select! {
            biased;

            next = receiver.recv() => match next {
                Some(notification) => deliver(notifier.as_ref(), &policy, notification).await,
                None => break,
            },

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    while let Ok(notification) = receiver.try_recv() {
                        deliver(notifier.as_ref(), &policy, notification).await;
                    }
                    break;
                }
            }
        }
    }

    tracing::debug!("Notification dispatcher stopped");
}

async fn deliver(notifier: &dyn Notifier, policy: &RetryPolicy, notification: AdmissionNotification) {
    let kind = notification.kind();
    let notification = &notification;
    let result = retry_with_backoff(policy, "notify", move || notifier.notify(notification)).await;

    match result {
        Ok(()) => {
            metrics::counter!("admission_notifications_delivered_total", "kind" => kind)
                .increment(1);
        },
        Err(error) => {
            tracing::error!(
                kind,
                registration_id = %notification.registration_id(),
                %error,
                "Notification undeliverable, giving up"
            );
            metrics::counter!("admission_notifications_failed_total", "kind" => kind)
                .increment(1);
        },
    }
}

// ============================================================================
// Notifiers
// ============================================================================

/// Logs the message an email integration would send
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    fn subject(notification: &AdmissionNotification) -> String {
        match notification {
            AdmissionNotification::RegistrationCreated { status, .. } => match status {
                RegistrationStatus::Confirmed => "Your registration is confirmed".to_string(),
                RegistrationStatus::Waitlisted => {
                    "The event is full, you have been added to the waitlist".to_string()
                },
            },
            AdmissionNotification::RegistrationCancelled { .. } => {
                "Your registration has been cancelled".to_string()
            },
            AdmissionNotification::RegistrationPromoted { .. } => {
                "A spot opened up: your registration is now confirmed".to_string()
            },
            AdmissionNotification::RegistrationDemoted { .. } => {
                "Your registration has been moved to the waitlist".to_string()
            },
            AdmissionNotification::RegistrationResized {
                party_size, status, ..
            } => format!("Your party size is now {party_size} ({status})"),
        }
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &AdmissionNotification) -> Result<(), NotifyError> {
        tracing::info!(
            requester_id = %notification.requester_id(),
            registration_id = %notification.registration_id(),
            kind = notification.kind(),
            subject = %Self::subject(notification),
            "Sending notification"
        );
        Ok(())
    }
}

/// Keeps every delivered notification for inspection in tests
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<AdmissionNotification>>>,
    failing: Arc<AtomicUsize>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` delivery attempts
    pub fn fail_next(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }

    /// Notifications delivered so far, in delivery order
    #[must_use]
    pub fn delivered(&self) -> Vec<AdmissionNotification> {
        self.lock().clone()
    }

    /// Poll until at least `count` notifications were delivered.
    ///
    /// Returns what was delivered by then, which may be fewer than `count` if
    /// `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<AdmissionNotification> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.delivered()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AdmissionNotification>> {
        self.delivered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &AdmissionNotification) -> Result<(), NotifyError> {
        let injected = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(NotifyError::Delivery("injected delivery failure".to_string()));
        }

        self.lock().push(notification.clone());
        Ok(())
    }
}
