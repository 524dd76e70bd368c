//! Business metrics for admission decisions.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `admission_commands_total{command, result}` - Commands by outcome (`ok` or an error kind)
//! - `admission_notifications_total{kind}` - Notifications emitted by committed decisions
//! - `admission_commit_failures_total` - Decisions rolled back because the store refused them
//! - `admission_invariant_violations_total` - Capacity invariant violations caught before commit
//! - `admission_notifications_delivered_total{kind}` - Notifications handed to the notifier
//! - `admission_notifications_failed_total{kind}` - Notifications given up on after retries
//! - `admission_notifications_dropped_total{kind}` - Notifications published after the outbox closed
//!
//! ## Histograms
//! - `admission_command_duration_seconds{command}` - Lane wait, decision and commit
//! - `admission_event_load_ratio` - Confirmed load over capacity after each committed command

use crate::error::ServiceError;
use crate::notification::AdmissionNotification;
use metrics::{describe_counter, describe_histogram};

/// Describe every admission metric.
///
/// Call once at startup, after installing a recorder.
pub fn register_admission_metrics() {
    describe_counter!(
        "admission_commands_total",
        "Admission commands processed, by command and result"
    );
    describe_counter!(
        "admission_notifications_total",
        "Notifications emitted by committed admission decisions, by kind"
    );
    describe_counter!(
        "admission_commit_failures_total",
        "Admission decisions rolled back because the registration store refused the commit"
    );
    describe_counter!(
        "admission_invariant_violations_total",
        "Capacity invariant violations detected before commit"
    );
    describe_counter!(
        "admission_notifications_delivered_total",
        "Notifications delivered to the notifier, by kind"
    );
    describe_counter!(
        "admission_notifications_failed_total",
        "Notifications abandoned after exhausting retries, by kind"
    );
    describe_counter!(
        "admission_notifications_dropped_total",
        "Notifications published after the outbox was closed, by kind"
    );
    describe_histogram!(
        "admission_command_duration_seconds",
        "Time from command submission to durable outcome"
    );
    describe_histogram!(
        "admission_event_load_ratio",
        "Confirmed load divided by capacity after a committed command"
    );

    tracing::info!("Admission metrics registered");
}

/// Record the outcome of one command.
pub fn record_command<T>(command: &'static str, result: &Result<T, ServiceError>, duration_secs: f64) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(ServiceError::Admission(error)) => {
            if error.is_fatal() {
                metrics::counter!("admission_invariant_violations_total").increment(1);
            }
            error.kind()
        },
        Err(ServiceError::Persistence(_)) => "persistence",
        Err(ServiceError::CommitFailed(_)) => {
            metrics::counter!("admission_commit_failures_total").increment(1);
            "commit_failed"
        },
        Err(ServiceError::Runtime(_)) => "runtime",
        Err(ServiceError::MissingOutcome { .. }) => "missing_outcome",
    };

    metrics::counter!("admission_commands_total", "command" => command, "result" => outcome)
        .increment(1);
    metrics::histogram!("admission_command_duration_seconds", "command" => command)
        .record(duration_secs);
    tracing::debug!(command, outcome, duration_secs, "Recorded command metric");
}

/// Record notifications emitted by a committed decision.
pub fn record_notifications(notifications: &[AdmissionNotification]) {
    for notification in notifications {
        metrics::counter!("admission_notifications_total", "kind" => notification.kind())
            .increment(1);
    }
}

/// Record how full an event is after a committed command.
#[allow(clippy::cast_precision_loss)] // Loads and capacities stay far below 2^52
pub fn record_load(confirmed_load: u64, capacity: u32) {
    metrics::histogram!("admission_event_load_ratio")
        .record(confirmed_load as f64 / f64::from(capacity));
}
