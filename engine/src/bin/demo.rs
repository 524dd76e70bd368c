//! Admission Engine Demo
//!
//! Replays the canonical admission scenarios against an in-memory store:
//! - Cancellation promoting a waitlisted party
//! - Shrinking a party making room for the waitlist
//! - Growing a party within the remaining capacity
//! - Growing a party past capacity and landing on the waitlist
//!
//! followed by a burst of concurrent registrations for one event, printed as a
//! JSON roster, and the Prometheus metrics collected along the way.
//!
//! # Usage
//!
//! ```bash
//! ADMISSION_DEMO_CAPACITY=12 cargo run --bin admission-demo
//! ```

use admission_core::environment::SystemClock;
use admission_engine::metrics::register_admission_metrics;
use admission_engine::{
    AdmissionService, Config, EventId, EventRoster, InMemoryRegistrationStore, RequesterId,
    TracingNotifier,
};
use admission_runtime::metrics::MetricsRecorder;
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCENARIO_CAPACITY: u32 = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.logging.level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut recorder = MetricsRecorder::new();
    recorder.install().context("installing metrics recorder")?;
    register_admission_metrics();

    println!("\n============================================");
    println!("   Admission Engine - Demo");
    println!("============================================\n");

    let store = Arc::new(InMemoryRegistrationStore::new());
    let service = Arc::new(AdmissionService::new(
        store.clone(),
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        &config,
    ));

    // ========== Scenario 1: cancellation promotes ==========
    println!("Scenario 1: A(5) confirmed, B(4) waitlisted, A cancels");
    let event = store.create_event(SCENARIO_CAPACITY)?;
    let a = service.register(event, RequesterId::new(), "A", 5).await?;
    let b = service.register(event, RequesterId::new(), "B", 4).await?;
    println!("  A: {}  B: {}", a.status, b.status);
    service.cancel(event, a.id).await?;
    print_roster(&service.roster(event).await?);

    // ========== Scenario 2: shrink promotes ==========
    println!("Scenario 2: A(5), B(3) confirmed, C(2) waitlisted, A shrinks to 3");
    let event = store.create_event(SCENARIO_CAPACITY)?;
    let a = service.register(event, RequesterId::new(), "A", 5).await?;
    service.register(event, RequesterId::new(), "B", 3).await?;
    service.register(event, RequesterId::new(), "C", 2).await?;
    service.modify_party_size(event, a.id, 3).await?;
    print_roster(&service.roster(event).await?);

    // ========== Scenario 3: growth within headroom ==========
    println!("Scenario 3: A(5), B(2) confirmed, A grows to 6");
    let event = store.create_event(SCENARIO_CAPACITY)?;
    let a = service.register(event, RequesterId::new(), "A", 5).await?;
    service.register(event, RequesterId::new(), "B", 2).await?;
    service.modify_party_size(event, a.id, 6).await?;
    print_roster(&service.roster(event).await?);

    // ========== Scenario 4: growth past headroom ==========
    println!("Scenario 4: A(5), B(2) confirmed, A grows to 7");
    let event = store.create_event(SCENARIO_CAPACITY)?;
    let a = service.register(event, RequesterId::new(), "A", 5).await?;
    service.register(event, RequesterId::new(), "B", 2).await?;
    service.modify_party_size(event, a.id, 7).await?;
    print_roster(&service.roster(event).await?);

    // ========== Burst ==========
    let capacity = config.demo.capacity;
    println!("Burst: 20 concurrent registrations for an event of capacity {capacity}");
    let event = store.create_event(capacity)?;
    burst(&service, event, 20).await?;
    let roster = service.roster(event).await?;
    println!("{}", serde_json::to_string_pretty(&roster)?);
    println!(
        "  confirmed load {} of {}, {} waitlisted\n",
        roster.confirmed_load(),
        roster.capacity,
        roster.waitlisted().count()
    );

    service
        .shutdown(config.service.shutdown_timeout())
        .await
        .context("shutting down admission service")?;

    if let Some(rendered) = recorder.render() {
        println!("Metrics:\n{rendered}");
    }

    Ok(())
}

async fn burst(service: &Arc<AdmissionService>, event: EventId, count: u32) -> anyhow::Result<()> {
    let handles: Vec<_> = (0..count)
        .map(|i| {
            let service = Arc::clone(service);
            tokio::spawn(async move {
                service
                    .register(event, RequesterId::new(), format!("guest-{i}"), i % 3 + 1)
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }
    Ok(())
}

fn print_roster(roster: &EventRoster) {
    for registration in &roster.registrations {
        println!(
            "  {:>3} {:<8} size {:<2} {}",
            registration.sequence.value(),
            registration.participant_name,
            registration.party_size.value(),
            registration.status
        );
    }
    println!(
        "  confirmed load {}/{}\n",
        roster.confirmed_load(),
        roster.capacity
    );
}
