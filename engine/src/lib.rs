//! # Admission Engine
//!
//! Capacity-bounded event admission with a first-come-first-served waitlist.
//!
//! Each event has a capacity counted in attendees. A registration covers a party
//! of one or more people and is either confirmed (counting towards capacity) or
//! waitlisted. Registrations are admitted in arrival order; when capacity frees
//! up, waitlisted registrations are promoted in arrival order, skipping any that
//! are still too large.
//!
//! ## Layers
//!
//! - [`engine`]: pure admission decisions over an [`EventRoster`]
//! - [`reducer`]: the engine driven through the `Reducer` trait, with persistence
//!   commits and notification publication described as effects
//! - [`service`]: per-event serialization, lazy loading and rollback reporting
//! - [`ports`]: the storage and notification traits, with [`memory`] and
//!   [`notifier`] adapters
//!
//! ## Example
//!
//! ```ignore
//! use admission_engine::{AdmissionService, Config, InMemoryRegistrationStore, TracingNotifier};
//!
//! let store = Arc::new(InMemoryRegistrationStore::new());
//! let event_id = store.create_event(8)?;
//! let service = AdmissionService::new(store, Arc::new(TracingNotifier), Arc::new(SystemClock), &Config::from_env());
//!
//! let ada = service.register(event_id, RequesterId::new(), "Ada", 5).await?;
//! let bob = service.register(event_id, RequesterId::new(), "Bob", 4).await?; // waitlisted
//! service.cancel(event_id, ada.id).await?;                                   // Bob promoted
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod notification;
pub mod notifier;
pub mod ports;
pub mod reducer;
pub mod service;
pub mod types;

pub use config::Config;
pub use error::{AdmissionError, Missing, NotifyError, PersistenceError, ServiceError};
pub use memory::InMemoryRegistrationStore;
pub use notification::AdmissionNotification;
pub use notifier::{NotificationDispatcher, NotificationOutbox, RecordingNotifier, TracingNotifier};
pub use ports::{Notifier, RegistrationStore};
pub use reducer::{AdmissionAction, AdmissionEnvironment, AdmissionReducer, AdmissionState, CommandOutcome};
pub use service::AdmissionService;
pub use types::{
    Capacity, EventId, EventRoster, PartySize, Registration, RegistrationId, RegistrationStatus,
    RequesterId, Sequence,
};
