//! Admission decisions over one event's roster.
//!
//! Every function here is pure computation over an [`EventRoster`]. Mutating
//! operations work on a copy of the roster, check the capacity invariant on the
//! copy and only then replace the caller's roster, so a rejected or invalid
//! mutation never leaves a half-applied state behind.
//!
//! # Admission rules
//!
//! - A new registration is confirmed when it fits in the remaining headroom,
//!   otherwise waitlisted. Nothing else moves.
//! - Freeing capacity (cancel, shrink) runs the promotion scan: waitlisted
//!   registrations are visited in arrival order and each one that fits is
//!   promoted. The scan continues past registrations that do not fit.
//! - A confirmed registration that grows past the headroom goes back to the
//!   waitlist with its new size and keeps its place in arrival order.
//! - [`recompute`] derives all statuses from scratch with the same first-fit
//!   rule and is idempotent.

use crate::error::{AdmissionError, Missing};
use crate::notification::AdmissionNotification;
use crate::types::{
    Capacity, EventRoster, PartySize, Registration, RegistrationId, RegistrationStatus,
    RequesterId,
};
use chrono::{DateTime, Utc};

/// Result of an applied mutation: the value it produced and the
/// notifications it emitted, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision<T> {
    /// Operation result
    pub value: T,
    /// Notifications in emission order
    pub notifications: Vec<AdmissionNotification>,
}

impl<T> Decision<T> {
    /// Map the value, keeping the notifications
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        Decision {
            value: f(self.value),
            notifications: self.notifications,
        }
    }
}

/// Register a requester for the roster's event.
///
/// # Errors
///
/// - [`AdmissionError::InvalidPartySize`] if `party_size` is zero
/// - [`AdmissionError::DuplicateRegistration`] if the requester is already registered
pub fn register(
    roster: &mut EventRoster,
    requester_id: RequesterId,
    participant_name: impl Into<String>,
    party_size: u32,
    now: DateTime<Utc>,
) -> Result<Decision<Registration>, AdmissionError> {
    let party_size = PartySize::new(party_size)?;

    if roster.find_by_requester(&requester_id).is_some() {
        tracing::debug!(
            event_id = %roster.event_id,
            requester_id = %requester_id,
            "Rejected duplicate registration"
        );
        return Err(AdmissionError::DuplicateRegistration {
            event_id: roster.event_id,
            requester_id,
        });
    }

    let participant_name = participant_name.into();

    apply(roster, |working| {
        let status = if fits(working.confirmed_load(), party_size, working.capacity) {
            RegistrationStatus::Confirmed
        } else {
            RegistrationStatus::Waitlisted
        };

        let registration = Registration {
            id: RegistrationId::new(),
            event_id: working.event_id,
            requester_id,
            participant_name,
            party_size,
            status,
            sequence: working.take_sequence(),
            registered_at: now,
        };

        tracing::debug!(
            event_id = %working.event_id,
            registration_id = %registration.id,
            sequence = %registration.sequence,
            party_size = %party_size,
            status = %status,
            "Registration admitted"
        );

        let notifications = vec![AdmissionNotification::RegistrationCreated {
            event_id: working.event_id,
            registration_id: registration.id,
            requester_id,
            status,
        }];
        working.registrations.push(registration.clone());

        Ok(Decision {
            value: registration,
            notifications,
        })
    })
}

/// Remove a registration, promoting from the waitlist if it held capacity.
///
/// Returns the removed registration as it was before removal.
///
/// # Errors
///
/// [`AdmissionError::NotFound`] if the registration is not part of this event.
pub fn cancel(
    roster: &mut EventRoster,
    registration_id: RegistrationId,
) -> Result<Decision<Registration>, AdmissionError> {
    let index = roster
        .position(&registration_id)
        .ok_or(AdmissionError::NotFound(Missing::Registration(registration_id)))?;

    apply(roster, |working| {
        let removed = working.registrations.remove(index);
        let mut notifications = vec![AdmissionNotification::RegistrationCancelled {
            event_id: working.event_id,
            registration_id: removed.id,
            requester_id: removed.requester_id,
        }];

        if removed.is_confirmed() {
            promote_waitlisted(working, &mut notifications);
        }

        tracing::debug!(
            event_id = %working.event_id,
            registration_id = %removed.id,
            freed = removed.is_confirmed(),
            promoted = notifications.len() - 1,
            "Registration cancelled"
        );

        Ok(Decision {
            value: removed,
            notifications,
        })
    })
}

/// Change the party size of an existing registration.
///
/// - Waitlisted: only this registration is checked for promotion.
/// - Confirmed, shrinking (or unchanged): updated in place, then the promotion scan runs.
/// - Confirmed, growing within headroom: updated in place.
/// - Confirmed, growing past headroom: demoted with the new size at its
///   original position, then the promotion scan runs.
///
/// # Errors
///
/// - [`AdmissionError::InvalidPartySize`] if `party_size` is zero
/// - [`AdmissionError::NotFound`] if the registration is not part of this event
pub fn modify_party_size(
    roster: &mut EventRoster,
    registration_id: RegistrationId,
    party_size: u32,
) -> Result<Decision<Registration>, AdmissionError> {
    let new_size = PartySize::new(party_size)?;
    let index = roster
        .position(&registration_id)
        .ok_or(AdmissionError::NotFound(Missing::Registration(registration_id)))?;

    apply(roster, |working| {
        let capacity = working.capacity;
        let current = &working.registrations[index];
        let old_size = current.party_size;
        let was_confirmed = current.is_confirmed();
        let load_without = working.confirmed_load()
            - if was_confirmed { old_size.load() } else { 0 };

        let mut transitions = Vec::new();
        let target = &mut working.registrations[index];
        target.party_size = new_size;

        let rescan = if was_confirmed {
            if new_size > old_size && !fits(load_without, new_size, capacity) {
                target.status = RegistrationStatus::Waitlisted;
                transitions.push(AdmissionNotification::RegistrationDemoted {
                    event_id: target.event_id,
                    registration_id: target.id,
                    requester_id: target.requester_id,
                });
                true
            } else {
                new_size < old_size
            }
        } else {
            if fits(load_without, new_size, capacity) {
                target.status = RegistrationStatus::Confirmed;
                transitions.push(AdmissionNotification::RegistrationPromoted {
                    event_id: target.event_id,
                    registration_id: target.id,
                    requester_id: target.requester_id,
                });
            }
            false
        };

        let resized = target.clone();
        if rescan {
            promote_waitlisted(working, &mut transitions);
        }

        tracing::debug!(
            event_id = %working.event_id,
            registration_id = %resized.id,
            from = %old_size,
            to = %new_size,
            status = %resized.status,
            "Party size changed"
        );

        let mut notifications = Vec::with_capacity(transitions.len() + 1);
        notifications.push(AdmissionNotification::RegistrationResized {
            event_id: resized.event_id,
            registration_id: resized.id,
            requester_id: resized.requester_id,
            party_size: new_size.value(),
            status: resized.status,
        });
        notifications.extend(transitions);

        Ok(Decision {
            value: resized,
            notifications,
        })
    })
}

/// Derive every status from scratch.
///
/// Stored statuses are ignored. Registrations are visited in arrival order and
/// each one is confirmed when it fits next to those already confirmed,
/// otherwise waitlisted. `recompute(c, &recompute(c, x)) == recompute(c, x)`.
#[must_use]
pub fn recompute(capacity: Capacity, registrations: &[Registration]) -> Vec<Registration> {
    let mut ordered = registrations.to_vec();
    ordered.sort_by_key(|r| r.sequence);

    let mut load = 0;
    for registration in &mut ordered {
        if fits(load, registration.party_size, capacity) {
            registration.status = RegistrationStatus::Confirmed;
            load += registration.party_size.load();
        } else {
            registration.status = RegistrationStatus::Waitlisted;
        }
    }

    ordered
}

/// Replace the roster's statuses with [`recompute`]d ones.
///
/// Emits a promotion or demotion for every registration whose status flipped,
/// in arrival order. Returns the resulting registrations.
///
/// # Errors
///
/// [`AdmissionError::CapacityInvariantViolated`] if the result would exceed capacity.
pub fn rederive(roster: &mut EventRoster) -> Result<Decision<Vec<Registration>>, AdmissionError> {
    apply(roster, |working| Ok(rederive_in_place(working)))
}

/// Set a new capacity and rederive every status under it.
///
/// # Errors
///
/// - [`AdmissionError::InvalidCapacity`] if `capacity` is zero
/// - [`AdmissionError::CapacityInvariantViolated`] if the result would exceed capacity
pub fn change_capacity(
    roster: &mut EventRoster,
    capacity: u32,
) -> Result<Decision<Vec<Registration>>, AdmissionError> {
    let capacity = Capacity::new(capacity)?;

    apply(roster, |working| {
        tracing::info!(
            event_id = %working.event_id,
            from = %working.capacity,
            to = %capacity,
            "Changing event capacity"
        );
        working.capacity = capacity;
        Ok(rederive_in_place(working))
    })
}

/// Check the capacity invariant.
///
/// # Errors
///
/// [`AdmissionError::CapacityInvariantViolated`] if the confirmed load exceeds capacity.
pub fn verify_capacity(roster: &EventRoster) -> Result<(), AdmissionError> {
    let confirmed_load = roster.confirmed_load();
    if confirmed_load > roster.capacity.load() {
        tracing::error!(
            event_id = %roster.event_id,
            confirmed_load,
            capacity = %roster.capacity,
            "Capacity invariant violated"
        );
        return Err(AdmissionError::CapacityInvariantViolated {
            event_id: roster.event_id,
            confirmed_load,
            capacity: roster.capacity.value(),
        });
    }
    Ok(())
}

/// Run `mutation` on a copy of `roster` and install the copy if it succeeds
/// and keeps the capacity invariant.
fn apply<T>(
    roster: &mut EventRoster,
    mutation: impl FnOnce(&mut EventRoster) -> Result<Decision<T>, AdmissionError>,
) -> Result<Decision<T>, AdmissionError> {
    let mut working = roster.clone();
    let decision = mutation(&mut working)?;
    verify_capacity(&working)?;

    working.revision += 1;
    *roster = working;
    Ok(decision)
}

/// Promote every waitlisted registration that fits, in arrival order.
///
/// Does not stop at the first registration that is too large: a smaller one
/// further back may still fit.
fn promote_waitlisted(roster: &mut EventRoster, notifications: &mut Vec<AdmissionNotification>) {
    let capacity = roster.capacity;
    let mut load = roster.confirmed_load();

    for registration in &mut roster.registrations {
        if registration.is_confirmed() || !fits(load, registration.party_size, capacity) {
            continue;
        }

        registration.status = RegistrationStatus::Confirmed;
        load += registration.party_size.load();

        tracing::debug!(
            event_id = %registration.event_id,
            registration_id = %registration.id,
            sequence = %registration.sequence,
            "Promoted from waitlist"
        );
        notifications.push(AdmissionNotification::RegistrationPromoted {
            event_id: registration.event_id,
            registration_id: registration.id,
            requester_id: registration.requester_id,
        });
    }
}

fn rederive_in_place(roster: &mut EventRoster) -> Decision<Vec<Registration>> {
    let recomputed = recompute(roster.capacity, &roster.registrations);
    let mut notifications = Vec::new();

    for (before, after) in roster.registrations.iter().zip(&recomputed) {
        if before.status == after.status {
            continue;
        }
        let (event_id, registration_id, requester_id) =
            (after.event_id, after.id, after.requester_id);
        notifications.push(if after.is_confirmed() {
            AdmissionNotification::RegistrationPromoted {
                event_id,
                registration_id,
                requester_id,
            }
        } else {
            AdmissionNotification::RegistrationDemoted {
                event_id,
                registration_id,
                requester_id,
            }
        });
    }

    roster.registrations.clone_from(&recomputed);
    Decision {
        value: recomputed,
        notifications,
    }
}

const fn fits(load: u64, party_size: PartySize, capacity: Capacity) -> bool {
    load + party_size.load() <= capacity.load()
}
