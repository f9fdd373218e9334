//! Ride lifecycle transitions.
//!
//! Every transition is a guard-then-mutate under the ride's map entry lock,
//! so concurrent events observe either the old or the new state, never a
//! half-applied one. The `searching_driver -> accepted` transition doubles
//! as the accept-race arbiter: whichever attempt gets the entry lock while
//! the ride is still searching wins, every later attempt sees the updated
//! status and fails with a reported, non-fatal error.

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::fare::compute_fare;
use crate::error::AppError;
use crate::models::driver::DriverPresence;
use crate::models::ride::{Party, Ride, RideStatus};
use crate::state::AppState;

fn generate_otp() -> String {
    format!("{:04}", rand::random::<u32>() % 10_000)
}

fn sync_offer_gauge(state: &AppState) {
    state
        .metrics
        .offers_outstanding
        .set(state.ledger.outstanding() as i64);
}

/// First-accept-wins claim of a searching ride.
///
/// Two check-and-sets, driver first: the driver's presence is claimed
/// under their entry lock before the ride transition, so a driver holding
/// offers for several concurrent rides can win at most one of them.
pub fn driver_accepts(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
    if !state.ledger.holds_offer(driver_id, ride_id) {
        return Err(AppError::OfferExpired);
    }

    {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if !driver.presence.is_dispatchable() {
            return Err(AppError::DriverUnavailable);
        }
        driver.presence = DriverPresence::OnRide(ride_id);
        driver.updated_at = Utc::now();
    }

    let snapshot = {
        let mut ride = match state.rides.get_mut(&ride_id) {
            Some(ride) => ride,
            None => {
                release_claim(state, driver_id, ride_id);
                return Err(AppError::NotFound(format!("ride {ride_id} not found")));
            }
        };

        if ride.status != RideStatus::SearchingDriver {
            let current = ride.status;
            drop(ride);
            release_claim(state, driver_id, ride_id);
            return Err(AppError::InvalidTransition {
                current,
                event: "driver_accepts",
            });
        }

        ride.driver_id = Some(driver_id);
        ride.fare = compute_fare(ride.distance_km, ride.vehicle_class);
        ride.status = RideStatus::Accepted;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.deadlines.cancel(ride_id);

    let holders = state.ledger.withdraw(ride_id);
    // The winner is off the market; drop their offers for other rides and
    // resolve any ride that just lost its last one.
    let abandoned = state.ledger.drop_driver(driver_id);
    sync_offer_gauge(state);
    resolve_orphaned_rides(state, abandoned);

    for loser in holders.iter().filter(|holder| **holder != driver_id) {
        state
            .gateway
            .notify(*loser, "ride_taken", json!({ "ride_id": ride_id }));
    }

    let driver_details = state.drivers.get(&driver_id).map(|driver| {
        json!({
            "id": driver.id,
            "name": driver.name,
            "vehicle_class": driver.vehicle_class,
            "location": driver.location,
        })
    });

    state.gateway.notify(
        snapshot.customer_id,
        "ride_accepted",
        json!({
            "ride_id": ride_id,
            "driver": driver_details,
            "fare": snapshot.fare,
            // Address of the driver's live location stream for the customer
            // to subscribe to.
            "location_stream": driver_id,
        }),
    );

    info!(ride_id = %ride_id, driver_id = %driver_id, "ride accepted");
    Ok(snapshot)
}

/// Deadline / exhausted-offers resolution. A no-op when the ride already
/// left `searching_driver` (accepted or cancelled first).
pub fn resolve_no_match(state: &AppState, ride_id: Uuid) {
    let snapshot = {
        let Some(mut ride) = state.rides.get_mut(&ride_id) else {
            return;
        };
        if ride.status != RideStatus::SearchingDriver {
            return;
        }
        ride.status = RideStatus::NoDriversFound;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.deadlines.cancel(ride_id);

    let holders = state.ledger.withdraw(ride_id);
    sync_offer_gauge(state);

    for holder in holders {
        state
            .gateway
            .notify(holder, "ride_expired", json!({ "ride_id": ride_id }));
    }

    state.active_rides.remove(&snapshot.customer_id);
    state.gateway.notify(
        snapshot.customer_id,
        "no_drivers_found",
        json!({ "ride_id": ride_id }),
    );

    info!(ride_id = %ride_id, "no drivers found");
}

pub fn driver_arrived(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
    let snapshot = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        require_assigned_driver(&ride, driver_id, "report arrival")?;
        if ride.status != RideStatus::Accepted {
            return Err(AppError::InvalidTransition {
                current: ride.status,
                event: "driver_arrived",
            });
        }

        ride.status = RideStatus::Arrived;
        ride.ride_otp = Some(generate_otp());
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.gateway.notify(
        snapshot.customer_id,
        "driver_arrived",
        json!({ "ride_id": ride_id, "otp": snapshot.ride_otp }),
    );

    Ok(snapshot)
}

pub fn verify_otp(
    state: &AppState,
    ride_id: Uuid,
    driver_id: Uuid,
    code: &str,
) -> Result<Ride, AppError> {
    let snapshot = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        require_assigned_driver(&ride, driver_id, "verify the otp")?;
        if ride.status != RideStatus::Arrived {
            return Err(AppError::InvalidTransition {
                current: ride.status,
                event: "verify_otp",
            });
        }

        if ride.ride_otp.as_deref() != Some(code) {
            return Err(AppError::BadRequest("incorrect otp".to_string()));
        }

        ride.ride_otp = None;
        ride.status = RideStatus::OtpVerified;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.gateway.notify(
        snapshot.customer_id,
        "otp_verified",
        json!({ "ride_id": ride_id }),
    );

    Ok(snapshot)
}

pub fn start_ride(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
    let snapshot = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        require_assigned_driver(&ride, driver_id, "start the ride")?;
        if ride.status != RideStatus::OtpVerified {
            return Err(AppError::InvalidTransition {
                current: ride.status,
                event: "start_ride",
            });
        }

        ride.status = RideStatus::InProgress;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.gateway.notify(
        snapshot.customer_id,
        "ride_started",
        json!({ "ride_id": ride_id }),
    );

    Ok(snapshot)
}

pub fn complete_ride(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
    let snapshot = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        require_assigned_driver(&ride, driver_id, "complete the ride")?;
        if ride.status != RideStatus::InProgress {
            return Err(AppError::InvalidTransition {
                current: ride.status,
                event: "complete_ride",
            });
        }

        ride.status = RideStatus::Completed;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    free_driver(state, driver_id);
    state.active_rides.remove(&snapshot.customer_id);

    state.gateway.notify(
        snapshot.customer_id,
        "ride_completed",
        json!({ "ride_id": ride_id, "fare": snapshot.fare }),
    );

    info!(ride_id = %ride_id, driver_id = %driver_id, fare = snapshot.fare, "ride completed");
    Ok(snapshot)
}

/// Cancel by the customer or the assigned driver, legal in any
/// non-terminal post-dispatch state. Short-circuits a pending dispatch
/// deadline for the ride.
pub fn cancel_ride(
    state: &AppState,
    ride_id: Uuid,
    by: Party,
    party_id: Uuid,
    reason: Option<String>,
) -> Result<Ride, AppError> {
    let snapshot = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        let authorized = match by {
            Party::Customer => ride.customer_id == party_id,
            Party::Driver => ride.driver_id == Some(party_id),
        };
        if !authorized {
            return Err(AppError::Unauthorized(
                "only the customer or the assigned driver can cancel".to_string(),
            ));
        }

        let cancellable = matches!(
            ride.status,
            RideStatus::SearchingDriver
                | RideStatus::Accepted
                | RideStatus::Arrived
                | RideStatus::OtpVerified
                | RideStatus::InProgress
        );
        if !cancellable {
            return Err(AppError::InvalidTransition {
                current: ride.status,
                event: "cancel_ride",
            });
        }

        ride.status = RideStatus::Cancelled;
        ride.cancel_reason = reason;
        ride.cancelled_by = Some(by);
        ride.ride_otp = None;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    state.deadlines.cancel(ride_id);

    let holders = state.ledger.withdraw(ride_id);
    sync_offer_gauge(state);
    for holder in holders {
        state
            .gateway
            .notify(holder, "ride_cancelled", json!({ "ride_id": ride_id }));
    }

    if let Some(driver_id) = snapshot.driver_id {
        free_driver(state, driver_id);
    }
    state.active_rides.remove(&snapshot.customer_id);

    // Tell the party that did not initiate the cancel.
    match by {
        Party::Customer => {
            if let Some(driver_id) = snapshot.driver_id {
                state.gateway.notify(
                    driver_id,
                    "ride_cancelled",
                    json!({ "ride_id": ride_id, "by": "customer", "reason": snapshot.cancel_reason }),
                );
            }
        }
        Party::Driver => {
            state.gateway.notify(
                snapshot.customer_id,
                "ride_cancelled",
                json!({ "ride_id": ride_id, "by": "driver", "reason": snapshot.cancel_reason }),
            );
        }
    }

    info!(ride_id = %ride_id, by = ?by, "ride cancelled");
    Ok(snapshot)
}

fn require_assigned_driver(ride: &Ride, driver_id: Uuid, action: &str) -> Result<(), AppError> {
    if ride.driver_id != Some(driver_id) {
        return Err(AppError::Unauthorized(format!(
            "only the assigned driver can {action}"
        )));
    }
    Ok(())
}

/// Undoes a presence claim after the ride side of an accept lost the race.
/// Conditional on the claim still pointing at this ride, so a concurrent
/// flow that already repurposed the driver is left alone.
fn release_claim(state: &AppState, driver_id: Uuid, ride_id: Uuid) {
    if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
        if driver.presence == DriverPresence::OnRide(ride_id) {
            driver.presence = DriverPresence::Available;
            driver.updated_at = Utc::now();
        }
    }
}

/// Resolves every ride that lost its last outstanding offer while still
/// searching. Called after a driver's offers are dropped wholesale
/// (accept of another ride, forced offline, going offline by hand).
pub fn resolve_orphaned_rides(state: &AppState, ride_ids: impl IntoIterator<Item = Uuid>) {
    for ride_id in ride_ids {
        let still_searching = state
            .rides
            .get(&ride_id)
            .map(|ride| ride.status == RideStatus::SearchingDriver)
            .unwrap_or(false);

        if still_searching && state.ledger.holders(ride_id) == 0 {
            resolve_no_match(state, ride_id);
        }
    }
}

fn free_driver(state: &AppState, driver_id: Uuid) {
    if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
        driver.presence = DriverPresence::Available;
        driver.updated_at = Utc::now();
    }
}
