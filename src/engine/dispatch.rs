//! Dispatch Coordinator: one bounded matching round per ride.
//!
//! Rounds for different rides run independently; within a round the only
//! point of mutual exclusion is the conditional `searching_driver ->
//! accepted` transition in `lifecycle`, so no lock is ever held across a
//! notify call.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{resolve_no_match, resolve_orphaned_rides};
use crate::error::AppError;
use crate::geo::within_radius;
use crate::models::driver::VehicleClass;
use crate::models::ride::{Ride, RideStatus};
use crate::state::AppState;

pub async fn run_dispatch_engine(state: Arc<AppState>, mut ride_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch engine started");

    while let Some(ride_id) = ride_rx.recv().await {
        state.metrics.rides_in_queue.dec();

        let start = Instant::now();
        let outcome = match dispatch_ride(state.clone(), ride_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(ride_id = %ride_id, error = %err, "dispatch round failed");
                "error"
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        state
            .metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);
        state
            .metrics
            .dispatch_rounds_total
            .with_label_values(&[outcome])
            .inc();
    }

    warn!("dispatch engine stopped: ride queue closed");
}

/// Runs one dispatch round: candidate query, offer fan-out, deadline.
fn dispatch_ride(state: Arc<AppState>, ride_id: Uuid) -> Result<&'static str, AppError> {
    let ride = {
        let mut ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;

        // A cancel may land between creation and this round starting.
        if ride.status != RideStatus::Pending {
            info!(ride_id = %ride_id, status = ?ride.status, "skipping dispatch, ride already resolved");
            return Ok("skipped");
        }
        ride.status = RideStatus::SearchingDriver;
        ride.updated_at = Utc::now();
        ride.clone()
    };

    let candidates = find_candidates(&state, &ride);

    if candidates.is_empty() {
        info!(ride_id = %ride_id, "no candidates in range");
        resolve_no_match(&state, ride_id);
        return Ok("no_candidates");
    }

    let expires_at = Utc::now()
        + ChronoDuration::from_std(state.config.offer_ttl)
            .map_err(|err| AppError::Internal(format!("offer ttl out of range: {err}")))?;

    let offer_payload = json!({
        "ride_id": ride.id,
        "pickup": ride.pickup,
        "dropoff": ride.dropoff,
        "vehicle_class": ride.vehicle_class,
        "distance_km": ride.distance_km,
        "fare": ride.fare,
        "expires_at": expires_at,
    });

    let mut offered = 0usize;
    for driver_id in &candidates {
        // A problem with one candidate must not sink the round for the rest.
        if !state.ledger.offer(*driver_id, ride_id, expires_at) {
            warn!(ride_id = %ride_id, driver_id = %driver_id, "duplicate offer skipped");
            continue;
        }
        offered += 1;
        state
            .gateway
            .notify(*driver_id, "ride_offer", offer_payload.clone());
    }

    state
        .metrics
        .offers_outstanding
        .set(state.ledger.outstanding() as i64);

    if offered == 0 {
        resolve_no_match(&state, ride_id);
        return Ok("no_candidates");
    }

    let deadline_state = state.clone();
    state
        .deadlines
        .schedule(ride_id, state.config.offer_ttl, async move {
            resolve_no_match(&deadline_state, ride_id);
        });

    info!(ride_id = %ride_id, candidates = offered, "offers broadcast");
    Ok("dispatched")
}

/// The geospatial candidate query: available, right vehicle class, within
/// the configured radius of the pickup point. The result is a snapshot;
/// staleness past this instant is expected.
fn find_candidates(state: &AppState, ride: &Ride) -> Vec<Uuid> {
    state
        .drivers
        .iter()
        .filter(|entry| {
            let driver = entry.value();
            driver.presence.is_dispatchable()
                && vehicle_matches(driver.vehicle_class, ride.vehicle_class)
                && within_radius(&driver.location, &ride.pickup, state.config.search_radius_km)
        })
        .map(|entry| *entry.key())
        .collect()
}

fn vehicle_matches(driver_class: VehicleClass, requested: VehicleClass) -> bool {
    driver_class == requested
}

/// Driver declined (or disconnected while holding) an offer. When that was
/// the last outstanding offer for a still-searching ride, resolve the ride
/// as unmatched right away instead of waiting out the deadline.
pub fn decline_offer(state: &AppState, ride_id: Uuid, driver_id: Uuid) {
    if !state.ledger.withdraw_one(driver_id, ride_id) {
        return;
    }
    state
        .metrics
        .offers_outstanding
        .set(state.ledger.outstanding() as i64);
    info!(ride_id = %ride_id, driver_id = %driver_id, "offer declined");

    resolve_orphaned_rides(state, [ride_id]);
}

/// Background task: periodically removes expired ledger entries and
/// resolves rides whose offers all lapsed. Runs against one `now` snapshot
/// per tick. A backstop for the per-ride deadline tasks.
pub async fn run_expiry_sweeper(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.expiry_sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("expiry sweeper started");

    loop {
        ticker.tick().await;

        let now = Utc::now();
        let removed = state.ledger.expire_sweep(now);
        if removed.is_empty() {
            continue;
        }

        state
            .metrics
            .offers_outstanding
            .set(state.ledger.outstanding() as i64);

        let mut rides: Vec<Uuid> = removed.into_iter().map(|(_, ride_id)| ride_id).collect();
        rides.sort();
        rides.dedup();
        resolve_orphaned_rides(&state, rides);
    }
}
