//! Driver liveness: heartbeats and the periodic inactivity sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::resolve_orphaned_rides;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverPresence};
use crate::state::AppState;

/// Records a heartbeat. Last-write-wins by the reported timestamp: a
/// heartbeat carrying an older timestamp than the recorded one is ignored,
/// so out-of-order delivery cannot roll presence backwards.
pub fn heartbeat(
    state: &AppState,
    driver_id: Uuid,
    location: GeoPoint,
    timestamp: DateTime<Utc>,
) -> Result<Driver, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if let Some(last) = driver.last_heartbeat {
        if timestamp < last {
            return Ok(driver.clone());
        }
    }

    driver.location = location;
    driver.location_updated_at = timestamp;
    driver.last_heartbeat = Some(timestamp);
    if driver.presence == DriverPresence::Offline {
        driver.presence = DriverPresence::Available;
    }
    driver.updated_at = Utc::now();

    Ok(driver.clone())
}

/// Forces every available driver whose last heartbeat is older than the
/// configured threshold offline, dropping their outstanding offers. A
/// failure on one driver must not stop the sweep for the rest.
pub fn sweep_inactive(state: &AppState, now: DateTime<Utc>) {
    let threshold = match chrono::Duration::from_std(state.config.heartbeat_timeout) {
        Ok(threshold) => threshold,
        Err(err) => {
            warn!(error = %err, "heartbeat timeout out of range, skipping sweep");
            return;
        }
    };

    let stale: Vec<Uuid> = state
        .drivers
        .iter()
        .filter(|entry| {
            let driver = entry.value();
            driver.presence == DriverPresence::Available
                && match driver.last_heartbeat {
                    Some(last) => now - last > threshold,
                    None => true,
                }
        })
        .map(|entry| *entry.key())
        .collect();

    for driver_id in stale {
        force_offline(state, driver_id);
    }

    let mut online: i64 = 0;
    for entry in state.drivers.iter() {
        if entry.value().presence != DriverPresence::Offline {
            online += 1;
        }
    }
    state.metrics.drivers_online.set(online);
}

fn force_offline(state: &AppState, driver_id: Uuid) {
    let Some(mut driver) = state.drivers.get_mut(&driver_id) else {
        return;
    };
    // Re-check under the entry lock; a heartbeat may have landed since the
    // scan.
    if driver.presence != DriverPresence::Available {
        return;
    }
    driver.presence = DriverPresence::Offline;
    driver.last_heartbeat = None;
    driver.updated_at = Utc::now();
    drop(driver);

    let dropped_rides = state.ledger.drop_driver(driver_id);
    state
        .metrics
        .offers_outstanding
        .set(state.ledger.outstanding() as i64);

    state
        .gateway
        .notify(driver_id, "forced_offline", json!({ "reason": "inactive" }));

    info!(
        driver_id = %driver_id,
        dropped_offers = dropped_rides.len(),
        "driver forced offline after missed heartbeats"
    );

    // This driver may have been the last candidate for a searching ride.
    resolve_orphaned_rides(state, dropped_rides);
}

/// Background task: run the inactivity sweep on a fixed interval.
pub async fn run_liveness_sweeper(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.liveness_sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("liveness sweeper started");

    loop {
        ticker.tick().await;
        sweep_inactive(&state, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{heartbeat, sweep_inactive};
    use crate::config::Config;
    use crate::geo::GeoPoint;
    use crate::models::driver::{Driver, DriverPresence, VehicleClass};
    use crate::models::ride::{Ride, RideStatus};
    use crate::state::AppState;

    fn test_state() -> AppState {
        let (state, _rx) = AppState::new(Config::default());
        state
    }

    fn seed_driver(state: &AppState, last_heartbeat_minutes_ago: i64) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let last = now - Duration::minutes(last_heartbeat_minutes_ago);
        state.drivers.insert(
            id,
            Driver {
                id,
                name: "test-driver".to_string(),
                vehicle_class: VehicleClass::Bike,
                location: GeoPoint {
                    lat: 12.9716,
                    lng: 77.5946,
                },
                location_updated_at: last,
                last_heartbeat: Some(last),
                presence: DriverPresence::Available,
                updated_at: last,
            },
        );
        id
    }

    #[test]
    fn heartbeat_updates_location_and_timestamp() {
        let state = test_state();
        let driver = seed_driver(&state, 5);
        let ts = Utc::now();
        let location = GeoPoint {
            lat: 13.0,
            lng: 77.6,
        };

        let updated = heartbeat(&state, driver, location, ts).unwrap();

        assert_eq!(updated.last_heartbeat, Some(ts));
        assert!((updated.location.lat - 13.0).abs() < 1e-9);
    }

    #[test]
    fn stale_heartbeat_does_not_roll_back() {
        let state = test_state();
        let driver = seed_driver(&state, 0);
        let newer = Utc::now() + Duration::seconds(30);
        let older = Utc::now() - Duration::seconds(30);

        heartbeat(
            &state,
            driver,
            GeoPoint { lat: 1.0, lng: 1.0 },
            newer,
        )
        .unwrap();
        let after_stale = heartbeat(
            &state,
            driver,
            GeoPoint { lat: 9.0, lng: 9.0 },
            older,
        )
        .unwrap();

        assert_eq!(after_stale.last_heartbeat, Some(newer));
        assert!((after_stale.location.lat - 1.0).abs() < 1e-9);
    }

    #[test]
    fn heartbeat_brings_offline_driver_back() {
        let state = test_state();
        let driver = seed_driver(&state, 0);
        state.drivers.get_mut(&driver).unwrap().presence = DriverPresence::Offline;
        state.drivers.get_mut(&driver).unwrap().last_heartbeat = None;

        let updated = heartbeat(
            &state,
            driver,
            GeoPoint { lat: 1.0, lng: 1.0 },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(updated.presence, DriverPresence::Available);
    }

    #[test]
    fn sweep_forces_stale_driver_offline_and_drops_offers() {
        let state = test_state();
        let stale = seed_driver(&state, 11);
        let ride = Uuid::new_v4();
        state
            .ledger
            .offer(stale, ride, Utc::now() + Duration::minutes(5));

        sweep_inactive(&state, Utc::now());

        let driver = state.drivers.get(&stale).unwrap();
        assert_eq!(driver.presence, DriverPresence::Offline);
        assert!(driver.last_heartbeat.is_none());
        assert!(!state.ledger.holds_offer(stale, ride));
    }

    #[test]
    fn sweep_resolves_ride_whose_last_candidate_went_offline() {
        let state = test_state();
        let stale = seed_driver(&state, 11);

        let now = Utc::now();
        let ride = Ride {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            driver_id: None,
            pickup: GeoPoint {
                lat: 12.9716,
                lng: 77.5946,
            },
            dropoff: GeoPoint {
                lat: 12.9352,
                lng: 77.6245,
            },
            vehicle_class: VehicleClass::Bike,
            distance_km: 5.1,
            fare: 61.0,
            status: RideStatus::SearchingDriver,
            ride_otp: None,
            cancel_reason: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };
        state.rides.insert(ride.id, ride.clone());
        state.active_rides.insert(ride.customer_id, ride.id);
        state
            .ledger
            .offer(stale, ride.id, now + Duration::minutes(5));

        sweep_inactive(&state, Utc::now());

        assert_eq!(
            state.rides.get(&ride.id).unwrap().status,
            RideStatus::NoDriversFound
        );
        assert!(!state.active_rides.contains_key(&ride.customer_id));
    }

    #[test]
    fn sweep_leaves_recent_driver_untouched() {
        let state = test_state();
        let fresh = seed_driver(&state, 9);

        sweep_inactive(&state, Utc::now());

        let driver = state.drivers.get(&fresh).unwrap();
        assert_eq!(driver.presence, DriverPresence::Available);
        assert!(driver.last_heartbeat.is_some());
    }

    #[test]
    fn sweep_skips_drivers_on_a_ride() {
        let state = test_state();
        let driver = seed_driver(&state, 30);
        let ride = Uuid::new_v4();
        state.drivers.get_mut(&driver).unwrap().presence = DriverPresence::OnRide(ride);

        sweep_inactive(&state, Utc::now());

        assert_eq!(
            state.drivers.get(&driver).unwrap().presence,
            DriverPresence::OnRide(ride)
        );
    }
}
