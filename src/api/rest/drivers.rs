use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{lifecycle, liveness};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverPresence, VehicleClass};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/heartbeat", patch(driver_heartbeat))
        .route("/drivers/:id/presence", patch(update_presence))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub vehicle_class: VehicleClass,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub location: GeoPoint,
    /// Client-reported time; defaults to server time when omitted.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceRequest {
    Online,
    Offline,
}

#[derive(Deserialize)]
pub struct UpdatePresenceRequest {
    pub presence: PresenceRequest,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        vehicle_class: payload.vehicle_class,
        location: payload.location,
        location_updated_at: now,
        last_heartbeat: Some(now),
        presence: DriverPresence::Available,
        updated_at: now,
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn driver_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<Driver>, AppError> {
    let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
    let driver = liveness::heartbeat(&state, id, payload.location, timestamp)?;
    Ok(Json(driver))
}

async fn update_presence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePresenceRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    match payload.presence {
        PresenceRequest::Online => {
            if driver.presence == DriverPresence::Offline {
                driver.presence = DriverPresence::Available;
                driver.last_heartbeat = Some(Utc::now());
            }
        }
        PresenceRequest::Offline => {
            if driver.presence.current_ride().is_some() {
                return Err(AppError::BadRequest(
                    "cannot go offline while on a ride".to_string(),
                ));
            }
            driver.presence = DriverPresence::Offline;
            driver.last_heartbeat = None;
        }
    }
    driver.updated_at = Utc::now();
    let snapshot = driver.clone();
    drop(driver);

    // Dropping outstanding offers mirrors the liveness sweep's forced
    // offline path, including resolving rides this driver was the last
    // candidate for.
    if snapshot.presence == DriverPresence::Offline {
        let dropped_rides = state.ledger.drop_driver(id);
        state
            .metrics
            .offers_outstanding
            .set(state.ledger.outstanding() as i64);
        lifecycle::resolve_orphaned_rides(&state, dropped_rides);
    }

    Ok(Json(snapshot))
}
