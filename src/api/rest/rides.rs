use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::decline_offer;
use crate::engine::fare::compute_fare;
use crate::engine::lifecycle;
use crate::engine::queue::enqueue_ride;
use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::driver::VehicleClass;
use crate::models::ride::{Party, Ride, RideStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/decline", post(decline_ride))
        .route("/rides/:id/arrived", post(driver_arrived))
        .route("/rides/:id/verify-otp", post(verify_otp))
        .route("/rides/:id/start", post(start_ride))
        .route("/rides/:id/complete", post(complete_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub customer_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: VehicleClass,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub driver_id: Uuid,
    pub otp: String,
}

#[derive(Deserialize)]
pub struct CancelRideRequest {
    pub by: Party,
    pub party_id: Uuid,
    pub reason: Option<String>,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<Ride>, AppError> {
    if state.active_rides.contains_key(&payload.customer_id) {
        return Err(AppError::BadRequest(
            "customer already has an active ride".to_string(),
        ));
    }

    let distance_km = haversine_km(&payload.pickup, &payload.dropoff);
    let now = Utc::now();
    let ride = Ride {
        id: Uuid::new_v4(),
        customer_id: payload.customer_id,
        driver_id: None,
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        vehicle_class: payload.vehicle_class,
        distance_km,
        fare: compute_fare(distance_km, payload.vehicle_class),
        status: RideStatus::Pending,
        ride_otp: None,
        cancel_reason: None,
        cancelled_by: None,
        created_at: now,
        updated_at: now,
    };

    state.rides.insert(ride.id, ride.clone());
    state.active_rides.insert(ride.customer_id, ride.id);
    enqueue_ride(&state, ride.id).await?;

    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    let ride = state
        .rides
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;

    Ok(Json(ride.value().clone()))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::driver_accepts(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn decline_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Json<serde_json::Value> {
    decline_offer(&state, id, payload.driver_id);
    Json(serde_json::json!({ "declined": true }))
}

async fn driver_arrived(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::driver_arrived(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::verify_otp(&state, id, payload.driver_id, &payload.otp)?;
    Ok(Json(ride))
}

async fn start_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::start_ride(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::complete_ride(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = lifecycle::cancel_ride(&state, id, payload.by, payload.party_id, payload.reason)?;
    Ok(Json(ride))
}
