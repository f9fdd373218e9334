use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::driver::VehicleClass;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    SearchingDriver,
    Accepted,
    Arrived,
    OtpVerified,
    InProgress,
    Completed,
    Cancelled,
    NoDriversFound,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::NoDriversFound
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Customer,
    Driver,
}

/// Rides are never deleted; terminal states are kept for history.
///
/// `driver_id` is non-null only from `accepted` onward, `ride_otp` only
/// while the ride sits in `arrived`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub distance_km: f64,
    pub fare: f64,
    pub status: RideStatus,
    pub ride_otp: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<Party>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
