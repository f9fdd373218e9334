use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Bike,
}

/// One tagged presence state instead of separate `is_available` and
/// `current_ride` fields, so the two can never desynchronize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "ride_id")]
pub enum DriverPresence {
    Offline,
    Available,
    OnRide(Uuid),
}

impl DriverPresence {
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, DriverPresence::Available)
    }

    pub fn current_ride(&self) -> Option<Uuid> {
        match self {
            DriverPresence::OnRide(ride_id) => Some(*ride_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub vehicle_class: VehicleClass,
    pub location: GeoPoint,
    pub location_updated_at: DateTime<Utc>,
    /// None while offline; refreshed by every heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub presence: DriverPresence,
    pub updated_at: DateTime<Utc>,
}
