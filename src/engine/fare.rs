use crate::models::driver::VehicleClass;

const CAR_BASE_FARE: f64 = 50.0;
const CAR_RATE_PER_KM: f64 = 15.0;
const BIKE_BASE_FARE: f64 = 20.0;
const BIKE_RATE_PER_KM: f64 = 8.0;

pub fn compute_fare(distance_km: f64, vehicle_class: VehicleClass) -> f64 {
    let distance_km = distance_km.max(0.0);
    let (base, rate) = match vehicle_class {
        VehicleClass::Car => (CAR_BASE_FARE, CAR_RATE_PER_KM),
        VehicleClass::Bike => (BIKE_BASE_FARE, BIKE_RATE_PER_KM),
    };

    // Round to whole currency units.
    (base + rate * distance_km).round()
}
