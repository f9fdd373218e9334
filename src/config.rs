use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub ride_queue_size: usize,
    pub event_buffer_size: usize,
    pub search_radius_km: f64,
    pub offer_ttl: Duration,
    pub heartbeat_timeout: Duration,
    pub liveness_sweep_interval: Duration,
    pub expiry_sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            ride_queue_size: parse_or_default("RIDE_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 10.0)?,
            offer_ttl: Duration::from_secs(parse_or_default("OFFER_TTL_SECS", 300)?),
            heartbeat_timeout: Duration::from_secs(parse_or_default(
                "HEARTBEAT_TIMEOUT_SECS",
                600,
            )?),
            liveness_sweep_interval: Duration::from_secs(parse_or_default(
                "LIVENESS_SWEEP_INTERVAL_SECS",
                60,
            )?),
            expiry_sweep_interval: Duration::from_secs(parse_or_default(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                30,
            )?),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            ride_queue_size: 1024,
            event_buffer_size: 1024,
            search_radius_km: 10.0,
            offer_ttl: Duration::from_secs(300),
            heartbeat_timeout: Duration::from_secs(600),
            liveness_sweep_interval: Duration::from_secs(60),
            expiry_sweep_interval: Duration::from_secs(30),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
