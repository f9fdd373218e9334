use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::deadline::DeadlineScheduler;
use crate::engine::ledger::RequestLedger;
use crate::models::driver::Driver;
use crate::models::ride::Ride;
use crate::notify::NotificationGateway;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub config: Config,
    pub drivers: DashMap<Uuid, Driver>,
    pub rides: DashMap<Uuid, Ride>,
    /// Customer id -> their current non-terminal ride.
    pub active_rides: DashMap<Uuid, Uuid>,
    pub ledger: RequestLedger,
    pub deadlines: DeadlineScheduler,
    pub ride_tx: mpsc::Sender<Uuid>,
    pub gateway: NotificationGateway,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<Uuid>) {
        let (ride_tx, ride_rx) = mpsc::channel(config.ride_queue_size);
        let gateway = NotificationGateway::new(config.event_buffer_size);

        (
            Self {
                config,
                drivers: DashMap::new(),
                rides: DashMap::new(),
                active_rides: DashMap::new(),
                ledger: RequestLedger::new(),
                deadlines: DeadlineScheduler::new(),
                ride_tx,
                gateway,
                metrics: Metrics::new(),
            },
            ride_rx,
        )
    }
}
