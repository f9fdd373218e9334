use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_rounds_total: IntCounterVec,
    pub rides_in_queue: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub offers_outstanding: IntGauge,
    pub drivers_online: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_rounds_total = IntCounterVec::new(
            Opts::new("dispatch_rounds_total", "Dispatch rounds by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_rounds_total metric");

        let rides_in_queue = IntGauge::new(
            "rides_in_queue",
            "Rides waiting for a dispatch round to start",
        )
        .expect("valid rides_in_queue metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of a dispatch round in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let offers_outstanding = IntGauge::new(
            "offers_outstanding",
            "Ride offers currently waiting for a driver answer",
        )
        .expect("valid offers_outstanding metric");

        let drivers_online = IntGauge::new("drivers_online", "Drivers currently not offline")
            .expect("valid drivers_online metric");

        registry
            .register(Box::new(dispatch_rounds_total.clone()))
            .expect("register dispatch_rounds_total");
        registry
            .register(Box::new(rides_in_queue.clone()))
            .expect("register rides_in_queue");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(offers_outstanding.clone()))
            .expect("register offers_outstanding");
        registry
            .register(Box::new(drivers_online.clone()))
            .expect("register drivers_online");

        Self {
            registry,
            dispatch_rounds_total,
            rides_in_queue,
            dispatch_latency_seconds,
            offers_outstanding,
            drivers_online,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
