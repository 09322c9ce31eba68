//! Prometheus counters for the gateway.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Request outcome label values.
pub const OK: &str = "ok";
pub const SOFT_FAILURE: &str = "soft_failure";
pub const ERROR: &str = "error";

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    stream_fragments: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Requests handled, by endpoint and outcome"),
            &["endpoint", "outcome"],
        )?;
        let stream_fragments = IntCounter::new(
            "gateway_stream_fragments_total",
            "Content fragments relayed to streaming clients",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(stream_fragments.clone()))?;

        Ok(Self {
            registry,
            requests,
            stream_fragments,
        })
    }

    pub fn record(&self, endpoint: &str, outcome: &str) {
        self.requests.with_label_values(&[endpoint, outcome]).inc();
    }

    pub fn record_fragment(&self) {
        self.stream_fragments.inc();
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
