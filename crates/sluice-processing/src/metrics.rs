//! Counters for the zip-metadata subprocess.
//!
//! The processor records through an injected [`MetricsSink`] so tests can
//! count exactly what was emitted. Production wires [`OtelMetricsSink`],
//! which writes to the process-wide OpenTelemetry meter provider.

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

pub trait MetricsSink: Send + Sync {
    /// Called exactly once per subprocess invocation with the outcome label.
    fn record_zip_outcome(&self, outcome: &'static str);
}

/// OpenTelemetry-backed sink.
pub struct OtelMetricsSink {
    zip_outcomes: Counter<u64>,
}

impl OtelMetricsSink {
    pub fn new(meter: &Meter) -> Self {
        let zip_outcomes = meter
            .u64_counter("sluice.zip_subcommand.outcomes")
            .with_description("Outcomes of zip metadata subprocess invocations by label")
            .build();

        Self { zip_outcomes }
    }

    /// Sink on the global meter provider.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("sluice"))
    }
}

impl MetricsSink for OtelMetricsSink {
    fn record_zip_outcome(&self, outcome: &'static str) {
        self.zip_outcomes
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_zip_outcome(&self, _outcome: &'static str) {}
}
