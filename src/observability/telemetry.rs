//! Telemetry sink contract.
//!
//! The pipeline reports every terminal failure, and successes that needed
//! retries, through [`TelemetrySink::record`]. Delivery is fire-and-forget:
//! sinks return nothing and must not block.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::ErrorKind;

/// What the event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The logical request ended in `FAILED`.
    Failure,
    /// The logical request succeeded after consuming retries.
    RetriedSuccess,
}

/// Final HTTP status when one was received, otherwise the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOrErrorKind {
    Status(u16),
    Error(ErrorKind),
}

impl fmt::Display for StatusOrErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusOrErrorKind::Status(code) => write!(f, "{}", code),
            StatusOrErrorKind::Error(kind) => write!(f, "{}", kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    pub correlation_id: Uuid,
    pub method: String,
    pub path: String,
    pub status_or_error: StatusOrErrorKind,
    /// Failure class, for failures that carry a status too.
    pub error_kind: Option<ErrorKind>,
    pub latency: Duration,
    pub attempts: u32,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Emits one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        match event.kind {
            EventKind::Failure => tracing::warn!(
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                outcome = %event.status_or_error,
                latency_ms = event.latency.as_millis() as u64,
                attempts = event.attempts,
                "Request failed"
            ),
            EventKind::RetriedSuccess => tracing::info!(
                correlation_id = %event.correlation_id,
                method = %event.method,
                path = %event.path,
                latency_ms = event.latency.as_millis() as u64,
                attempts = event.attempts,
                "Request succeeded after retries"
            ),
        }
    }
}

/// Counts events with the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetrySink;

impl TelemetrySink for MetricsTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let kind = match event.kind {
            EventKind::Failure => "failure",
            EventKind::RetriedSuccess => "retried_success",
        };
        metrics::counter!(
            "client_telemetry_events_total",
            "kind" => kind,
            "outcome" => event.status_or_error.to_string()
        )
        .increment(1);
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetrySink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
