//! Metrics collection and exposition.
//!
//! # Metrics
//! - `client_requests_total` (counter): logical requests by method, outcome
//! - `client_request_duration_seconds` (histogram): end-to-end latency
//! - `client_retries_total` (counter): resubmissions by cause
//! - `client_refresh_total` (counter): refresh calls by result
//! - `client_refresh_duration_seconds` (histogram): refresh call latency
//! - `client_refresh_waiters` (gauge): requests queued on the refresh ticket
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the terminal outcome of a logical request.
pub fn record_request(method: &str, outcome: &str, start: Instant) {
    counter!(
        "client_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("client_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one resubmission.
pub fn record_retry(cause: &str) {
    counter!("client_retries_total", "cause" => cause.to_string()).increment(1);
}

/// Record a settled refresh call.
pub fn record_refresh(result: &str, start: Instant) {
    counter!("client_refresh_total", "result" => result.to_string()).increment(1);
    histogram!("client_refresh_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_refresh_waiters(count: usize) {
    gauge!("client_refresh_waiters").set(count as f64);
}
