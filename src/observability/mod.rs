//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, correlation ID on every line)
//!     → metrics.rs (counters, gauges, histograms)
//! Dispatch pipeline additionally reports:
//!     → telemetry.rs (TelemetrySink, one event per terminal failure)
//! ```
//!
//! # Design Decisions
//! - Correlation ID flows through every log line of a logical request
//! - Metrics are cheap (no-ops without an installed recorder)
//! - Telemetry never feeds back into request outcomes

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::{
    EventKind, FanoutTelemetrySink, MetricsTelemetrySink, NoopTelemetrySink, StatusOrErrorKind,
    TelemetryEvent, TelemetrySink, TracingTelemetrySink,
};
