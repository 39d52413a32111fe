//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → request::envelope (BUILDING)
//!     → transport (SENT)
//!     → state.rs classify
//!         2xx → SUCCEEDED
//!         401 → AUTH_EXPIRED → auth::refresh (REFRESHING) → SENT
//!         429 → RATE_LIMITED → resilience::backoff (BACKING_OFF) → SENT
//!         else → FAILED (+ telemetry)
//! ```
//!
//! # Design Decisions
//! - The state machine is explicit; legality is checkable without running I/O
//! - Retry bounds live in one loop, not in nested callbacks

pub mod pipeline;
pub mod state;

pub use pipeline::{ApiResponse, DispatchPipeline};
pub use state::{classify, Classification, DispatchState, StateTracker};
