//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Response to an attempt:
//!     → 401: retries.rs (auth retry still available?) → auth refresh
//!     → 429: retries.rs (backoff retry still available, method allowed?)
//!            → backoff.rs (Retry-After hint or default delay) → resubmit
//!     → anything else: no retry
//! ```
//!
//! # Design Decisions
//! - Every per-attempt deadline lives in the transport
//! - At most one retry per cause, bounded again by max_attempts
//! - 429 resubmission of POST/PATCH is a contract with the backend

pub mod backoff;
pub mod retries;

pub use backoff::BackoffController;
pub use retries::{is_idempotent, RetryCause, RetryLedger, RetryPolicy};
