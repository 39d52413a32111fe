//! Request construction.
//!
//! # Data Flow
//! ```text
//! RequestSpec (caller)
//!     → envelope.rs build (correlation ID, credential presence check)
//!     → LogicalRequest (owned by the dispatch pipeline)
//!     → envelope.rs decorate, once per attempt (Authorization, correlation header)
//!     → OutboundRequest (transport)
//! ```

pub mod envelope;
pub mod types;

pub use envelope::EnvelopeBuilder;
pub use types::{LogicalRequest, RequestSpec};
