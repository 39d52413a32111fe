//! Credential refresh subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch pipeline (401 on version V)
//!     → refresh.rs obtain_fresh_credential(V)
//!         ticket outstanding?  → join FIFO queue
//!         none?                → open ticket, spawn backend.rs refresh
//!     → settle: credentials::store set/clear → release waiters in order
//!     → on failure: hook.rs fires once
//! ```
//!
//! # Design Decisions
//! - At most one refresh call in flight, system-wide
//! - Version check makes late 401s reuse an already refreshed credential
//! - Refresh failure of any kind ends the session

pub mod backend;
pub mod hook;
pub mod refresh;

pub use backend::{AuthBackend, HttpAuthBackend, RefreshError, RefreshResponse};
pub use hook::{LogReauthHook, ReauthHook};
pub use refresh::RefreshCoordinator;
