//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! startup:  KeyValueStore (access + refresh keys) → store.rs (version 0)
//! request:  store.rs snapshot → request envelope (Authorization header)
//! refresh:  auth::refresh → store.rs set/clear → KeyValueStore
//! ```
//!
//! # Design Decisions
//! - Single writer (refresh coordinator, plus explicit login/logout)
//! - Whole-pair atomic swap; no partial field mutation
//! - Persistence failures are logged, never surfaced to callers

pub mod persistence;
pub mod store;
pub mod types;

pub use persistence::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PersistenceError};
pub use store::{CredentialStore, PersistenceKeys};
pub use types::{CredentialPair, CredentialState, CredentialVersion};
