//! Resilient Authenticated API Client Library
//!
//! Turns a token-gated, rate-limited HTTP backend into a dependable request
//! surface: one credential refresh at a time no matter how many requests
//! hit an expired credential, bounded backoff on 429, and a structured
//! error with a correlation ID for every failure.

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod request;
pub mod resilience;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder, ClientBuildError};
pub use config::schema::ClientConfig;
pub use credentials::CredentialPair;
pub use dispatch::ApiResponse;
pub use error::{ClientError, ClientResult, ErrorDetail, ErrorKind};
pub use request::RequestSpec;
