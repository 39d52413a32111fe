//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the API client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend API settings (base URL, per-attempt timeout, headers).
    pub api: ApiConfig,

    /// Credential refresh and persistence settings.
    pub auth: AuthConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,

    /// Transport timeout applied independently to each attempt, in seconds.
    pub timeout_secs: u64,

    /// Header carrying the correlation identifier.
    pub correlation_header: String,

    /// User-Agent sent on every request.
    pub user_agent: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout_secs: 60,
            correlation_header: "x-request-id".to_string(),
            user_agent: concat!("resilient-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Credential refresh and persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Path of the refresh endpoint, relative to `api.base_url`.
    pub refresh_path: String,

    /// Optional JSON file backing the credential key-value store.
    pub credentials_path: Option<String>,

    /// Key under which the access credential is persisted.
    pub access_key: String,

    /// Key under which the refresh credential is persisted.
    pub refresh_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: "/auth/refresh".to_string(),
            credentials_path: None,
            access_key: "access_token".to_string(),
            refresh_key: "refresh_token".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per logical request, first send included.
    pub max_attempts: u32,

    /// Delay before resubmitting after a 429 without a retry hint.
    pub default_delay_ms: u64,

    /// Resubmit POST/PATCH after a 429. Only safe when the backend rejects
    /// rate-limited requests before processing them.
    pub retry_non_idempotent: bool,
}

impl RetryConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_delay_ms: 1000,
            retry_non_idempotent: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
