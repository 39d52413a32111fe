//! Retry policy.
//!
//! # Responsibilities
//! - One resubmission per cause per logical request (auth expiry, rate limit)
//! - Classify methods as idempotent or not
//! - Decide whether a 429 on a non-idempotent method may be resubmitted
//!
//! # Design Decisions
//! - Transport failures and other statuses are never retried at this layer
//! - The attempt ceiling itself lives on the logical request

use reqwest::Method;

use crate::config::RetryConfig;
use crate::error::ErrorKind;

/// Recoverable failure that earned a resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    AuthExpired,
    RateLimited,
}

impl RetryCause {
    pub fn as_str(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RetryCause::AuthExpired => ErrorKind::AuthExpired,
            RetryCause::RateLimited => ErrorKind::RateLimited,
        }
    }
}

/// Per-request record of which causes already consumed their retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryLedger {
    auth_retried: bool,
    backoff_retried: bool,
}

impl RetryLedger {
    pub fn has_retried(&self, cause: RetryCause) -> bool {
        match cause {
            RetryCause::AuthExpired => self.auth_retried,
            RetryCause::RateLimited => self.backoff_retried,
        }
    }

    /// Claim the retry for `cause`. False if it was already used.
    pub fn try_consume(&mut self, cause: RetryCause) -> bool {
        let slot = match cause {
            RetryCause::AuthExpired => &mut self.auth_retried,
            RetryCause::RateLimited => &mut self.backoff_retried,
        };
        if *slot {
            return false;
        }
        *slot = true;
        true
    }

    pub fn retries_used(&self) -> u32 {
        self.auth_retried as u32 + self.backoff_retried as u32
    }
}

/// Safe to send twice without extra side effects.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
    )
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry_non_idempotent: bool,
}

impl RetryPolicy {
    pub fn new(retry_non_idempotent: bool) -> Self {
        Self { retry_non_idempotent }
    }

    /// Whether a 429 on `method` may be resubmitted.
    ///
    /// Resubmitting POST/PATCH relies on the backend contract that a
    /// rate-limited request was rejected before any processing.
    pub fn allows_backoff(&self, method: &Method) -> bool {
        self.retry_non_idempotent || is_idempotent(method)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.retry_non_idempotent)
    }
}
