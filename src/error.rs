//! Caller-visible error taxonomy.
//!
//! Every terminal failure of a logical request is reported as a
//! [`ClientError`] carrying its [`ErrorKind`], the correlation ID that was
//! sent on the wire, and the original cause.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No credential, or the credential can no longer be refreshed.
    Unauthenticated,
    /// The access credential was rejected; recoverable via refresh.
    AuthExpired,
    /// The backend asked us to slow down; recoverable via backoff.
    RateLimited,
    /// Network failure or per-attempt timeout. Not retried.
    TransportFailure,
    /// Any other non-2xx status, or an undecodable 2xx body. Not retried.
    ServerError,
    /// The caller gave up on the request.
    Cancelled,
}

impl ErrorKind {
    /// Stable label used for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The original cause behind a [`ClientError`].
#[derive(Debug, Clone, Error)]
pub enum ErrorDetail {
    #[error("no credential available")]
    NoCredential,

    #[error("access credential is not a valid header value")]
    InvalidCredential,

    #[error("credential refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("retries exhausted after {attempts} attempts (last cause: {cause})")]
    Exhausted { cause: ErrorKind, attempts: u32 },

    #[error("request body could not be encoded: {0}")]
    Encode(String),

    #[error("response body could not be decoded: {0}")]
    Decode(String),

    #[error("request cancelled by caller")]
    Cancelled,
}

/// Terminal failure of a logical request.
#[derive(Debug, Clone, Error)]
#[error("{kind} [{method} {path}] correlation_id={correlation_id}: {detail}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub correlation_id: Uuid,
    pub method: String,
    pub path: String,
    pub detail: ErrorDetail,
}

impl ClientError {
    pub fn new(
        kind: ErrorKind,
        correlation_id: Uuid,
        method: impl Into<String>,
        path: impl Into<String>,
        detail: ErrorDetail,
    ) -> Self {
        Self {
            kind,
            correlation_id,
            method: method.into(),
            path: path.into(),
            detail,
        }
    }

    /// HTTP status of the final response, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match &self.detail {
            ErrorDetail::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when retries were consumed before giving up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.detail, ErrorDetail::Exhausted { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
