//! Caller request descriptions and logical requests.

use reqwest::Method;
use serde::Serialize;
use uuid::Uuid;

/// What the caller wants done, before any decoration.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub params: Vec<(String, String)>,
    pub requires_auth: bool,
    pub max_attempts: Option<u32>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            params: Vec::new(),
            requires_auth: true,
            max_attempts: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body.to_string().into_bytes());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Send without an access credential (login, health checks).
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// One caller-initiated operation, possibly resubmitted internally.
///
/// Immutable apart from the attempt counter, which only the dispatch
/// pipeline advances and which never passes `max_attempts`.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub params: Vec<(String, String)>,
    pub correlation_id: Uuid,
    pub requires_auth: bool,
    attempt: u32,
    max_attempts: u32,
}

impl LogicalRequest {
    pub(crate) fn new(spec: RequestSpec, correlation_id: Uuid, default_max_attempts: u32) -> Self {
        Self {
            method: spec.method,
            path: spec.path,
            body: spec.body,
            params: spec.params,
            correlation_id,
            requires_auth: spec.requires_auth,
            attempt: 0,
            max_attempts: spec.max_attempts.unwrap_or(default_max_attempts).max(1),
        }
    }

    /// Number of sends issued so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Claim the next attempt. Returns `None` once the budget is spent.
    pub(crate) fn begin_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }
}
