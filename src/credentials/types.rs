//! Credential pair and versioned snapshot types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Access/refresh credential pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access credential expiry (seconds since epoch), when known.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the access credential is known to have expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= now_secs(),
            None => false,
        }
    }

    /// `Authorization` header value for the access credential.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens never reach logs.
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Monotonic version of the credential store contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CredentialVersion(pub u64);

impl CredentialVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Immutable view of the store at one version.
#[derive(Debug, Clone, Default)]
pub struct CredentialState {
    pub version: CredentialVersion,
    pub pair: Option<CredentialPair>,
}

impl CredentialState {
    pub fn access_token(&self) -> Option<&str> {
        self.pair.as_ref().map(|p| p.access_token.as_str())
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
