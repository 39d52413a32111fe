//! Authentication backend contract.
//!
//! `POST {refresh_path} {"refreshToken": ...}` answers with
//! `{"accessToken": ..., "refreshToken"?: ..., "expiresIn"?: ...}` or an
//! error status meaning the refresh credential itself is no longer valid.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::transport::{OutboundRequest, Transport, TransportError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Successful refresh payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Rotated refresh credential; the previous one stays valid when absent.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access credential lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl RefreshResponse {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
        }
    }
}

/// Why a refresh did not produce a credential.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("refresh credential rejected with status {0}")]
    Rejected(u16),

    #[error("refresh request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("no refresh credential available")]
    MissingCredential,

    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError>;
}

/// Refresh over the same transport the pipeline uses.
pub struct HttpAuthBackend {
    transport: Arc<dyn Transport>,
    url: String,
    correlation_header: HeaderName,
}

impl HttpAuthBackend {
    pub fn new(transport: Arc<dyn Transport>, url: String, correlation_header: HeaderName) -> Self {
        Self {
            transport,
            url,
            correlation_header,
        }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let body = serde_json::to_vec(&RefreshRequest { refresh_token })
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        let correlation_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
            headers.insert(self.correlation_header.clone(), value);
        }

        tracing::debug!(correlation_id = %correlation_id, url = %self.url, "Sending refresh request");

        let response = self
            .transport
            .send(OutboundRequest {
                method: Method::POST,
                url: self.url.clone(),
                query: Vec::new(),
                headers,
                body: Some(body),
            })
            .await?;

        if !response.status.is_success() {
            return Err(RefreshError::Rejected(response.status.as_u16()));
        }

        serde_json::from_slice::<RefreshResponse>(&response.body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    struct OneShotTransport {
        response: TransportResponse,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait]
    impl Transport for OneShotTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn backend(response: TransportResponse) -> (HttpAuthBackend, Arc<OneShotTransport>) {
        let transport = Arc::new(OneShotTransport {
            response,
            seen: Mutex::new(Vec::new()),
        });
        let backend = HttpAuthBackend::new(
            transport.clone(),
            "http://api.local/auth/refresh".into(),
            HeaderName::from_static("x-request-id"),
        );
        (backend, transport)
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let (backend, transport) = backend(
            TransportResponse::new(StatusCode::OK)
                .with_body(r#"{"accessToken":"T2","expiresIn":3600}"#),
        );

        let response = backend.refresh("R1").await.unwrap();
        assert_eq!(response.access_token, "T2");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, Some(3600));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].body.as_deref(), Some(br#"{"refreshToken":"R1"}"#.as_slice()));
        assert!(seen[0].headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let (backend, _) = backend(TransportResponse::new(StatusCode::UNAUTHORIZED));
        assert!(matches!(backend.refresh("R1").await, Err(RefreshError::Rejected(401))));
    }

    #[tokio::test]
    async fn test_refresh_garbage_body() {
        let (backend, _) = backend(TransportResponse::new(StatusCode::OK).with_body("<html>"));
        assert!(matches!(
            backend.refresh("R1").await,
            Err(RefreshError::InvalidResponse(_))
        ));
    }
}
