//! Request envelope builder.
//!
//! Turns a [`RequestSpec`] into a [`LogicalRequest`] with a fresh
//! correlation ID, and decorates each attempt with the credential that is
//! current at send time.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::credentials::CredentialState;
use crate::error::{ClientError, ErrorDetail, ErrorKind};
use crate::request::types::{LogicalRequest, RequestSpec};
use crate::transport::OutboundRequest;

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    base_url: String,
    correlation_header: HeaderName,
    default_max_attempts: u32,
}

impl EnvelopeBuilder {
    pub fn new(base_url: &str, correlation_header: HeaderName, default_max_attempts: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            correlation_header,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    /// Build from a validated configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        let header = HeaderName::from_bytes(config.api.correlation_header.as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self::new(&config.api.base_url, header, config.retries.max_attempts)
    }

    pub fn correlation_header(&self) -> &HeaderName {
        &self.correlation_header
    }

    /// Create the logical request.
    ///
    /// Fails with `Unauthenticated` when the operation needs a credential
    /// and none is present; the transport is never contacted in that case.
    pub fn build(
        &self,
        spec: RequestSpec,
        credentials: &CredentialState,
    ) -> Result<LogicalRequest, ClientError> {
        let correlation_id = Uuid::new_v4();

        if spec.requires_auth && credentials.pair.is_none() {
            return Err(ClientError::new(
                ErrorKind::Unauthenticated,
                correlation_id,
                spec.method.as_str(),
                spec.path,
                ErrorDetail::NoCredential,
            ));
        }

        Ok(LogicalRequest::new(spec, correlation_id, self.default_max_attempts))
    }

    /// Produce the wire request for the current attempt.
    ///
    /// Re-checks the credential on every attempt: a request that needs one
    /// fails with `Unauthenticated` instead of going out without it.
    pub fn decorate(
        &self,
        request: &LogicalRequest,
        credentials: &CredentialState,
    ) -> Result<OutboundRequest, ClientError> {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(&request.correlation_id.to_string()) {
            headers.insert(self.correlation_header.clone(), value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if request.requires_auth {
            let unauthenticated = |detail: ErrorDetail| {
                ClientError::new(
                    ErrorKind::Unauthenticated,
                    request.correlation_id,
                    request.method.as_str(),
                    request.path.clone(),
                    detail,
                )
            };

            let pair = credentials
                .pair
                .as_ref()
                .ok_or_else(|| unauthenticated(ErrorDetail::NoCredential))?;
            let mut value = HeaderValue::from_str(&pair.bearer())
                .map_err(|_| unauthenticated(ErrorDetail::InvalidCredential))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if request.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        Ok(OutboundRequest {
            method: request.method.clone(),
            url: self.url_for(&request.path),
            query: request.params.clone(),
            headers,
            body: request.body.clone(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}
