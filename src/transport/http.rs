//! `reqwest`-backed transport with a per-attempt deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::config::ApiConfig;
use crate::transport::{OutboundRequest, Transport, TransportError, TransportResponse};

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_duration: Duration,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config.timeout()))
    }

    pub fn with_client(client: reqwest::Client, timeout_duration: Duration) -> Self {
        Self {
            client,
            timeout_duration,
        }
    }

    async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        match timeout(self.timeout_duration, self.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::Timeout(self.timeout_duration)),
            Ok(Err(e)) if e.is_connect() => Err(TransportError::Connect(e.to_string())),
            Ok(Err(e)) => Err(TransportError::Other(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.timeout_duration)),
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}
