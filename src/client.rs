//! Client facade.
//!
//! Wires the credential store, refresh coordinator, transport and dispatch
//! pipeline together from a [`ClientConfig`]. Every collaborator can be
//! swapped through [`ApiClientBuilder`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::auth::{AuthBackend, HttpAuthBackend, LogReauthHook, ReauthHook, RefreshCoordinator};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::ClientConfig;
use crate::credentials::{
    CredentialPair, CredentialState, CredentialStore, FileKeyValueStore, KeyValueStore,
    MemoryKeyValueStore, PersistenceError, PersistenceKeys,
};
use crate::dispatch::pipeline::decode;
use crate::dispatch::{ApiResponse, DispatchPipeline};
use crate::error::{ClientError, ClientResult, ErrorDetail, ErrorKind};
use crate::observability::telemetry::{
    FanoutTelemetrySink, MetricsTelemetrySink, TelemetrySink, TracingTelemetrySink,
};
use crate::request::{EnvelopeBuilder, RequestSpec};
use crate::resilience::{BackoffController, RetryPolicy};
use crate::transport::{HttpTransport, Transport, TransportError};

/// Errors raised while assembling a client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ValidationError>),

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("credential persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    auth_backend: Option<Arc<dyn AuthBackend>>,
    persistence: Option<Arc<dyn KeyValueStore>>,
    hook: Option<Arc<dyn ReauthHook>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            auth_backend: None,
            persistence: None,
            hook: None,
            telemetry: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth_backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.auth_backend = Some(backend);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn KeyValueStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn reauth_hook(mut self, hook: Arc<dyn ReauthHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn build(self) -> Result<ApiClient, ClientBuildError> {
        validate_config(&self.config).map_err(ClientBuildError::Config)?;
        let config = self.config;

        let envelope = EnvelopeBuilder::from_config(&config);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.api)?),
        };

        let persistence: Arc<dyn KeyValueStore> = match (self.persistence, &config.auth.credentials_path) {
            (Some(persistence), _) => persistence,
            (None, Some(path)) => Arc::new(FileKeyValueStore::open(path)?),
            (None, None) => Arc::new(MemoryKeyValueStore::new()),
        };
        let store = Arc::new(CredentialStore::load(
            persistence,
            PersistenceKeys::from(&config.auth),
        )?);

        let auth_backend: Arc<dyn AuthBackend> = match self.auth_backend {
            Some(backend) => backend,
            None => Arc::new(HttpAuthBackend::new(
                transport.clone(),
                envelope.url_for(&config.auth.refresh_path),
                envelope.correlation_header().clone(),
            )),
        };

        let hook = self.hook.unwrap_or_else(|| Arc::new(LogReauthHook));
        let telemetry = self.telemetry.unwrap_or_else(|| {
            Arc::new(
                FanoutTelemetrySink::default()
                    .with(Arc::new(TracingTelemetrySink))
                    .with(Arc::new(MetricsTelemetrySink)),
            )
        });

        let coordinator = RefreshCoordinator::new(store, auth_backend, hook);
        let pipeline = DispatchPipeline::new(
            envelope,
            transport,
            coordinator,
            BackoffController::new(config.retries.default_delay()),
            RetryPolicy::from(&config.retries),
            telemetry,
        );

        tracing::info!(
            base_url = %config.api.base_url,
            timeout_secs = config.api.timeout_secs,
            max_attempts = config.retries.max_attempts,
            "API client initialized"
        );

        Ok(ApiClient { config, pipeline })
    }
}

/// Authenticated API client.
pub struct ApiClient {
    config: ClientConfig,
    pipeline: DispatchPipeline,
}

impl ApiClient {
    /// Client with default collaborators for `config`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientBuildError> {
        ApiClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        self.pipeline.coordinator()
    }

    /// Install credentials obtained from a login flow.
    pub fn login(&self, pair: CredentialPair) {
        self.coordinator().store().set(pair);
        tracing::info!("Credentials installed");
    }

    pub fn logout(&self) {
        self.coordinator().store().clear();
        tracing::info!("Credentials cleared");
    }

    pub fn is_authenticated(&self) -> bool {
        self.coordinator().store().is_authenticated()
    }

    pub fn credentials(&self) -> Arc<CredentialState> {
        self.coordinator().store().get()
    }

    pub async fn send(&self, spec: RequestSpec) -> ClientResult<ApiResponse> {
        self.pipeline.dispatch(spec).await
    }

    pub async fn send_cancellable(
        &self,
        spec: RequestSpec,
        token: CancellationToken,
    ) -> ClientResult<ApiResponse> {
        self.pipeline.dispatch_cancellable(spec, token).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> ClientResult<T> {
        self.pipeline.dispatch_json(spec).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send_json(RequestSpec::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let spec = with_body(RequestSpec::post(path), body)?;
        self.send_json(spec).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let spec = with_body(RequestSpec::put(path), body)?;
        self.send_json(spec).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let spec = with_body(RequestSpec::patch(path), body)?;
        self.send_json(spec).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send_json(RequestSpec::delete(path)).await
    }

    /// Check the backend's unauthenticated `/health` endpoint.
    ///
    /// The check targets the origin of `api.base_url`, not its path prefix.
    pub async fn health(&self) -> ClientResult<serde_json::Value> {
        let url = health_url(&self.config.api.base_url);
        let spec = RequestSpec::get(url).anonymous().max_attempts(1);
        let response = self.send(spec.clone()).await?;
        decode(&response, &spec)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.api.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

fn with_body<B: Serialize + ?Sized>(spec: RequestSpec, body: &B) -> ClientResult<RequestSpec> {
    let method = spec.method.clone();
    let path = spec.path.clone();
    // Nothing was sent; the ID only labels the error.
    spec.json(body).map_err(|e| {
        ClientError::new(
            ErrorKind::ServerError,
            Uuid::new_v4(),
            method.as_str(),
            path,
            ErrorDetail::Encode(e.to_string()),
        )
    })
}

fn health_url(base_url: &str) -> String {
    match Url::parse(base_url).and_then(|base| base.join("/health")) {
        Ok(url) => url.to_string(),
        Err(_) => "/health".to_string(),
    }
}
