//! Dispatch pipeline.
//!
//! Drives one logical request through the state machine in
//! [`crate::dispatch::state`]: exactly one transport call per `SENT`, one
//! refresh join per `REFRESHING`, one delay per `BACKING_OFF`, and exactly
//! one telemetry event per terminal failure.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{RefreshCoordinator, RefreshError};
use crate::dispatch::state::{classify, Classification, DispatchState, StateTracker};
use crate::error::{ClientError, ClientResult, ErrorDetail, ErrorKind};
use crate::observability::metrics;
use crate::observability::telemetry::{EventKind, StatusOrErrorKind, TelemetryEvent, TelemetrySink};
use crate::request::{EnvelopeBuilder, LogicalRequest, RequestSpec};
use crate::resilience::{BackoffController, RetryCause, RetryLedger, RetryPolicy};
use crate::transport::{Transport, TransportError};

/// Successful outcome of a logical request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub correlation_id: Uuid,
    pub attempts: u32,
}

impl ApiResponse {
    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.body.is_empty() {
            serde_json::from_slice(b"null")
        } else {
            serde_json::from_slice(&self.body)
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct DispatchPipeline {
    envelope: EnvelopeBuilder,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    backoff: BackoffController,
    policy: RetryPolicy,
    telemetry: Arc<dyn TelemetrySink>,
}

impl DispatchPipeline {
    pub fn new(
        envelope: EnvelopeBuilder,
        transport: Arc<dyn Transport>,
        coordinator: RefreshCoordinator,
        backoff: BackoffController,
        policy: RetryPolicy,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            envelope,
            transport,
            coordinator,
            backoff,
            policy,
            telemetry,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Run a request to a terminal state.
    pub async fn dispatch(&self, spec: RequestSpec) -> ClientResult<ApiResponse> {
        let start = Instant::now();
        let request = self.build(spec, start)?;
        self.run(request, start).await
    }

    /// Like [`dispatch`](Self::dispatch), but gives up with `Cancelled` as
    /// soon as `token` fires. Giving up while queued on a refresh only
    /// removes this request from the queue.
    pub async fn dispatch_cancellable(
        &self,
        spec: RequestSpec,
        token: CancellationToken,
    ) -> ClientResult<ApiResponse> {
        let start = Instant::now();
        let request = self.build(spec, start)?;

        let correlation_id = request.correlation_id;
        let method = request.method.to_string();
        let path = request.path.clone();

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(correlation_id = %correlation_id, method = %method, path = %path, "Request cancelled");
                let err = ClientError::new(
                    ErrorKind::Cancelled,
                    correlation_id,
                    method,
                    path,
                    ErrorDetail::Cancelled,
                );
                self.report_failure(&err, None, 0, start);
                Err(err)
            }
            result = self.run(request, start) => result,
        }
    }

    fn build(&self, spec: RequestSpec, start: Instant) -> ClientResult<LogicalRequest> {
        let credentials = self.coordinator.store().get();
        self.envelope.build(spec, &credentials).map_err(|err| {
            let mut tracker = StateTracker::new(err.correlation_id);
            tracker.advance(DispatchState::Failed);
            self.report_failure(&err, None, 0, start);
            err
        })
    }

    async fn run(&self, mut request: LogicalRequest, start: Instant) -> ClientResult<ApiResponse> {
        let mut tracker = StateTracker::new(request.correlation_id);
        let mut ledger = RetryLedger::default();
        let mut last_cause = ErrorKind::TransportFailure;

        loop {
            // The store may have been cleared while this request waited.
            let credentials = self.coordinator.store().get();
            let outbound = match self.envelope.decorate(&request, &credentials) {
                Ok(outbound) => outbound,
                Err(err) => {
                    return Err(self.fail(&mut tracker, &request, err.kind, err.detail, None, start));
                }
            };

            let Some(attempt) = request.begin_attempt() else {
                let detail = ErrorDetail::Exhausted {
                    cause: last_cause,
                    attempts: request.attempt(),
                };
                return Err(self.fail(&mut tracker, &request, last_cause, detail, None, start));
            };

            tracker.advance(DispatchState::Sent);

            tracing::debug!(
                correlation_id = %request.correlation_id,
                method = %request.method,
                path = %request.path,
                attempt,
                "Sending request"
            );

            let response = match self.transport.send(outbound).await {
                Ok(response) => response,
                Err(e) => {
                    let detail = match e {
                        TransportError::Timeout(after) => ErrorDetail::Timeout(after),
                        other => ErrorDetail::Transport(other.to_string()),
                    };
                    return Err(self.fail(
                        &mut tracker,
                        &request,
                        ErrorKind::TransportFailure,
                        detail,
                        None,
                        start,
                    ));
                }
            };

            let status = response.status;
            match classify(status, request.requires_auth) {
                Classification::Success => {
                    tracker.advance(DispatchState::Succeeded);
                    metrics::record_request(request.method.as_str(), "success", start);
                    if ledger.retries_used() > 0 {
                        self.telemetry.record(TelemetryEvent {
                            kind: EventKind::RetriedSuccess,
                            correlation_id: request.correlation_id,
                            method: request.method.to_string(),
                            path: request.path.clone(),
                            status_or_error: StatusOrErrorKind::Status(status.as_u16()),
                            error_kind: None,
                            latency: start.elapsed(),
                            attempts: attempt,
                        });
                    }
                    return Ok(ApiResponse {
                        status,
                        headers: response.headers,
                        body: response.body,
                        correlation_id: request.correlation_id,
                        attempts: attempt,
                    });
                }

                Classification::AuthExpired => {
                    tracker.advance(DispatchState::AuthExpired);
                    last_cause = ErrorKind::AuthExpired;

                    if !self.may_retry(&mut ledger, &request, RetryCause::AuthExpired) {
                        let detail = ErrorDetail::Exhausted {
                            cause: ErrorKind::AuthExpired,
                            attempts: attempt,
                        };
                        return Err(self.fail(
                            &mut tracker,
                            &request,
                            ErrorKind::AuthExpired,
                            detail,
                            Some(status),
                            start,
                        ));
                    }

                    tracker.advance(DispatchState::Refreshing);
                    metrics::record_retry(RetryCause::AuthExpired.as_str());

                    if let Err(e) = self
                        .coordinator
                        .obtain_fresh_credential(credentials.version)
                        .await
                    {
                        let detail = match e {
                            RefreshError::MissingCredential => ErrorDetail::NoCredential,
                            other => ErrorDetail::RefreshRejected(other.to_string()),
                        };
                        return Err(self.fail(
                            &mut tracker,
                            &request,
                            ErrorKind::Unauthenticated,
                            detail,
                            None,
                            start,
                        ));
                    }
                }

                Classification::RateLimited => {
                    tracker.advance(DispatchState::RateLimited);
                    last_cause = ErrorKind::RateLimited;

                    if !self.policy.allows_backoff(&request.method) {
                        let detail = ErrorDetail::Status {
                            status: status.as_u16(),
                            body: response.text_lossy(),
                        };
                        return Err(self.fail(
                            &mut tracker,
                            &request,
                            ErrorKind::RateLimited,
                            detail,
                            Some(status),
                            start,
                        ));
                    }

                    if !self.may_retry(&mut ledger, &request, RetryCause::RateLimited) {
                        let detail = ErrorDetail::Exhausted {
                            cause: ErrorKind::RateLimited,
                            attempts: attempt,
                        };
                        return Err(self.fail(
                            &mut tracker,
                            &request,
                            ErrorKind::RateLimited,
                            detail,
                            Some(status),
                            start,
                        ));
                    }

                    tracker.advance(DispatchState::BackingOff);
                    metrics::record_retry(RetryCause::RateLimited.as_str());

                    let delay = self.backoff.delay_for(&response);
                    tracing::info!(
                        correlation_id = %request.correlation_id,
                        attempt,
                        delay = ?delay,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }

                Classification::Failed(kind) => {
                    let detail = ErrorDetail::Status {
                        status: status.as_u16(),
                        body: response.text_lossy(),
                    };
                    return Err(self.fail(&mut tracker, &request, kind, detail, Some(status), start));
                }
            }
        }
    }

    /// Dispatch and decode the JSON body.
    pub async fn dispatch_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> ClientResult<T> {
        let response = self.dispatch(spec.clone()).await?;
        decode(&response, &spec)
    }

    fn may_retry(&self, ledger: &mut RetryLedger, request: &LogicalRequest, cause: RetryCause) -> bool {
        !request.is_exhausted() && ledger.try_consume(cause)
    }

    fn fail(
        &self,
        tracker: &mut StateTracker,
        request: &LogicalRequest,
        kind: ErrorKind,
        detail: ErrorDetail,
        status: Option<StatusCode>,
        start: Instant,
    ) -> ClientError {
        tracker.advance(DispatchState::Failed);
        let err = ClientError::new(
            kind,
            request.correlation_id,
            request.method.as_str(),
            request.path.clone(),
            detail,
        );
        self.report_failure(&err, status, request.attempt(), start);
        err
    }

    fn report_failure(&self, err: &ClientError, status: Option<StatusCode>, attempts: u32, start: Instant) {
        tracing::debug!(
            correlation_id = %err.correlation_id,
            method = %err.method,
            path = %err.path,
            kind = %err.kind,
            attempts,
            error = %err.detail,
            "Request failed"
        );
        metrics::record_request(&err.method, err.kind.as_str(), start);

        let status_or_error = match status {
            Some(status) => StatusOrErrorKind::Status(status.as_u16()),
            None => StatusOrErrorKind::Error(err.kind),
        };
        self.telemetry.record(TelemetryEvent {
            kind: EventKind::Failure,
            correlation_id: err.correlation_id,
            method: err.method.clone(),
            path: err.path.clone(),
            status_or_error,
            error_kind: Some(err.kind),
            latency: start.elapsed(),
            attempts,
        });
    }
}

/// Decode a successful response, mapping failures to `ServerError`.
pub fn decode<T: DeserializeOwned>(response: &ApiResponse, spec: &RequestSpec) -> ClientResult<T> {
    response.json().map_err(|e| {
        tracing::warn!(correlation_id = %response.correlation_id, error = %e, "Undecodable response body");
        ClientError::new(
            ErrorKind::ServerError,
            response.correlation_id,
            spec.method.as_str(),
            spec.path.clone(),
            ErrorDetail::Decode(e.to_string()),
        )
    })
}
