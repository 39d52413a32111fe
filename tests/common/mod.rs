//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_client::auth::{AuthBackend, RefreshError, RefreshResponse, ReauthHook};
use resilient_client::credentials::MemoryKeyValueStore;
use resilient_client::observability::telemetry::{EventKind, TelemetryEvent, TelemetrySink};
use resilient_client::transport::{OutboundRequest, Transport, TransportError, TransportResponse};
use resilient_client::{ApiClient, ClientConfig, CredentialPair};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(TransportResponse),
    Fail(TransportError),
}

pub fn status(code: u16) -> Step {
    Step::Respond(TransportResponse::new(StatusCode::from_u16(code).unwrap()))
}

pub fn json(code: u16, body: &str) -> Step {
    Step::Respond(TransportResponse::new(StatusCode::from_u16(code).unwrap()).with_body(body))
}

pub fn rate_limited(retry_after: Option<&str>) -> Step {
    let mut response = TransportResponse::new(StatusCode::TOO_MANY_REQUESTS);
    if let Some(value) = retry_after {
        response
            .headers
            .insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
    }
    Step::Respond(response)
}

/// In-process transport that answers from per-credential scripts.
///
/// Requests are keyed by the bearer token they carry (`""` when anonymous).
/// The last step of a script repeats once the earlier ones are used up.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    sent: Mutex<Vec<(tokio::time::Instant, OutboundRequest)>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(self, token: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), steps.into());
        self
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn send_times(&self) -> Vec<tokio::time::Instant> {
        self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Bearer tokens carried by every send, in order.
    pub fn tokens_sent(&self) -> Vec<String> {
        self.sent().iter().map(token_of).collect()
    }
}

fn token_of(request: &OutboundRequest) -> String {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let token = token_of(&request);
        self.sent
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), request));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&token) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(e)) => Err(e),
            None => Ok(TransportResponse::new(StatusCode::UNAUTHORIZED)),
        }
    }
}

/// Auth backend that counts calls and answers after a delay.
pub struct CountingAuthBackend {
    result: Result<RefreshResponse, RefreshError>,
    delay: Duration,
    calls: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl CountingAuthBackend {
    pub fn succeeding(access_token: &str) -> Self {
        Self::new(Ok(RefreshResponse::new(access_token)))
    }

    pub fn failing(error: RefreshError) -> Self {
        Self::new(Err(error))
    }

    fn new(result: Result<RefreshResponse, RefreshError>) -> Self {
        Self {
            result,
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthBackend for CountingAuthBackend {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(refresh_token.to_string());
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

#[derive(Default)]
pub struct CountingHook {
    calls: AtomicUsize,
}

impl CountingHook {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReauthHook for CountingHook {
    fn reauthenticate(&self, _reason: &RefreshError) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Failure)
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Everything a test needs to observe a client.
pub struct Harness {
    pub client: Arc<ApiClient>,
    pub transport: Arc<ScriptedTransport>,
    pub backend: Arc<CountingAuthBackend>,
    pub hook: Arc<CountingHook>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness(transport: ScriptedTransport, backend: CountingAuthBackend) -> Harness {
    harness_with(ClientConfig::default(), transport, backend)
}

/// Client logged in as `T1`/`R1` against scripted collaborators.
pub fn harness_with(
    config: ClientConfig,
    transport: ScriptedTransport,
    backend: CountingAuthBackend,
) -> Harness {
    let transport = Arc::new(transport);
    let backend = Arc::new(backend);
    let hook = Arc::new(CountingHook::default());
    let sink = Arc::new(RecordingSink::default());

    let client = ApiClient::builder(config)
        .transport(transport.clone())
        .auth_backend(backend.clone())
        .persistence(Arc::new(MemoryKeyValueStore::new()))
        .reauth_hook(hook.clone())
        .telemetry(sink.clone())
        .build()
        .unwrap();
    client.login(CredentialPair::new("T1", "R1"));

    Harness {
        client: Arc::new(client),
        transport,
        backend,
        hook,
        sink,
    }
}

/// A canned reply from the TCP backend.
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
///
/// The handler sees the raw request head, so tests can branch on headers.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let reply = f(head).await;
                        let status_text = match reply.status {
                            200 => "200 OK",
                            204 => "204 No Content",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let mut response = format!("HTTP/1.1 {}\r\n", status_text);
                        for (name, value) in &reply.headers {
                            response.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        response.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            reply.body.len(),
                            reply.body
                        ));
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
                    let body_len = content_length(&head);
                    let mut have = buf.len() - end - 4;
                    while have < body_len {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => have += n,
                        }
                    }
                    return head;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
