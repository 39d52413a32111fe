//! Refresh coordinator.
//!
//! At most one refresh call is in flight at any instant. The first request
//! that observes an expired credential opens a ticket and spawns the
//! refresh; every later request joins the ticket's FIFO waiter queue.
//! Checking for a ticket and opening one happen under the same lock.
//!
//! # Settlement
//! - Success: the store is updated in one swap, then waiters are released
//!   in join order with the new snapshot.
//! - Failure: the store is cleared, waiters are released with the error,
//!   then the re-authentication hook fires once for the whole ticket.
//! - Persistence of the settled pair runs after the slot lock is released,
//!   on the blocking pool.
//!
//! The refresh runs on its own task, so a caller that gives up (drops its
//! future) only leaves the queue; the ticket and the other waiters are
//! unaffected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::auth::backend::{AuthBackend, RefreshError, RefreshResponse};
use crate::auth::hook::ReauthHook;
use crate::credentials::types::now_secs;
use crate::credentials::{CredentialPair, CredentialState, CredentialStore, CredentialVersion};
use crate::observability::metrics;

pub type RefreshResult = Result<Arc<CredentialState>, RefreshError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshResult>,
}

struct Ticket {
    id: u64,
    waiters: VecDeque<Waiter>,
}

struct Inner {
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    hook: Arc<dyn ReauthHook>,
    slot: Mutex<Option<Ticket>>,
    next_id: AtomicU64,
    refresh_calls: AtomicU64,
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Option<Ticket>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        hook: Arc<dyn ReauthHook>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                hook,
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                refresh_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Obtain a credential newer than `observed`.
    ///
    /// If the store already moved past `observed` (another ticket settled
    /// since this request was sent) the current credential is returned
    /// without a network call.
    pub async fn obtain_fresh_credential(&self, observed: CredentialVersion) -> RefreshResult {
        let (waiter_id, rx) = {
            let mut slot = self.inner.lock_slot();

            let current = self.inner.store.get();
            if current.pair.is_none() {
                return Err(RefreshError::MissingCredential);
            }
            if current.version != observed {
                tracing::debug!(
                    observed = observed.0,
                    current = current.version.0,
                    "Credential already refreshed"
                );
                return Ok(current);
            }

            let (tx, rx) = oneshot::channel();
            let waiter_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let waiter = Waiter { id: waiter_id, tx };

            match slot.as_mut() {
                Some(ticket) => {
                    ticket.waiters.push_back(waiter);
                    tracing::debug!(
                        ticket = ticket.id,
                        waiters = ticket.waiters.len(),
                        "Joined outstanding refresh"
                    );
                    metrics::record_refresh_waiters(ticket.waiters.len());
                }
                None => {
                    let ticket_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    *slot = Some(Ticket {
                        id: ticket_id,
                        waiters: VecDeque::from([waiter]),
                    });
                    metrics::record_refresh_waiters(1);

                    let coordinator = self.clone();
                    tokio::spawn(async move {
                        coordinator.run_refresh(ticket_id).await;
                    });
                }
            }

            (waiter_id, rx)
        };

        let mut guard = WaiterGuard {
            inner: &self.inner,
            waiter_id,
            armed: true,
        };
        let result = rx.await;
        guard.armed = false;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(RefreshError::Aborted("ticket dropped without settling".into())),
        }
    }

    /// Number of requests queued on the outstanding ticket.
    pub fn waiter_count(&self) -> usize {
        self.inner
            .lock_slot()
            .as_ref()
            .map_or(0, |ticket| ticket.waiters.len())
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_slot().is_some()
    }

    /// Refresh calls issued to the backend since construction.
    pub fn refresh_calls(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    async fn run_refresh(&self, ticket_id: u64) {
        let start = Instant::now();
        let refresh_token = self
            .inner
            .store
            .get()
            .pair
            .as_ref()
            .map(|pair| pair.refresh_token.clone());

        tracing::info!(ticket = ticket_id, "Refreshing access credential");

        let result = match refresh_token {
            Some(token) => {
                self.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let backend = self.inner.backend.clone();
                // Own task so a panicking backend still settles the ticket.
                match tokio::spawn(async move { backend.refresh(&token).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(RefreshError::Aborted(e.to_string())),
                }
            }
            None => Err(RefreshError::MissingCredential),
        };

        metrics::record_refresh(if result.is_ok() { "success" } else { "failure" }, start);
        self.settle(ticket_id, result);
        self.persist().await;
    }

    /// Write the settled credential outside the slot lock, off the runtime.
    async fn persist(&self) {
        let store = self.inner.store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.persist_current()).await {
            tracing::error!(error = %e, "Credential persistence task failed");
        }
    }

    fn settle(&self, ticket_id: u64, result: Result<RefreshResponse, RefreshError>) {
        let (waiters, outcome) = {
            let mut slot = self.inner.lock_slot();

            let outcome = match result {
                Ok(response) => {
                    let previous = self.inner.store.get();
                    Ok(self
                        .inner
                        .store
                        .replace(Some(merge(previous.pair.as_ref(), response))))
                }
                Err(e) => {
                    self.inner.store.replace(None);
                    Err(e)
                }
            };

            let waiters = match slot.take() {
                Some(ticket) if ticket.id == ticket_id => ticket.waiters,
                other => {
                    tracing::error!(ticket = ticket_id, "Settled ticket was not outstanding");
                    *slot = other;
                    VecDeque::new()
                }
            };
            (waiters, outcome)
        };

        metrics::record_refresh_waiters(0);

        match &outcome {
            Ok(state) => tracing::info!(
                ticket = ticket_id,
                version = state.version.0,
                waiters = waiters.len(),
                "Credential refreshed"
            ),
            Err(e) => tracing::warn!(
                ticket = ticket_id,
                error = %e,
                waiters = waiters.len(),
                "Credential refresh failed; credentials cleared"
            ),
        }

        for waiter in waiters {
            // A closed receiver means the caller already gave up.
            let _ = waiter.tx.send(outcome.clone());
        }

        if let Err(e) = &outcome {
            self.inner.hook.reauthenticate(e);
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("refresh_calls", &self.refresh_calls())
            .finish()
    }
}

/// Removes a waiter from the queue if its future is dropped before settling.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    waiter_id: u64,
    armed: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.inner.lock_slot();
        if let Some(ticket) = slot.as_mut() {
            let before = ticket.waiters.len();
            ticket.waiters.retain(|w| w.id != self.waiter_id);
            if ticket.waiters.len() < before {
                tracing::debug!(ticket = ticket.id, "Cancelled waiter left refresh queue");
                metrics::record_refresh_waiters(ticket.waiters.len());
            }
        }
    }
}

fn merge(previous: Option<&CredentialPair>, response: RefreshResponse) -> CredentialPair {
    let refresh_token = response
        .refresh_token
        .or_else(|| previous.map(|p| p.refresh_token.clone()))
        .unwrap_or_default();

    CredentialPair {
        access_token: response.access_token,
        refresh_token,
        expires_at: response.expires_in.map(|secs| now_secs() + secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hook::LogReauthHook;
    use crate::credentials::{KeyValueStore, MemoryKeyValueStore, PersistenceError, PersistenceKeys};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;
    use std::time::Duration;

    struct SlowBackend {
        result: Result<RefreshResponse, RefreshError>,
        delay: Duration,
    }

    #[async_trait]
    impl AuthBackend for SlowBackend {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn coordinator(
        result: Result<RefreshResponse, RefreshError>,
    ) -> (RefreshCoordinator, Arc<AtomicUsize>) {
        let store = Arc::new(
            CredentialStore::load(Arc::new(MemoryKeyValueStore::new()), PersistenceKeys::default())
                .unwrap(),
        );
        store.set(CredentialPair::new("T1", "R1"));

        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = hook_calls.clone();
        let hook = move |_: &RefreshError| {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        let backend = SlowBackend {
            result,
            delay: Duration::from_millis(50),
        };
        (
            RefreshCoordinator::new(store, Arc::new(backend), Arc::new(hook)),
            hook_calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_keeps_previous_refresh_token() {
        let (coordinator, hook_calls) = coordinator(Ok(RefreshResponse::new("T2")));
        let observed = coordinator.store().get().version;

        let state = coordinator.obtain_fresh_credential(observed).await.unwrap();
        let pair = state.pair.as_ref().unwrap();
        assert_eq!(pair.access_token, "T2");
        assert_eq!(pair.refresh_token, "R1");
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_version_skips_refresh() {
        let (coordinator, _) = coordinator(Ok(RefreshResponse::new("T2")));
        let stale = coordinator.store().get().version;
        coordinator.store().set(CredentialPair::new("T9", "R9"));

        let state = coordinator.obtain_fresh_credential(stale).await.unwrap();
        assert_eq!(state.access_token(), Some("T9"));
        assert_eq!(coordinator.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_clears_store_and_fires_hook_once() {
        let (coordinator, hook_calls) = coordinator(Err(RefreshError::Rejected(401)));
        let observed = coordinator.store().get().version;

        let results = futures_util::future::join_all(
            (0..4).map(|_| coordinator.obtain_fresh_credential(observed)),
        )
        .await;

        assert!(results.iter().all(|r| matches!(r, Err(RefreshError::Rejected(401)))));
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.store().is_authenticated());

        // Nothing left to refresh with; no new call, no second hook.
        let again = coordinator.obtain_fresh_credential(observed).await;
        assert!(matches!(again, Err(RefreshError::MissingCredential)));
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    /// Notes, on every write, whether a refresh ticket was still open.
    #[derive(Default)]
    struct ObservingKeyValueStore {
        coordinator: OnceLock<RefreshCoordinator>,
        inner: MemoryKeyValueStore,
        ticket_open: Mutex<Vec<bool>>,
    }

    impl ObservingKeyValueStore {
        fn observe(&self) {
            if let Some(coordinator) = self.coordinator.get() {
                self.ticket_open.lock().unwrap().push(coordinator.is_refreshing());
            }
        }
    }

    impl KeyValueStore for ObservingKeyValueStore {
        fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
            self.inner.get(key)
        }

        fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), PersistenceError> {
            self.observe();
            self.inner.set_entries(entries)
        }

        fn remove_entries(&self, keys: &[&str]) -> Result<(), PersistenceError> {
            self.observe();
            self.inner.remove_entries(keys)
        }
    }

    #[tokio::test]
    async fn test_persistence_happens_after_ticket_closes() {
        let kv = Arc::new(ObservingKeyValueStore::default());
        let store = Arc::new(CredentialStore::load(kv.clone(), PersistenceKeys::default()).unwrap());
        store.set(CredentialPair::new("T1", "R1"));

        let backend = SlowBackend {
            result: Ok(RefreshResponse::new("T2")),
            delay: Duration::from_millis(10),
        };
        let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(backend), Arc::new(LogReauthHook));
        let _ = kv.coordinator.set(coordinator.clone());

        let observed = store.get().version;
        coordinator.obtain_fresh_credential(observed).await.unwrap();

        for _ in 0..200 {
            if kv.inner.get("access_token").unwrap().as_deref() == Some("T2") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(kv.inner.get("access_token").unwrap().as_deref(), Some("T2"));
        assert_eq!(*kv.ticket_open.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_merge_rotates_refresh_token_and_expiry() {
        let previous = CredentialPair::new("T1", "R1");
        let merged = merge(
            Some(&previous),
            RefreshResponse {
                access_token: "T2".into(),
                refresh_token: Some("R2".into()),
                expires_in: Some(60),
            },
        );
        assert_eq!(merged.refresh_token, "R2");
        assert!(merged.expires_at.unwrap() >= now_secs() + 59);
    }
}
