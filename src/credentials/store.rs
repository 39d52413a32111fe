//! Versioned credential store.
//!
//! Readers take lock-free snapshots; every write replaces the whole
//! [`CredentialState`] in one atomic swap, so a reader sees either the old
//! pair or the new pair, never a mix of the two.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::AuthConfig;
use crate::credentials::persistence::{KeyValueStore, PersistenceError};
use crate::credentials::types::{CredentialPair, CredentialState};

/// Keys under which the pair is persisted.
#[derive(Debug, Clone)]
pub struct PersistenceKeys {
    pub access: String,
    pub refresh: String,
}

impl Default for PersistenceKeys {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for PersistenceKeys {
    fn from(config: &AuthConfig) -> Self {
        Self {
            access: config.access_key.clone(),
            refresh: config.refresh_key.clone(),
        }
    }
}

pub struct CredentialStore {
    current: ArcSwap<CredentialState>,
    write_lock: Mutex<()>,
    persist_lock: Mutex<()>,
    persistence: Arc<dyn KeyValueStore>,
    keys: PersistenceKeys,
}

impl CredentialStore {
    /// Load the persisted pair, if both halves are present.
    pub fn load(
        persistence: Arc<dyn KeyValueStore>,
        keys: PersistenceKeys,
    ) -> Result<Self, PersistenceError> {
        let access = persistence.get(&keys.access)?;
        let refresh = persistence.get(&keys.refresh)?;

        let state = match (access, refresh) {
            (Some(access), Some(refresh)) => {
                tracing::info!("Restored persisted credentials");
                CredentialState {
                    version: Default::default(),
                    pair: Some(CredentialPair::new(access, refresh)),
                }
            }
            _ => CredentialState::default(),
        };

        Ok(Self {
            current: ArcSwap::from_pointee(state),
            write_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
            persistence,
            keys,
        })
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<CredentialState> {
        self.current.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.load().pair.is_some()
    }

    /// Install a new pair and persist it. Returns the snapshot that became current.
    pub fn set(&self, pair: CredentialPair) -> Arc<CredentialState> {
        let state = self.replace(Some(pair));
        self.persist_current();
        state
    }

    /// Drop the pair (logout) and remove it from persistence.
    pub fn clear(&self) -> Arc<CredentialState> {
        let state = self.replace(None);
        self.persist_current();
        state
    }

    /// Swap the in-memory pair without touching persistence.
    pub(crate) fn replace(&self, pair: Option<CredentialPair>) -> Arc<CredentialState> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(CredentialState {
            version: self.current.load().version.next(),
            pair,
        });
        self.current.store(next.clone());
        next
    }

    /// Write the current snapshot to the key-value store.
    ///
    /// Always writes whatever is current when the write starts, so
    /// overlapping calls converge on the latest pair.
    pub fn persist_current(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let state = self.current.load_full();

        let result = match &state.pair {
            Some(pair) => self.persistence.set_entries(&[
                (self.keys.access.as_str(), pair.access_token.as_str()),
                (self.keys.refresh.as_str(), pair.refresh_token.as_str()),
            ]),
            None => self
                .persistence
                .remove_entries(&[self.keys.access.as_str(), self.keys.refresh.as_str()]),
        };

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                version = state.version.0,
                "Failed to persist credentials; keeping them in memory"
            );
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.current.load();
        f.debug_struct("CredentialStore")
            .field("version", &state.version)
            .field("authenticated", &state.pair.is_some())
            .finish()
    }
}
