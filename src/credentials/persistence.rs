//! Credential persistence behind an injected key-value store.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use thiserror::Error;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value store surviving client restarts.
///
/// Multi-key writes are applied as one unit where the backend allows it.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), PersistenceError>;

    fn remove_entries(&self, keys: &[&str]) -> Result<(), PersistenceError>;
}

/// Process-local store, mainly for tests and ephemeral sessions.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    inner: Arc<DashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), PersistenceError> {
        for (k, v) in entries {
            self.inner.insert((*k).to_string(), (*v).to_string());
        }
        Ok(())
    }

    fn remove_entries(&self, keys: &[&str]) -> Result<(), PersistenceError> {
        for k in keys {
            self.inner.remove(*k);
        }
        Ok(())
    }
}

/// JSON file store. The whole map is rewritten on every change.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: DashMap<String, String>,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    /// Open the store, loading the file if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let map: HashMap<String, String> = serde_json::from_reader(reader)?;
            for (k, v) in map {
                entries.insert(k, v);
            }
            tracing::debug!(path = ?path, entries = entries.len(), "Loaded credential file");
        }

        Ok(Self {
            path,
            entries,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let map: HashMap<String, String> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let tmp = self.path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, &map)?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        for (k, v) in entries {
            self.entries.insert((*k).to_string(), (*v).to_string());
        }
        self.save()
    }

    fn remove_entries(&self, keys: &[&str]) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        for k in keys {
            self.entries.remove(*k);
        }
        self.save()
    }
}
