//! Persistent event sequence numbers.
//!
//! Each published event carries a `gseindex` that increases across process
//! restarts. The store is best effort: when it fails, numbering restarts
//! rather than blocking delivery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use crate::error::SequenceError;

/// Key the event index is stored under.
pub const SEQUENCE_KEY: &str = "gseindex";

/// String key/value persistence.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SequenceError`] if the backing storage cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, SequenceError>;

    /// # Errors
    ///
    /// Returns [`SequenceError`] if the value could not be persisted.
    async fn set(&self, key: &str, value: &str) -> Result<(), SequenceError>;
}

/// Store backed by a JSON object file, rewritten atomically on every set.
#[derive(Debug)]
pub struct FileSequenceStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<BTreeMap<String, String>>,
}

impl FileSequenceStore {
    /// Open `path`, creating parent directories. A missing or empty file
    /// starts an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::Io`] if the file exists but cannot be read,
    /// and [`SequenceError::Corrupt`] if it is not a JSON string map.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SequenceError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SequenceError::io(parent, &e))?;
        }

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SequenceError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(SequenceError::io(&path, &e)),
        };

        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SequenceError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SequenceError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_owned(), value.to_owned());

        let bytes = serde_json::to_vec_pretty(&*entries).map_err(|e| SequenceError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| SequenceError::io(&staging, &e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| SequenceError::io(&self.path, &e))
    }
}

/// Volatile store; numbering restarts with the process.
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    entries: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SequenceError> {
        Ok(match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SequenceError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.insert(key.to_owned(), value.to_owned()),
            Err(poisoned) => poisoned
                .into_inner()
                .insert(key.to_owned(), value.to_owned()),
        };
        Ok(())
    }
}

/// Hands out increasing numbers backed by a [`SequenceStore`].
///
/// Increments are serialized, so concurrent callers never share a number
/// while the store is healthy.
pub struct SequenceCounter {
    store: Arc<dyn SequenceStore>,
    key: String,
    lock: tokio::sync::Mutex<()>,
}

impl SequenceCounter {
    pub fn new(store: Arc<dyn SequenceStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Increment and return the next number, starting at 1.
    ///
    /// An unreadable or unparsable stored value counts as 0. A failed write
    /// is logged and the number is still returned.
    pub async fn next(&self) -> u64 {
        let _guard = self.lock.lock().await;

        let current = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
                warn!(key = %self.key, value = %raw, error = %e, "stored sequence unparsable, restarting");
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                warn!(key = %self.key, error = %e, "sequence read failed, restarting");
                0
            }
        };

        let next = current.saturating_add(1);
        if let Err(e) = self.store.set(&self.key, &next.to_string()).await {
            warn!(key = %self.key, error = %e, "sequence not persisted");
        }
        next
    }
}

impl std::fmt::Debug for SequenceCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceCounter")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_counter_starts_at_one_and_increments() {
        let store = Arc::new(MemorySequenceStore::default());
        let counter = SequenceCounter::new(store.clone(), SEQUENCE_KEY);

        assert_eq!(counter.next().await, 1);
        assert_eq!(counter.next().await, 2);
        assert_eq!(
            store.get(SEQUENCE_KEY).await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_garbage_value_restarts_numbering() {
        let store = Arc::new(MemorySequenceStore::default());
        store.set(SEQUENCE_KEY, "not-a-number").await.unwrap();
        let counter = SequenceCounter::new(store, SEQUENCE_KEY);

        assert_eq!(counter.next().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_numbers() {
        let counter = Arc::new(SequenceCounter::new(
            Arc::new(MemorySequenceStore::default()),
            SEQUENCE_KEY,
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move { counter.next().await })
            })
            .collect();
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();

        assert_eq!(seen, (1..=16).collect::<Vec<u64>>());
    }
}
