use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{KeyValueStore, MemoryStore, StorageError};

/// Memory store that counts writes and can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingStore {
    pub(crate) inner: MemoryStore,
    pub(crate) sets: AtomicUsize,
    pub(crate) reject_sets: AtomicBool,
    pub(crate) fail_reads: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn seeded(entries: Map<String, Value>) -> Self {
        Self {
            inner: MemoryStore::with_entries(entries),
            ..Self::default()
        }
    }

    pub(crate) fn rejecting() -> Self {
        let store = Self::default();
        store.reject_sets.store(true, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl KeyValueStore for RecordingStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk unavailable".into()));
        }
        self.inner.get(keys).await
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StorageError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.reject_sets.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("quota exceeded".into()));
        }
        self.inner.set(entries).await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        self.inner.remove(keys).await
    }
}
