use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{KeyValueStore, StorageError};

/// In-process store. Clones share the same map, so a coordinator and a UI
/// context built from clones observe each other's writes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Map<String, Value>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>, StorageError> {
        let guard = self.read();
        let result = match keys {
            None => guard.clone(),
            Some(keys) => keys
                .iter()
                .filter_map(|key| guard.get(key).map(|value| (key.clone(), value.clone())))
                .collect(),
        };
        Ok(result)
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StorageError> {
        self.write().extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut guard = self.write();
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }
}
