//! Persistent key-value store boundary.
//!
//! The state engine only ever talks to [`KeyValueStore`]: an unordered
//! mapping from string keys to JSON values with no cross-key atomicity
//! guarantee. [`SqliteStore`] is the durable backend used by the binary,
//! [`MemoryStore`] backs tests and same-process contexts.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend has shut down and accepts no more work.
    #[error("storage backend is closed")]
    Closed,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `None` reads every entry; `Some(keys)` reads only the keys present.
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>, StorageError>;

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StorageError>;

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError>;
}
