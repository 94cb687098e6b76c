//! Durable [`KeyValueStore`] on SQLite.
//!
//! `rusqlite::Connection` is blocking and not `Sync`, so one worker thread
//! owns it and serves `get`/`set`/`remove` commands in the order they arrive.
//! Dropping the last clone of the store closes the command channel, which
//! ends the worker.

use std::{
    fs,
    path::PathBuf,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use super::{KeyValueStore, StorageError};

/// Bumped whenever `schemas/` gains a file.
const SCHEMA_VERSION: i32 = 1;

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

enum KvCommand {
    Get {
        keys: Option<Vec<String>>,
        reply: Reply<Map<String, Value>>,
    },
    Set {
        entries: Map<String, Value>,
        reply: Reply<()>,
    },
    Remove {
        keys: Vec<String>,
        reply: Reply<()>,
    },
}

struct Worker {
    commands: Option<mpsc::Sender<KvCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Store thread panicked");
            }
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    worker: Arc<Worker>,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("Failed to enable WAL mode: {err}");
        }

        let store = Self::start(conn)?;
        info!("Store opened at {}", path.display());
        Ok(store)
    }

    /// Private, non-durable database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::start(conn)
    }

    fn start(mut conn: Connection) -> Result<Self> {
        prepare_schema(&mut conn)?;

        let (commands, inbox) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("flowstate-store".into())
            .spawn(move || serve(conn, inbox))
            .context("failed to spawn store thread")?;

        Ok(Self {
            worker: Arc::new(Worker {
                commands: Some(commands),
                thread: Some(thread),
            }),
        })
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> KvCommand,
    ) -> Result<T, StorageError> {
        let (reply, response) = oneshot::channel();
        {
            let commands = self.worker.commands.as_ref().ok_or(StorageError::Closed)?;
            commands
                .send(command(reply))
                .map_err(|_| StorageError::Closed)?;
        }
        response.await.map_err(|_| StorageError::Closed)?
    }
}

fn prepare_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read store schema version")?;

    match version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn.transaction()?;
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to create kv table")?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit().context("failed to commit store schema")?;
            Ok(())
        }
        other => bail!("unsupported store schema version {other} (expected {SCHEMA_VERSION})"),
    }
}

fn serve(mut conn: Connection, inbox: mpsc::Receiver<KvCommand>) {
    for command in inbox {
        match command {
            KvCommand::Get { keys, reply } => {
                let _ = reply.send(read_entries(&conn, keys.as_deref()));
            }
            KvCommand::Set { entries, reply } => {
                let _ = reply.send(write_entries(&mut conn, &entries));
            }
            KvCommand::Remove { keys, reply } => {
                let _ = reply.send(delete_keys(&mut conn, &keys));
            }
        }
    }
    info!("Store thread shutting down");
}

fn read_entries(
    conn: &Connection,
    keys: Option<&[String]>,
) -> Result<Map<String, Value>, StorageError> {
    let mut entries = Map::new();
    match keys {
        None => {
            let mut stmt = conn.prepare_cached("SELECT key, value FROM kv")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let raw: String = row.get(1)?;
                let value = decode_value(&key, &raw);
                entries.insert(key, value);
            }
        }
        Some(keys) => {
            let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
            for key in keys {
                let raw: Option<String> = stmt
                    .query_row(params![key], |row| row.get(0))
                    .optional()?;
                if let Some(raw) = raw {
                    entries.insert(key.clone(), decode_value(key, &raw));
                }
            }
        }
    }
    Ok(entries)
}

fn write_entries(conn: &mut Connection, entries: &Map<String, Value>) -> Result<(), StorageError> {
    let updated_at = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )?;
        for (key, value) in entries {
            stmt.execute(params![key, serde_json::to_string(value)?, updated_at])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn delete_keys(conn: &mut Connection, keys: &[String]) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
        for key in keys {
            stmt.execute(params![key])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Damaged rows read as `null`; normalization then replaces them.
fn decode_value(key: &str, raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|err| {
        let corrupt = StorageError::Corrupt {
            key: key.to_string(),
            reason: err.to_string(),
        };
        warn!("{corrupt}; reading it as null");
        Value::Null
    })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>, StorageError> {
        let keys = keys.map(<[String]>::to_vec);
        self.call(|reply| KvCommand::Get { keys, reply }).await
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.call(|reply| KvCommand::Set { entries, reply }).await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.call(|reply| KvCommand::Remove { keys, reply }).await
    }
}
