//! Shared focus-state coordinator.
//!
//! One long-lived coordinator owns the canonical [`state::FocusState`] and
//! persists it to a key-value store; any number of UI contexts read and
//! write it through request/response messages and hear about changes
//! through best-effort broadcasts. The coordinator may be torn down between
//! any two messages: the store is the durability boundary, memory is a cache
//! rebuilt at every start.

mod utils;

pub mod client;
pub mod config;
pub mod coordinator;
pub mod messaging;
pub mod state;
pub mod stdio;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use config::CoordinatorConfig;
use coordinator::Coordinator;
use storage::SqliteStore;

pub fn run() -> Result<()> {
    let loaded = CoordinatorConfig::load()?;
    let config = loaded.config;

    // Reads RUST_LOG; the config's debug flag only changes the default.
    let default_filter = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    info!("flowstate starting up...");
    if let Some(reason) = loaded.ignored {
        warn!("Ignoring {reason}; using defaults");
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
    runtime.block_on(async move {
        let kv = SqliteStore::open(config.database_path.clone())?;
        let coordinator = Coordinator::start(Arc::new(kv), &config).await;

        let served = tokio::select! {
            result = stdio::serve_stdio(coordinator.handle()) => result,
            signal = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                signal.context("failed to listen for ctrl-c")
            }
        };

        coordinator.shutdown().await;
        served
    })
}
