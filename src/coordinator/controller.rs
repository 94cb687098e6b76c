use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::CoordinatorConfig,
    messaging::{
        BroadcastHub, MessageRouter, Notification, PendingUpdate, Routed, UpdateOutcome,
    },
    state::{install_defaults, Reconciliation, StateStore},
    storage::KeyValueStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const WRITE_QUEUE_FULL: &str = "Too many pending updates";

type Reply = oneshot::Sender<Option<Value>>;

struct Envelope {
    message: Value,
    reply: Reply,
}

/// Cheap, cloneable access to a running coordinator. Every method keeps
/// working after the coordinator is gone; requests then fail instead of
/// hanging.
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: mpsc::Sender<Envelope>,
    hub: BroadcastHub,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    /// Sends one message and waits for its answer. `Ok(None)` means the
    /// coordinator does not handle that kind of message.
    pub async fn request(&self, message: Value) -> Result<Option<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Envelope {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("coordinator is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("coordinator stopped before answering"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.hub.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.requests.is_closed()
    }

    /// Tears the coordinator down. Queued requests are dropped unanswered.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// The long-lived background context: owns the state store and answers
/// requests from every other context until shut down.
pub struct Coordinator {
    handle: CoordinatorHandle,
    store: Arc<StateStore>,
    boot: Reconciliation,
    tasks: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Bootstraps state from `kv` and starts serving requests. A store with
    /// no known keys is treated as a fresh install and seeded with the
    /// install defaults. Storage failures during start-up are logged and the
    /// coordinator serves whatever state it has in memory.
    pub async fn start(kv: Arc<dyn KeyValueStore>, config: &CoordinatorConfig) -> Self {
        let hub = BroadcastHub::new(config.broadcast_capacity);
        let store = Arc::new(StateStore::new(kv, hub.clone()));

        let boot = store.bootstrap().await;
        if boot.fresh {
            match store.write(&install_defaults()).await {
                Ok(_) => log_info!("Install defaults applied"),
                Err(err) => log_error!("Failed to apply install defaults: {err:#}"),
            }
        }

        let router = MessageRouter::new(store.clone());
        let cancel_token = CancellationToken::new();
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity.max(1));
        let (write_tx, write_rx) = mpsc::channel(config.request_queue_capacity.max(1));

        let tasks = vec![
            tokio::spawn(request_loop(
                router.clone(),
                request_rx,
                write_tx,
                cancel_token.clone(),
            )),
            tokio::spawn(write_loop(router, write_rx, cancel_token.clone())),
        ];

        log_info!("Coordinator started");

        Self {
            handle: CoordinatorHandle {
                requests: request_tx,
                hub,
                cancel_token,
            },
            store,
            boot,
            tasks,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// What bootstrap found in storage.
    pub fn boot(&self) -> &Reconciliation {
        &self.boot
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        for task in self.tasks {
            if let Err(err) = task.await {
                log_error!("Coordinator task failed to join: {err}");
            }
        }
        log_info!("Coordinator stopped");
    }
}

/// Answers reads inline and hands updates to the writer in arrival order.
/// When the writer is backed up, updates are refused instead of holding up
/// the reads queued behind them.
async fn request_loop(
    router: MessageRouter,
    mut requests: mpsc::Receiver<Envelope>,
    writes: mpsc::Sender<(PendingUpdate, Reply)>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            envelope = requests.recv() => {
                let Some(Envelope { message, reply }) = envelope else {
                    break;
                };
                match router.route(&message) {
                    Routed::Unhandled => {
                        let _ = reply.send(None);
                    }
                    Routed::Respond(response) => {
                        let _ = reply.send(Some(response));
                    }
                    Routed::Pending(pending) => match writes.try_send((pending, reply)) {
                        Ok(()) => {}
                        Err(TrySendError::Full((_, reply))) => {
                            log_warn!("Write queue full; refusing update");
                            let outcome = UpdateOutcome::failed(WRITE_QUEUE_FULL);
                            let _ = reply.send(Some(outcome.to_value()));
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                }
            }
        }
    }
}

/// Commits updates one at a time; an update that has started always runs
/// to completion even if shutdown is requested meanwhile.
async fn write_loop(
    router: MessageRouter,
    mut writes: mpsc::Receiver<(PendingUpdate, Reply)>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            item = writes.recv() => {
                let Some((pending, reply)) = item else {
                    break;
                };
                let response = router.complete(pending).await;
                let _ = reply.send(Some(response));
            }
        }
    }
}
