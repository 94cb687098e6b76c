use std::sync::Arc;

use serde_json::{Map, Value};

use crate::state::{Selector, StateStore};

use super::protocol::{Request, UpdateOutcome, INVALID_PAYLOAD};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

/// Outcome of routing one inbound message.
#[derive(Debug)]
pub enum Routed {
    /// Not a state message; another handler may own it.
    Unhandled,
    /// Answer is ready now.
    Respond(Value),
    /// Answer arrives once the write has been committed; finish with
    /// [`MessageRouter::complete`].
    Pending(PendingUpdate),
}

#[derive(Debug)]
pub struct PendingUpdate {
    payload: Map<String, Value>,
}

impl PendingUpdate {
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

/// Stateless translation between wire messages and the state store.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<StateStore>,
}

impl MessageRouter {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn route(&self, message: &Value) -> Routed {
        let request = match serde_json::from_value::<Request>(message.clone()) {
            Ok(request) => request,
            Err(err) => {
                if is_state_action(message) {
                    log_warn!("Malformed state request {message}: {err}");
                }
                return Routed::Unhandled;
            }
        };

        match request {
            Request::GetState { key, keys } => {
                let selector = match (keys, key) {
                    (Some(keys), _) => Selector::Keys(keys),
                    (None, Some(key)) if !key.is_empty() => Selector::Keys(vec![key]),
                    _ => Selector::All,
                };
                Routed::Respond(self.store.read(&selector))
            }
            Request::UpdateState { payload } => match payload {
                Value::Object(payload) => Routed::Pending(PendingUpdate { payload }),
                _ => Routed::Respond(UpdateOutcome::failed(INVALID_PAYLOAD).to_value()),
            },
        }
    }

    pub async fn complete(&self, pending: PendingUpdate) -> Value {
        let outcome = match self.store.write(&pending.payload).await {
            Ok(_) => UpdateOutcome::ok(),
            Err(err) => {
                log_error!("Update failed: {err:#}");
                UpdateOutcome::failed(format!("{err:#}"))
            }
        };
        outcome.to_value()
    }

    /// Routes and, for updates, waits for the commit. `None` means the
    /// message was not a state request.
    pub async fn handle(&self, message: &Value) -> Option<Value> {
        match self.route(message) {
            Routed::Unhandled => None,
            Routed::Respond(response) => Some(response),
            Routed::Pending(pending) => Some(self.complete(pending).await),
        }
    }
}

fn is_state_action(message: &Value) -> bool {
    matches!(
        message.get("action").and_then(Value::as_str),
        Some("getState" | "updateState")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messaging::BroadcastHub,
        storage::{testing::RecordingStore, MemoryStore},
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;

    async fn router() -> (MessageRouter, Arc<StateStore>) {
        let store = Arc::new(StateStore::new(
            Arc::new(MemoryStore::new()),
            BroadcastHub::new(8),
        ));
        store.initialize().await;
        (MessageRouter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn get_state_shapes() {
        let (router, _store) = router().await;

        let full = router.handle(&json!({"action": "getState"})).await.unwrap();
        assert_eq!(full["interactionLevel"], json!("balanced"));
        assert_eq!(full.as_object().unwrap().len(), 11);

        let one = router
            .handle(&json!({"action": "getState", "key": "isInFlow"}))
            .await
            .unwrap();
        assert_eq!(one, json!({"isInFlow": false}));

        let many = router
            .handle(&json!({"action": "getState", "keys": ["isEnabled", "ghost"]}))
            .await
            .unwrap();
        assert_eq!(many, json!({"isEnabled": true}));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected_without_writing() {
        let (router, store) = router().await;
        let before = store.snapshot();

        for message in [
            json!({"action": "updateState"}),
            json!({"action": "updateState", "payload": null}),
            json!({"action": "updateState", "payload": "isEnabled=false"}),
            json!({"action": "updateState", "payload": [1, 2]}),
        ] {
            let response = router.handle(&message).await.unwrap();
            assert_eq!(response, json!({"success": false, "error": "Invalid payload"}));
        }
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn update_reports_success_after_commit() {
        let (router, store) = router().await;
        let routed = router.route(&json!({
            "action": "updateState",
            "payload": {"currentTask": "plan", "isInFlow": true}
        }));
        let Routed::Pending(pending) = routed else {
            panic!("update should be deferred");
        };
        assert_eq!(pending.payload().len(), 2);

        let response = router.complete(pending).await;
        assert_eq!(response, json!({"success": true}));
        assert!(store.snapshot().is_in_flow);
    }

    #[tokio::test]
    async fn failed_write_is_reported_to_the_caller() {
        let kv = Arc::new(RecordingStore::default());
        let store = Arc::new(StateStore::new(kv.clone(), BroadcastHub::new(8)));
        store.initialize().await;
        let router = MessageRouter::new(store.clone());
        let before = store.snapshot();

        kv.reject_sets.store(true, Ordering::SeqCst);
        let response = router
            .handle(&json!({"action": "updateState", "payload": {"currentTask": "refactor"}}))
            .await
            .unwrap();

        assert_eq!(response["success"], json!(false));
        let error = response["error"].as_str().unwrap();
        assert!(error.contains("quota exceeded"), "unexpected error: {error}");
        assert_eq!(store.snapshot(), before);
        assert_eq!(
            store.read(&Selector::Key("currentTask".into())),
            json!("")
        );
    }

    #[tokio::test]
    async fn foreign_messages_are_unhandled() {
        let (router, _store) = router().await;
        assert!(router.handle(&json!({"action": "closeTab"})).await.is_none());
        assert!(router.handle(&json!("getState")).await.is_none());
    }

    #[tokio::test]
    async fn mistyped_selectors_still_get_an_answer() {
        let (router, _store) = router().await;

        let full = router
            .handle(&json!({"action": "getState", "keys": "isEnabled"}))
            .await
            .unwrap();
        assert_eq!(full.as_object().unwrap().len(), 11);

        let by_key = router
            .handle(&json!({"action": "getState", "keys": 5, "key": "isEnabled"}))
            .await
            .unwrap();
        assert_eq!(by_key, json!({"isEnabled": true}));

        let filtered = router
            .handle(&json!({"action": "getState", "keys": ["isInFlow", 1, false]}))
            .await
            .unwrap();
        assert_eq!(filtered, json!({"isInFlow": false}));

        let full = router
            .handle(&json!({"action": "getState", "key": ["isEnabled"]}))
            .await
            .unwrap();
        assert_eq!(full.as_object().unwrap().len(), 11);
    }
}
