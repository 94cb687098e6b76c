use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::{
    messaging::{BroadcastHub, Notification},
    storage::KeyValueStore,
};

use super::{
    reconcile::{apply_update, reconcile_persisted, Reconciliation},
    schema::{FocusState, StateField},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Which part of the state a read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    /// Bare value of one field (`null` for names outside the schema).
    Key(String),
    /// Mapping restricted to the named fields that exist in the schema.
    Keys(Vec<String>),
}

/// Fields a committed write changed, with their new values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    fields: Vec<StateField>,
    values: Map<String, Value>,
}

impl StateDelta {
    fn between(next: &FocusState, fields: Vec<StateField>) -> Self {
        let values = next.project(&fields);
        Self { fields, values }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }
}

/// Owner of the canonical state.
///
/// Reads are served from memory and never wait on storage. Writes are
/// serialized by `write_gate` in arrival order; a write reaches memory only
/// after its delta has been persisted, so a failed persist leaves both the
/// store and memory at the previous state.
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
    hub: BroadcastHub,
    state: RwLock<FocusState>,
    write_gate: Mutex<()>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, hub: BroadcastHub) -> Self {
        Self {
            kv,
            hub,
            state: RwLock::new(FocusState::default()),
            write_gate: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Rebuilds the canonical state from storage and returns a copy.
    pub async fn initialize(&self) -> FocusState {
        self.bootstrap().await.state
    }

    /// Loads the persisted record, drops keys outside the schema, normalizes
    /// the rest against defaults and writes the full result back.
    ///
    /// An unreadable store leaves the defaults in memory. Failures after the
    /// read are logged and the reconciled state is kept in memory anyway.
    pub async fn bootstrap(&self) -> Reconciliation {
        let _gate = self.write_gate.lock().await;

        let persisted = match self.kv.get(None).await {
            Ok(entries) => entries,
            Err(err) => {
                log_error!("Failed to read persisted state, using defaults: {err}");
                let state = FocusState::default();
                *self.state_mut() = state.clone();
                return Reconciliation {
                    state,
                    discarded_keys: Vec::new(),
                    fresh: false,
                };
            }
        };

        let reconciliation = reconcile_persisted(&persisted);

        if !reconciliation.discarded_keys.is_empty() {
            log_info!(
                "Discarding deprecated keys: {:?}",
                reconciliation.discarded_keys
            );
            if let Err(err) = self.kv.remove(&reconciliation.discarded_keys).await {
                log_warn!("Failed to remove deprecated keys: {err}");
            }
        }

        *self.state_mut() = reconciliation.state.clone();

        if let Err(err) = self.kv.set(reconciliation.state.to_map()).await {
            log_error!("Failed to persist reconciled state: {err}");
        }

        log_info!(
            "State initialized (fresh: {}): {:?}",
            reconciliation.fresh,
            reconciliation.state
        );
        reconciliation
    }

    /// Independent copy of the whole state.
    pub fn snapshot(&self) -> FocusState {
        self.state_ref().clone()
    }

    pub fn read(&self, selector: &Selector) -> Value {
        let state = self.state_ref();
        match selector {
            Selector::All => Value::Object(state.to_map()),
            Selector::Key(key) => StateField::from_key(key)
                .map(|field| state.get(field))
                .unwrap_or(Value::Null),
            Selector::Keys(keys) => {
                let fields: Vec<StateField> =
                    keys.iter().filter_map(|key| StateField::from_key(key)).collect();
                Value::Object(state.project(&fields))
            }
        }
    }

    /// Applies a partial update. Each present field is normalized against its
    /// current value, invariants are enforced, and only fields that end up
    /// different are persisted and broadcast. An update that changes nothing
    /// touches neither storage nor listeners.
    pub async fn write(&self, update: &Map<String, Value>) -> Result<StateDelta> {
        let _gate = self.write_gate.lock().await;

        let current = self.snapshot();
        let next = apply_update(&current, update);
        let changed = current.changed_fields(&next);
        if changed.is_empty() {
            return Ok(StateDelta::default());
        }

        let delta = StateDelta::between(&next, changed);

        if let Err(err) = self.kv.set(delta.values().clone()).await {
            log_error!("Failed to persist state delta: {err}");
            return Err(err).context("failed to persist state delta");
        }

        *self.state_mut() = next;
        log_info!(
            "Committed delta: {:?}",
            delta.fields().iter().map(|f| f.key()).collect::<Vec<_>>()
        );

        self.hub
            .notify(Notification::state_updated(delta.values().clone()));

        Ok(delta)
    }

    fn state_ref(&self) -> RwLockReadGuard<'_, FocusState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, FocusState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::{state::InteractionLevel, storage::testing::RecordingStore};

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn ready_store(seed: Value) -> (StateStore, Arc<RecordingStore>) {
        let kv = Arc::new(RecordingStore::seeded(map(seed)));
        let store = StateStore::new(kv.clone(), BroadcastHub::new(8));
        store.initialize().await;
        kv.sets.store(0, Ordering::SeqCst);
        (store, kv)
    }

    #[tokio::test]
    async fn empty_and_unchanged_writes_are_free() {
        let (store, kv) = ready_store(json!({})).await;
        let mut rx = store.hub().subscribe();

        assert!(store.write(&Map::new()).await.unwrap().is_empty());
        let current = store.snapshot().is_enabled;
        assert!(store
            .write(&map(json!({"isEnabled": current})))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(kv.sets.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_enum_leaves_field_out_of_delta() {
        let (store, _kv) = ready_store(json!({"interactionLevel": "minimal"})).await;
        let delta = store
            .write(&map(json!({"interactionLevel": "extreme", "isEnabled": false})))
            .await
            .unwrap();

        assert_eq!(delta.fields(), &[StateField::IsEnabled]);
        assert_eq!(store.snapshot().interaction_level, InteractionLevel::Minimal);
    }

    #[tokio::test]
    async fn clearing_task_cascades_into_delta() {
        let (store, kv) = ready_store(json!({
            "currentTask": "write spec",
            "isInFlow": true,
            "reminderStartTime": 1000
        }))
        .await;
        let mut rx = store.hub().subscribe();

        let delta = store.write(&map(json!({"currentTask": ""}))).await.unwrap();

        assert_eq!(
            Value::Object(delta.values().clone()),
            json!({"currentTask": "", "isInFlow": false, "reminderStartTime": null})
        );
        let state = store.snapshot();
        assert!(!state.is_in_flow);
        assert_eq!(state.reminder_start_time, None);
        assert_eq!(state.reminder_interval, None);
        assert_eq!(state.reminder_expected_end_time, None);

        let persisted = kv.inner.snapshot();
        assert_eq!(persisted.get("isInFlow"), Some(&json!(false)));
        assert_eq!(persisted.get("reminderStartTime"), Some(&Value::Null));

        let Notification::StateUpdated { state } = rx.recv().await.unwrap();
        assert_eq!(state, delta.into_values());
    }

    #[tokio::test]
    async fn site_lists_are_trimmed_in_order() {
        let (store, _kv) = ready_store(json!({})).await;
        store
            .write(&map(json!({"distractingSites": ["  X.com ", "", 5, "Y.com"]})))
            .await
            .unwrap();
        assert_eq!(
            store.read(&Selector::Key("distractingSites".into())),
            json!(["X.com", "Y.com"])
        );
    }

    #[tokio::test]
    async fn bootstrap_drops_unknown_keys_from_storage() {
        let (store, kv) = ready_store(json!({
            "legacyFlag": true,
            "isEnabled": false,
            "currentTask": "inbox zero"
        }))
        .await;

        let persisted = kv.inner.snapshot();
        assert!(!persisted.contains_key("legacyFlag"));
        assert_eq!(persisted.len(), StateField::ALL.len());

        let full = store.read(&Selector::All);
        let keys: Vec<&String> = full.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), StateField::ALL.len());
        assert_eq!(full["currentTask"], json!("inbox zero"));
        assert_eq!(full["isEnabled"], json!(false));
    }

    #[tokio::test]
    async fn unreadable_store_boots_with_defaults() {
        let kv = Arc::new(RecordingStore::default());
        kv.fail_reads.store(true, Ordering::SeqCst);
        let store = StateStore::new(kv, BroadcastHub::new(8));

        let boot = store.bootstrap().await;
        assert_eq!(boot.state, FocusState::default());
        assert!(!boot.fresh);
    }

    #[tokio::test]
    async fn rejected_persist_keeps_previous_state() {
        let (store, kv) = ready_store(json!({"currentTask": "a"})).await;
        let mut rx = store.hub().subscribe();
        kv.reject_sets.store(true, Ordering::SeqCst);

        let result = store.write(&map(json!({"currentTask": "b"}))).await;
        assert!(result.is_err());
        assert_eq!(store.snapshot().current_task, "a");
        assert_eq!(kv.inner.snapshot().get("currentTask"), Some(&json!("a")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reads_are_isolated_copies() {
        let (store, _kv) = ready_store(json!({})).await;

        let mut copy = store.snapshot();
        copy.distracting_sites.clear();
        copy.is_enabled = false;

        let mut value = store.read(&Selector::All);
        value["isEnabled"] = json!(false);

        let fresh = store.snapshot();
        assert!(fresh.is_enabled);
        assert!(!fresh.distracting_sites.is_empty());
    }

    #[tokio::test]
    async fn selectors() {
        let (store, _kv) = ready_store(json!({"currentTask": "t"})).await;
        assert_eq!(store.read(&Selector::Key("currentTask".into())), json!("t"));
        assert_eq!(store.read(&Selector::Key("nope".into())), Value::Null);
        assert_eq!(
            store.read(&Selector::Keys(vec!["isInFlow".into(), "nope".into()])),
            json!({"isInFlow": false})
        );
    }

    #[tokio::test]
    async fn initialize_twice_is_stable() {
        let (store, _kv) = ready_store(json!({"interactionLevel": "max"})).await;
        let first = store.snapshot();
        let second = store.initialize().await;
        assert_eq!(first, second);
    }
}
