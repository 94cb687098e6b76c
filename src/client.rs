//! UI-context side of the state protocol.
//!
//! A UI context cannot assume the coordinator is alive: it may be suspended,
//! restarting, or simply slow. Every call therefore tries the coordinator
//! first and, when no usable answer arrives in time, goes to the shared store
//! directly using the same normalization rules.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::{sync::broadcast, time};
use uuid::Uuid;

use crate::{
    coordinator::CoordinatorHandle,
    messaging::{Notification, Request, UpdateOutcome},
    state::{apply_update, normalize_hostname, reconcile_persisted, StateField},
    storage::KeyValueStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    pub fn new() -> Self {
        Self(format!("ctx_{}", Uuid::new_v4()))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a [`StateClient::get_state`] call asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateQuery {
    All,
    Key(String),
    Keys(Vec<String>),
}

impl StateQuery {
    fn to_request(&self) -> Request {
        match self {
            StateQuery::All => Request::get_all(),
            StateQuery::Key(key) => Request::get_key(key.clone()),
            StateQuery::Keys(keys) => Request::get_keys(keys.clone()),
        }
    }

    fn store_keys(&self) -> Option<Vec<String>> {
        match self {
            StateQuery::All => None,
            StateQuery::Key(key) => Some(vec![key.clone()]),
            StateQuery::Keys(keys) => Some(keys.clone()),
        }
    }
}

/// The two user-editable hostname lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteList {
    Distracting,
    DeepWorkBlocked,
}

impl SiteList {
    pub fn field(self) -> StateField {
        match self {
            SiteList::Distracting => StateField::DistractingSites,
            SiteList::DeepWorkBlocked => StateField::DeepWorkBlockedSites,
        }
    }
}

pub struct StateClient {
    id: ContextId,
    coordinator: Option<CoordinatorHandle>,
    kv: Arc<dyn KeyValueStore>,
    timeout: Duration,
}

impl StateClient {
    pub fn new(
        coordinator: Option<CoordinatorHandle>,
        kv: Arc<dyn KeyValueStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: ContextId::new(),
            coordinator,
            kv,
            timeout,
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Change notifications, while a coordinator is attached. Missed
    /// notifications are never replayed; read state to catch up.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Notification>> {
        self.coordinator.as_ref().map(CoordinatorHandle::subscribe)
    }

    /// Points the client at a (re)started coordinator.
    pub fn attach(&mut self, coordinator: CoordinatorHandle) {
        self.coordinator = Some(coordinator);
    }

    pub async fn get_state(&self, query: StateQuery) -> Result<Map<String, Value>> {
        if let Some(Value::Object(state)) = self.ask(query.to_request()).await {
            return Ok(state);
        }

        log_warn!("[{}] getState unanswered; reading store directly", self.id);
        let keys = query.store_keys();
        self.kv
            .get(keys.as_deref())
            .await
            .context("fallback state read failed")
    }

    /// `false` only for a payload that is not an object; otherwise the update
    /// lands either through the coordinator or directly in the store.
    pub async fn update_state(&self, payload: Value) -> Result<bool> {
        let Value::Object(payload) = payload else {
            return Ok(false);
        };

        let response = self.ask(Request::update(payload.clone())).await;
        let accepted = response
            .and_then(|value| serde_json::from_value::<UpdateOutcome>(value).ok())
            .map(|outcome| outcome.success)
            .unwrap_or(false);
        if accepted {
            return Ok(true);
        }

        log_warn!("[{}] updateState not confirmed; writing store directly", self.id);
        self.write_directly(&payload).await?;
        Ok(true)
    }

    /// Current entries of `list`; an absent or mistyped list reads as empty.
    pub async fn sites(&self, list: SiteList) -> Result<Vec<String>> {
        let key = list.field().key();
        let state = self.get_state(StateQuery::Key(key.to_string())).await?;
        let sites = match state.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Ok(sites)
    }

    /// Adds a hostname typed by the user. Returns the resulting list, or
    /// `None` when `input` is not a usable hostname. Adding a site that is
    /// already listed changes nothing.
    pub async fn add_site(&self, list: SiteList, input: &str) -> Result<Option<Vec<String>>> {
        let Some(site) = normalize_hostname(input) else {
            log_info!("[{}] Ignoring invalid hostname {input:?}", self.id);
            return Ok(None);
        };

        let mut sites = self.sites(list).await?;
        if !sites.contains(&site) {
            sites.push(site);
            self.replace_sites(list, &sites).await?;
        }
        Ok(Some(sites))
    }

    /// Removes every entry equal to `site` and returns the resulting list.
    pub async fn remove_site(&self, list: SiteList, site: &str) -> Result<Vec<String>> {
        let mut sites = self.sites(list).await?;
        let before = sites.len();
        sites.retain(|entry| entry != site);
        if sites.len() != before {
            self.replace_sites(list, &sites).await?;
        }
        Ok(sites)
    }

    async fn replace_sites(&self, list: SiteList, sites: &[String]) -> Result<()> {
        let mut payload = Map::new();
        payload.insert(list.field().key().to_string(), Value::from(sites.to_vec()));
        self.update_state(Value::Object(payload)).await?;
        Ok(())
    }

    async fn ask(&self, request: Request) -> Option<Value> {
        let coordinator = self.coordinator.as_ref()?;
        match time::timeout(self.timeout, coordinator.request(request.to_value())).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                log_info!("[{}] coordinator unavailable: {err}", self.id);
                None
            }
            Err(_) => {
                log_info!("[{}] coordinator timed out after {:?}", self.id, self.timeout);
                None
            }
        }
    }

    /// Same pipeline as a coordinator write, run against the persisted
    /// record. Only changed schema fields are stored.
    async fn write_directly(&self, payload: &Map<String, Value>) -> Result<()> {
        let persisted = self
            .kv
            .get(None)
            .await
            .context("fallback read before write failed")?;
        let current = reconcile_persisted(&persisted).state;
        let next = apply_update(&current, payload);

        let changed: Vec<StateField> = current.changed_fields(&next);
        if changed.is_empty() {
            return Ok(());
        }

        self.kv
            .set(next.project(&changed))
            .await
            .context("fallback state write failed")
    }
}
