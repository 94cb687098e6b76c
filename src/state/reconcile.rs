//! Assembly of candidate states from untrusted mappings.
//!
//! Two entry points share the normalize → enforce pipeline:
//! [`reconcile_persisted`] rebuilds a whole state from whatever the store
//! holds (fallbacks are schema defaults), [`apply_update`] overlays a partial
//! update onto a live state (fallbacks are the live values).

use serde_json::{Map, Value};

use super::{
    invariants::enforce_invariants,
    schema::{default_deepwork_blocked_sites, default_distracting_sites, FocusState, StateField},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: FocusState,
    /// Persisted keys that are not part of the schema.
    pub discarded_keys: Vec<String>,
    /// True when the store held none of the schema's keys.
    pub fresh: bool,
}

pub fn reconcile_persisted(persisted: &Map<String, Value>) -> Reconciliation {
    let defaults = FocusState::default();
    let mut state = defaults.clone();

    for field in StateField::ALL {
        let candidate = persisted.get(field.key()).unwrap_or(&Value::Null);
        state.assign(field, candidate, &defaults);
    }

    let discarded_keys: Vec<String> = persisted
        .keys()
        .filter(|key| !StateField::is_known(key))
        .cloned()
        .collect();
    let fresh = persisted.keys().all(|key| !StateField::is_known(key));

    Reconciliation {
        state: enforce_invariants(state),
        discarded_keys,
        fresh,
    }
}

/// Next state after overlaying `update` onto `current`. Keys outside the
/// schema are ignored; malformed values leave their field unchanged.
pub fn apply_update(current: &FocusState, update: &Map<String, Value>) -> FocusState {
    let mut next = current.clone();
    for (key, candidate) in update {
        if let Some(field) = StateField::from_key(key) {
            next.assign(field, candidate, current);
        }
    }
    enforce_invariants(next)
}

/// Settings written on the very first start of a new installation.
pub fn install_defaults() -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert(StateField::IsEnabled.key().into(), Value::Bool(true));
    defaults.insert(StateField::BlockDistractions.key().into(), Value::Bool(true));
    defaults.insert(StateField::BreakReminderEnabled.key().into(), Value::Bool(false));
    defaults.insert(
        StateField::DistractingSites.key().into(),
        Value::from(default_distracting_sites()),
    );
    defaults.insert(
        StateField::DeepWorkBlockedSites.key().into(),
        Value::from(default_deepwork_blocked_sites()),
    );
    defaults
}
