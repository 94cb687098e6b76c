pub mod invariants;
pub mod normalize;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use invariants::enforce_invariants;
pub use normalize::normalize_hostname;
pub use reconcile::{apply_update, install_defaults, reconcile_persisted, Reconciliation};
pub use schema::{FocusState, InteractionLevel, StateField};
pub use store::{Selector, StateDelta, StateStore};
