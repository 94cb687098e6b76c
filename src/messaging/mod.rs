pub mod hub;
pub mod protocol;
pub mod router;

pub use hub::BroadcastHub;
pub use protocol::{Notification, Request, UpdateOutcome};
pub use router::{MessageRouter, PendingUpdate, Routed};
