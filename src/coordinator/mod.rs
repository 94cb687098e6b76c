pub mod controller;

pub use controller::{Coordinator, CoordinatorHandle};
