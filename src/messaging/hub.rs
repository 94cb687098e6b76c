use log::debug;
use tokio::sync::broadcast;

use super::protocol::Notification;

/// Fire-and-forget fan-out to every attached context.
///
/// A send with nobody listening is dropped on the floor, and a receiver that
/// lags past the buffer loses the oldest notifications. Neither case is
/// reported to the sender: contexts recover by reading state explicitly.
#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            debug!("No listeners attached; notification dropped");
        }
    }
}
