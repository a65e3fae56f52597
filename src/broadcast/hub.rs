//! In-process cross-tab channel: every coordinator holding a clone of the hub
//! behaves like a tab of the same origin.

use tokio::sync::broadcast;

use super::transport::{BroadcastError, BroadcastTransport};

const HUB_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct LocalBroadcastHub {
    sender: broadcast::Sender<String>,
}

impl Default for LocalBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }
}

impl BroadcastTransport for LocalBroadcastHub {
    fn post(&self, message: String) -> Result<(), BroadcastError> {
        // No receivers just means no other tab is open.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.sender.subscribe())
    }
}
