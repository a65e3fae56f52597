use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("cross-tab channel unavailable: {0}")]
    Unavailable(String),
}

/// Origin-scoped message channel shared by every tab of the application.
///
/// Delivery is unordered, at-most-once and best-effort. A transport may not
/// deliver a tab's own messages back to it, but receivers must tolerate it.
pub trait BroadcastTransport: Send + Sync {
    fn post(&self, message: String) -> Result<(), BroadcastError>;

    /// `None` when this environment has no cross-tab channel.
    fn subscribe(&self) -> Option<broadcast::Receiver<String>>;
}
