//! Cross-tab notifier: typed events over a string transport, tagged with the
//! sending tab so a tab ignores its own messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::transport::BroadcastTransport;

/// Payload exchanged between tabs: `{"kind": "signed-out"}` or
/// `{"kind": "data-changed"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CrossTabEvent {
    SignedOut,
    DataChanged,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(flatten)]
    event: CrossTabEvent,
}

#[derive(Clone)]
pub struct CrossTabNotifier {
    transport: Option<Arc<dyn BroadcastTransport>>,
    tab_id: String,
}

impl CrossTabNotifier {
    pub fn new(transport: Option<Arc<dyn BroadcastTransport>>) -> Self {
        Self {
            transport,
            tab_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// A notifier with no transport: publishing is a no-op.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Post `event` to the other tabs. Failures are logged, never returned.
    pub fn publish(&self, event: CrossTabEvent) {
        let Some(transport) = &self.transport else {
            return;
        };
        let envelope = Envelope {
            origin: Some(self.tab_id.clone()),
            event,
        };
        let message = match serde_json::to_string(&envelope) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("failed to encode cross-tab event: {err}");
                return;
            }
        };
        if let Err(err) = transport.post(message) {
            tracing::warn!(?event, "cross-tab post failed: {err}");
        }
    }

    pub fn subscribe(&self) -> Option<CrossTabSubscription> {
        let receiver = self.transport.as_ref()?.subscribe()?;
        Some(CrossTabSubscription {
            receiver,
            tab_id: self.tab_id.clone(),
        })
    }
}

pub struct CrossTabSubscription {
    receiver: broadcast::Receiver<String>,
    tab_id: String,
}

impl CrossTabSubscription {
    /// Next event sent by another tab. `None` once the transport closes.
    ///
    /// Malformed messages are skipped. If this receiver fell behind, the
    /// missed messages are reported as a single `DataChanged`.
    pub async fn recv(&mut self) -> Option<CrossTabEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(raw) => match serde_json::from_str::<Envelope>(&raw) {
                    Ok(envelope) if envelope.origin.as_deref() == Some(self.tab_id.as_str()) => {
                        continue
                    }
                    Ok(envelope) => return Some(envelope.event),
                    Err(err) => {
                        tracing::warn!("ignoring malformed cross-tab message: {err}");
                        continue;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "cross-tab receiver lagged, forcing reload");
                    return Some(CrossTabEvent::DataChanged);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
