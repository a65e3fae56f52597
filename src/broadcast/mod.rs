pub mod hub;
pub mod notifier;
pub mod transport;

pub use hub::LocalBroadcastHub;
pub use notifier::{CrossTabEvent, CrossTabNotifier, CrossTabSubscription};
pub use transport::{BroadcastError, BroadcastTransport};
