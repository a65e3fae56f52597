pub mod coordinator;
mod journal;
mod state;
pub mod types;

pub use coordinator::SyncCoordinator;
pub use types::{
    LoadOutcome, SyncCoordinatorOptions, SyncErrorCallback, SyncErrorEvent, SyncErrorKind,
    SyncPhase, SyncStatus,
};
