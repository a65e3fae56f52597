//! FinanceFlow sync core: keeps a per-tab cache of transactions, budget
//! goals and recurring templates consistent with the hosted backend.

pub mod analytics;
pub mod broadcast;
pub mod capacity;
pub mod collection;
pub mod config;
pub mod error;
pub mod remote;
pub mod resilience;
pub mod session;
pub mod storage;
pub mod sync;
pub mod types;

pub use broadcast::{BroadcastTransport, CrossTabEvent, LocalBroadcastHub};
pub use capacity::{CapacityEdge, CapacityGuard, CapacityStatus};
pub use config::{ConfigError, SyncConfig};
pub use error::{Result, StorageError, SyncError, ValidationError};
pub use remote::{
    AuthEvent, Credentials, Identity, RemoteError, RemoteErrorKind, RemoteStore, Session,
};
pub use session::{SessionState, SessionTransition, SignOutReason};
pub use storage::{LocalCache, MemoryMirror, MirrorBackend};
pub use sync::{
    LoadOutcome, SyncCoordinator, SyncCoordinatorOptions, SyncErrorEvent, SyncErrorKind,
    SyncPhase, SyncStatus,
};
pub use types::{
    Account, BudgetGoal, CacheSnapshot, CalendarDate, Collection, EntryType, Frequency, OwnerId,
    Record, RecordId, RecurringTemplate, Transaction,
};
