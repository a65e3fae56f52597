//! Sync-specific types: coordinator options, load outcomes, status, and the
//! error events reported to the UI.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    broadcast::BroadcastTransport,
    config::SyncConfig,
    error::SyncError,
    remote::types::RemoteStore,
    storage::MirrorBackend,
    types::{Collection, RecordId},
};

// ============================================================================
// Load Outcome
// ============================================================================

/// How a call to `load_authoritative` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// All three collections were read and applied; the identity is loaded.
    Loaded,
    /// A load for the same identity was already outstanding; nothing was read.
    Deduplicated,
    /// The identity was already loaded and the call was not forced.
    AlreadyLoaded,
    /// At least one collection could not be read. Last-known-good data is
    /// kept (`from_mirror` when it was restored from the durable mirror) and
    /// a background retry is running.
    Degraded { from_mirror: bool },
    /// The identity changed while the load was in flight; results discarded.
    Superseded,
    /// The load hit an authorization failure and the session was ended.
    SignedOut,
    /// Nobody is signed in, or the requested identity is not the active one.
    NoIdentity,
}

// ============================================================================
// Sync Status
// ============================================================================

/// What the UI should show about synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    SignedOut,
    /// First load of a fresh identity; the UI blocks until it settles.
    InitialLoading,
    /// Background refresh over data that is already shown.
    Syncing,
    Idle,
    /// Showing cached or mirrored data while the remote store is unreachable.
    Degraded,
}

impl SyncStatus {
    pub fn is_blocking(&self) -> bool {
        matches!(self, SyncStatus::InitialLoading)
    }
}

// ============================================================================
// Error Events
// ============================================================================

/// Classification of sync errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncErrorKind {
    /// Retriable (network, temporary failures)
    Transient,
    /// Not retriable (validation, unconfirmed delete, missing record)
    Permanent,
    /// Authentication failed; the session was ended
    Auth,
    /// Local storage capacity reached
    Capacity,
}

impl SyncErrorKind {
    pub fn of(err: &SyncError) -> Self {
        match err {
            SyncError::NotAuthenticated
            | SyncError::AuthInProgress
            | SyncError::Authentication(_)
            | SyncError::Unauthorized(_) => SyncErrorKind::Auth,
            SyncError::Remote(_) | SyncError::UpdateNotConfirmed(_) | SyncError::Superseded => {
                SyncErrorKind::Transient
            }
            SyncError::CapacityReached { .. } => SyncErrorKind::Capacity,
            SyncError::Validation(_)
            | SyncError::Rejected(_)
            | SyncError::DeleteUnconfirmed { .. }
            | SyncError::NotFound { .. }
            | SyncError::Storage(_) => SyncErrorKind::Permanent,
        }
    }
}

/// Which operation an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    Load,
    Create,
    Update,
    Delete,
    SignIn,
}

/// A terminal, user-visible failure. Superseded operations never produce one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEvent {
    pub phase: SyncPhase,
    pub collection: Option<Collection>,
    pub id: Option<RecordId>,
    /// Actionable text for an inline notification.
    pub message: String,
    pub kind: SyncErrorKind,
}

impl SyncErrorEvent {
    pub fn new(
        phase: SyncPhase,
        collection: Option<Collection>,
        id: Option<RecordId>,
        err: &SyncError,
    ) -> Self {
        Self {
            phase,
            collection,
            id,
            message: err.user_message(),
            kind: SyncErrorKind::of(err),
        }
    }
}

pub type SyncErrorCallback = Arc<dyn Fn(&SyncErrorEvent) + Send + Sync>;

// ============================================================================
// SyncCoordinator Options
// ============================================================================

/// Configuration for `SyncCoordinator`.
pub struct SyncCoordinatorOptions {
    pub remote: Arc<dyn RemoteStore>,
    /// Backend for the durable mirror (cache backup and session snapshot).
    pub mirror: Arc<dyn MirrorBackend>,
    /// Cross-tab channel. `None` disables cross-tab sync.
    pub transport: Option<Arc<dyn BroadcastTransport>>,
    pub config: SyncConfig,
    /// Called for each terminal, user-visible error
    pub on_error: Option<SyncErrorCallback>,
}

impl SyncCoordinatorOptions {
    pub fn new(remote: Arc<dyn RemoteStore>, mirror: Arc<dyn MirrorBackend>) -> Self {
        Self {
            remote,
            mirror,
            transport: None,
            config: SyncConfig::default(),
            on_error: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_error(mut self, callback: SyncErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}
