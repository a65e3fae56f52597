//! Remote store types: the backend trait, auth/session data, and the error
//! taxonomy every remote call reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Collection, OwnerId, Record, RecordId};

// ============================================================================
// RemoteStore: hosted backend (auth + row storage)
// ============================================================================

/// Request/response interface to the authoritative backend.
///
/// Every collection call carries an explicit owner filter; implementations
/// must never return or touch rows belonging to another owner.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Exchange credentials for a session.
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, RemoteError>;

    /// End the server-side session. Callers treat this as fire-and-forget.
    async fn sign_out(&self, session: &Session) -> Result<(), RemoteError>;

    /// Exchange a refresh token for a new session.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError>;

    /// Session the credential store currently holds, if any.
    async fn current_session(&self) -> Result<Option<Session>, RemoteError>;

    /// Subscribe to auth events. Each call returns an independent receiver.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn select(
        &self,
        collection: Collection,
        owner: &OwnerId,
    ) -> Result<Vec<Record>, RemoteError>;

    /// Insert a record. Returns the row as stored (server-normalized).
    async fn insert(&self, collection: Collection, record: &Record) -> Result<Record, RemoteError>;

    /// Full replacement of the row matching `match_id` and the record's owner.
    async fn update(
        &self,
        collection: Collection,
        record: &Record,
        match_id: &RecordId,
    ) -> Result<(), RemoteError>;

    /// Delete the row matching `(match_id, owner)`. Returns affected row count.
    async fn delete(
        &self,
        collection: Collection,
        match_id: &RecordId,
        owner: &OwnerId,
    ) -> Result<u64, RemoteError>;
}

// ============================================================================
// Auth data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: OwnerId,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: OwnerId::new(id),
            email: email.into(),
        }
    }
}

/// Identity plus the access/refresh credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Notification pushed by the backend's auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    IdentityUpdated(Session),
}

// ============================================================================
// RemoteError
// ============================================================================

/// How a remote failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Connection failure; retried.
    Network,
    /// No response within the call deadline; retried.
    Timeout,
    /// Stale or invalid access credential; forces re-authentication.
    Unauthorized,
    /// The refresh credential itself was rejected; ends the session.
    InvalidRefreshToken,
    /// Wrong email or password.
    InvalidCredentials,
    /// Account exists but is not verified.
    Unverified,
    /// Malformed record; surfaced unmodified, never retried.
    Validation,
    NotFound,
}

/// Error reported by a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn new(message: impl Into<String>, kind: RemoteErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message, RemoteErrorKind::Network)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, RemoteErrorKind::Timeout)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(message, RemoteErrorKind::Unauthorized)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, RemoteErrorKind::Validation)
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Network | RemoteErrorKind::Timeout)
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Unauthorized | RemoteErrorKind::InvalidRefreshToken
        )
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}
