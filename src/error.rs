use rust_decimal::Decimal;
use thiserror::Error;

use crate::remote::types::{RemoteError, RemoteErrorKind};
use crate::types::{Collection, RecordId};

/// Record-level checks that run before anything is sent to the remote store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Amount must be non-negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("Monthly limit must be positive, got {0}")]
    NonPositiveLimit(Decimal),

    #[error("Category must not be empty")]
    EmptyCategory,

    #[error("End date {end} is before start date {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("Tags must not be blank")]
    BlankTag,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sign-in required")]
    NotAuthenticated,

    #[error("A sign-in attempt is already in progress")]
    AuthInProgress,

    #[error("Authentication failed: {0}")]
    Authentication(RemoteError),

    #[error("Session is no longer valid: {0}")]
    Unauthorized(RemoteError),

    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rejected by server: {0}")]
    Rejected(RemoteError),

    #[error("Remote store unavailable: {0}")]
    Remote(RemoteError),

    #[error("Update kept locally but not confirmed by the server: {0}")]
    UpdateNotConfirmed(RemoteError),

    #[error("Delete of {collection}/{id} could not be confirmed")]
    DeleteUnconfirmed { collection: Collection, id: RecordId },

    #[error("Record {collection}/{id} not found")]
    NotFound { collection: Collection, id: RecordId },

    #[error("Local storage capacity reached ({percent_used:.1}% used)")]
    CapacityReached { percent_used: f64 },

    #[error("Operation superseded by an identity change")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Classify a terminal remote failure (retries already exhausted).
    pub fn from_remote(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::Unauthorized | RemoteErrorKind::InvalidRefreshToken => {
                SyncError::Unauthorized(err)
            }
            RemoteErrorKind::InvalidCredentials | RemoteErrorKind::Unverified => {
                SyncError::Authentication(err)
            }
            RemoteErrorKind::Validation | RemoteErrorKind::NotFound => SyncError::Rejected(err),
            RemoteErrorKind::Network | RemoteErrorKind::Timeout => SyncError::Remote(err),
        }
    }

    /// Superseded operations are intentional and never shown to the user.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::Superseded)
    }

    /// True when the error should end the session rather than be retried.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, SyncError::NotAuthenticated | SyncError::Unauthorized(_))
    }

    /// Short, actionable text for inline notifications.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::NotAuthenticated | SyncError::Unauthorized(_) => {
                "Sign-in required.".to_string()
            }
            SyncError::AuthInProgress => "Already signing in, please wait.".to_string(),
            SyncError::Authentication(err) => match err.kind {
                RemoteErrorKind::Unverified => {
                    "Please verify your email address before signing in.".to_string()
                }
                RemoteErrorKind::InvalidCredentials => "Invalid email or password.".to_string(),
                _ => "Could not sign in. Check your connection and try again.".to_string(),
            },
            SyncError::Validation(err) => err.to_string(),
            SyncError::Rejected(err) => err.message.clone(),
            SyncError::Remote(_) => "Could not save. Will retry automatically.".to_string(),
            SyncError::UpdateNotConfirmed(_) => {
                "Your edit is shown but was not saved to the server yet.".to_string()
            }
            SyncError::DeleteUnconfirmed { .. } => {
                "Could not confirm the delete. The record was restored.".to_string()
            }
            SyncError::NotFound { .. } => "That record no longer exists.".to_string(),
            SyncError::CapacityReached { .. } => {
                "Capacity reached. Remove old records before adding new ones.".to_string()
            }
            SyncError::Superseded => String::new(),
            SyncError::Storage(_) => "Local storage is unavailable.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
