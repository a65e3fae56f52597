use serde::Serialize;

use crate::remote::types::Identity;
use crate::types::OwnerId;

/// Authentication state of this tab.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    /// A sign-in attempt is outstanding.
    Authenticating,
    Authenticated(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.identity().map(|i| &i.id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignOutReason {
    /// The user asked to sign out in this tab.
    Explicit,
    /// Another tab signed out.
    CrossTab,
    /// The backend reported the session ended.
    SessionEnded,
    /// The refresh credential was rejected.
    RefreshRejected,
    /// A row call was refused for a stale or invalid access credential.
    Unauthorized,
}

/// Change of identity observed by the session manager.
///
/// `Refreshed` covers every event that keeps the same identity, including a
/// repeated sign-in as the user already signed in; only `NewLogin` warrants
/// a full reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    NewLogin(Identity),
    Refreshed(Identity),
    SignedOut(SignOutReason),
}
