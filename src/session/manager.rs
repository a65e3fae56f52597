//! SessionManager: the tab's view of who is signed in.
//!
//! Holds the credential pair, mirrors it to durable storage for offline
//! startup, and classifies every auth change as a new login, a routine
//! refresh, or a sign-out. It never touches cached records; the coordinator
//! reacts to the transitions it returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::state::{SessionState, SessionTransition, SignOutReason};
use crate::error::{Result, SyncError};
use crate::remote::types::{
    AuthEvent, Credentials, Identity, RemoteErrorKind, RemoteStore, Session,
};
use crate::resilience::{CallError, RetryPolicy};
use crate::storage::DurableMirror;

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

pub struct SessionManager {
    remote: Arc<dyn RemoteStore>,
    mirror: DurableMirror,
    /// Auth calls are never retried automatically; they only get a deadline.
    policy: RetryPolicy,
    state: watch::Sender<SessionState>,
    session: Mutex<Option<Session>>,
    transitions: broadcast::Sender<SessionTransition>,
}

impl SessionManager {
    pub fn new(remote: Arc<dyn RemoteStore>, mirror: DurableMirror, timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            remote,
            mirror,
            policy: RetryPolicy::once(timeout),
            state,
            session: Mutex::new(None),
            transitions,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<SessionTransition> {
        self.transitions.subscribe()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Restore the session at startup.
    ///
    /// Asks the credential store first. If it cannot be reached, falls back
    /// to the persisted credential snapshot when it has not expired.
    pub async fn bootstrap(&self) -> Option<SessionTransition> {
        let prior = self.identity();
        let remote = self.remote.clone();
        let token = CancellationToken::new();
        let restored = match self
            .policy
            .run(&token, "current_session", || {
                let remote = remote.clone();
                async move { remote.current_session().await }
            })
            .await
        {
            Ok(Some(session)) => Some(session),
            Ok(None) => {
                if let Err(err) = self.mirror.clear_session() {
                    tracing::warn!("failed to clear session snapshot: {err}");
                }
                None
            }
            Err(err) => {
                tracing::warn!("credential store unreachable at startup: {err:?}");
                match self.mirror.load_session(Utc::now()) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        tracing::warn!("session snapshot unavailable: {err}");
                        None
                    }
                }
            }
        };

        match restored {
            Some(session) => Some(self.accept(session, prior)),
            None => {
                self.state.send_replace(SessionState::Anonymous);
                None
            }
        }
    }

    /// Exchange credentials for a session.
    ///
    /// Fails with `AuthInProgress` while another attempt is outstanding. On
    /// rejection the tab is left anonymous.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<SessionTransition> {
        let mut prior = None;
        let started = self.state.send_if_modified(|state| match state {
            SessionState::Authenticating => false,
            _ => {
                prior = state.identity().cloned();
                *state = SessionState::Authenticating;
                true
            }
        });
        if !started {
            return Err(SyncError::AuthInProgress);
        }

        let remote = self.remote.clone();
        let token = CancellationToken::new();
        let result = self
            .policy
            .run(&token, "sign_in", || {
                let remote = remote.clone();
                let credentials = credentials.clone();
                async move { remote.sign_in(&credentials).await }
            })
            .await;

        match result {
            Ok(session) => Ok(self.accept(session, prior)),
            Err(err) => {
                self.state.send_replace(SessionState::Anonymous);
                *self.session.lock() = None;
                match err {
                    CallError::Remote(err) => {
                        tracing::info!(kind = ?err.kind, "sign-in rejected: {err}");
                        Err(SyncError::Authentication(err))
                    }
                    CallError::Cancelled => Err(SyncError::Superseded),
                }
            }
        }
    }

    /// Drop the session locally. Returns the session that was active, if
    /// any, so the caller can end it remotely.
    pub fn sign_out_local(&self, reason: SignOutReason) -> Option<Session> {
        let previous = self.state.send_replace(SessionState::Anonymous);
        let session = self.session.lock().take();
        if let Err(err) = self.mirror.clear_session() {
            tracing::warn!("failed to clear session snapshot: {err}");
        }
        if let SessionState::Authenticated(identity) = previous {
            tracing::info!(owner = %identity.id, ?reason, "signed out");
            let _ = self
                .transitions
                .send(SessionTransition::SignedOut(reason));
        }
        session
    }

    /// Renew the access credential.
    ///
    /// Only an explicitly invalid refresh token ends the session; any other
    /// failure leaves the tab authenticated.
    pub async fn refresh(&self) -> Result<SessionTransition> {
        let Some(current) = self.session() else {
            return Err(SyncError::NotAuthenticated);
        };
        let remote = self.remote.clone();
        let refresh_token = current.refresh_token.clone();
        let token = CancellationToken::new();
        let result = self
            .policy
            .run(&token, "refresh", || {
                let remote = remote.clone();
                let refresh_token = refresh_token.clone();
                async move { remote.refresh(&refresh_token).await }
            })
            .await;

        match result {
            Ok(session) => Ok(self.accept(session, Some(current.identity))),
            Err(CallError::Remote(err)) if err.kind == RemoteErrorKind::InvalidRefreshToken => {
                tracing::warn!(owner = %current.identity.id, "refresh token rejected: {err}");
                self.sign_out_local(SignOutReason::RefreshRejected);
                Err(SyncError::Unauthorized(err))
            }
            Err(CallError::Remote(err)) => {
                tracing::debug!(
                    owner = %current.identity.id,
                    "refresh failed, keeping session: {err}"
                );
                Err(SyncError::Remote(err))
            }
            Err(CallError::Cancelled) => Err(SyncError::Superseded),
        }
    }

    /// Fold a backend auth event into the session state.
    ///
    /// Returns the transition it caused, or `None` when the event changes
    /// nothing (a sign-out while already anonymous, or a refresh for an
    /// identity that is no longer active).
    pub fn apply_auth_event(&self, event: AuthEvent) -> Option<SessionTransition> {
        let current = self.state();
        match event {
            AuthEvent::SignedIn(session) => {
                Some(self.accept(session, current.identity().cloned()))
            }
            AuthEvent::TokenRefreshed(session) | AuthEvent::IdentityUpdated(session) => {
                match current.identity() {
                    Some(identity) if identity.id == session.identity.id => {
                        Some(self.accept(session, Some(identity.clone())))
                    }
                    _ => {
                        tracing::debug!(
                            owner = %session.identity.id,
                            "ignoring credential update for inactive identity"
                        );
                        None
                    }
                }
            }
            AuthEvent::SignedOut => {
                if !current.is_authenticated() {
                    return None;
                }
                self.sign_out_local(SignOutReason::SessionEnded);
                Some(SessionTransition::SignedOut(SignOutReason::SessionEnded))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Install `session`. A session for the identity that was already active
    /// is a refresh, whatever event delivered it.
    fn accept(&self, session: Session, prior: Option<Identity>) -> SessionTransition {
        let identity = session.identity.clone();
        if let Err(err) = self.mirror.save_session(&session) {
            tracing::warn!(owner = %identity.id, "failed to persist session snapshot: {err}");
        }
        *self.session.lock() = Some(session);
        self.state
            .send_replace(SessionState::Authenticated(identity.clone()));

        let transition = match prior {
            Some(prior) if prior.id == identity.id => SessionTransition::Refreshed(identity),
            _ => {
                tracing::info!(owner = %identity.id, "signed in");
                SessionTransition::NewLogin(identity)
            }
        };
        let _ = self.transitions.send(transition.clone());
        transition
    }
}
