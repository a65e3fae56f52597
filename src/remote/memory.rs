//! In-process `RemoteStore`: row storage with owner scoping, a minimal auth
//! layer, and switches for simulating outages and ambiguous responses.
//!
//! Used for offline demos and as the backend in integration tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::types::{
    AuthEvent, Credentials, Identity, RemoteError, RemoteErrorKind, RemoteStore, Session,
};
use crate::types::{Collection, OwnerId, Record, RecordId};

const SESSION_TTL_SECS: i64 = 3600;
const AUTH_EVENT_CAPACITY: usize = 64;

/// Remote operations, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    SignIn,
    SignOut,
    Refresh,
    CurrentSession,
    Select,
    Insert,
    Update,
    Delete,
}

/// Marks one call of `op` as outstanding until dropped, including when the
/// caller abandons the call mid-latency.
struct InFlight<'a> {
    state: &'a Mutex<BackendState>,
    op: RemoteOp,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a Mutex<BackendState>, op: RemoteOp) -> Self {
        let mut guard = state.lock();
        let current = guard.in_flight.entry(op).or_default();
        *current += 1;
        let current = *current;
        let peak = guard.peak_in_flight.entry(op).or_default();
        *peak = (*peak).max(current);
        Self { state, op }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.state.lock().in_flight.get_mut(&self.op) {
            *n = n.saturating_sub(1);
        }
    }
}

struct UserAccount {
    password: String,
    identity: Identity,
    verified: bool,
}

#[derive(Default)]
struct BackendState {
    accounts: HashMap<String, UserAccount>,
    rows: HashMap<Collection, Vec<Record>>,
    active: Option<Session>,
    /// Outstanding refresh token → identity it renews.
    refresh_tokens: HashMap<String, Identity>,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    /// Next N deletes report zero affected rows without deleting anything.
    phantom_deletes: usize,
    calls: HashMap<RemoteOp, usize>,
    in_flight: HashMap<RemoteOp, usize>,
    peak_in_flight: HashMap<RemoteOp, usize>,
    select_calls: HashMap<Collection, usize>,
    inserted: Vec<Record>,
    token_seq: u64,
}

impl BackendState {
    fn issue_session(&mut self, identity: Identity) -> Session {
        self.token_seq += 1;
        let refresh_token = format!("refresh-{}-{}", identity.id, self.token_seq);
        self.refresh_tokens
            .insert(refresh_token.clone(), identity.clone());
        let session = Session {
            access_token: format!("access-{}-{}", identity.id, self.token_seq),
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(SESSION_TTL_SECS),
            identity,
        };
        self.active = Some(session.clone());
        session
    }

    fn authorize(&self, owner: &OwnerId) -> Result<(), RemoteError> {
        match &self.active {
            Some(session) if &session.identity.id == owner => Ok(()),
            Some(_) => Err(RemoteError::unauthorized(
                "row-level security: owner does not match session",
            )),
            None => Err(RemoteError::unauthorized("JWT expired")),
        }
    }
}

pub struct MemoryRemoteStore {
    state: Mutex<BackendState>,
    events: broadcast::Sender<AuthEvent>,
    latency: Mutex<Duration>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            state: Mutex::new(BackendState::default()),
            events,
            latency: Mutex::new(Duration::ZERO),
        }
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Create a verified account.
    pub fn register(&self, user_id: &str, email: &str, password: &str) -> Identity {
        self.register_with(user_id, email, password, true)
    }

    pub fn register_unverified(&self, user_id: &str, email: &str, password: &str) -> Identity {
        self.register_with(user_id, email, password, false)
    }

    fn register_with(
        &self,
        user_id: &str,
        email: &str,
        password: &str,
        verified: bool,
    ) -> Identity {
        let identity = Identity::new(user_id, email);
        self.state.lock().accounts.insert(
            email.to_string(),
            UserAccount {
                password: password.to_string(),
                identity: identity.clone(),
                verified,
            },
        );
        identity
    }

    /// Insert a row directly, bypassing auth.
    pub fn seed(&self, record: impl Into<Record>) {
        let record = record.into();
        self.state
            .lock()
            .rows
            .entry(record.collection())
            .or_default()
            .push(record);
    }

    /// Remove a row directly, bypassing auth (a delete from another device).
    pub fn remove_row(&self, collection: Collection, id: &RecordId) -> bool {
        let mut state = self.state.lock();
        let rows = state.rows.entry(collection).or_default();
        let before = rows.len();
        rows.retain(|r| r.id() != id);
        rows.len() != before
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fail the next call of `op` with `error`. Queued errors fire in order.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.fail_times(op, error, 1);
    }

    pub fn fail_times(&self, op: RemoteOp, error: RemoteError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Make the next delete report zero affected rows while leaving the row in place.
    pub fn report_zero_rows_on_next_delete(&self) {
        self.state.lock().phantom_deletes += 1;
    }

    /// Drop the active session; further row calls fail as unauthorized.
    pub fn expire_session(&self) {
        self.state.lock().active = None;
    }

    pub fn revoke_refresh_tokens(&self) {
        self.state.lock().refresh_tokens.clear();
    }

    /// Push an auth event to every subscriber, as the backend SDK would.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn rows(&self, collection: Collection, owner: &OwnerId) -> Vec<Record> {
        self.state
            .lock()
            .rows
            .get(&collection)
            .map(|rows| rows.iter().filter(|r| r.owner_id() == owner).cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Calls of `op` currently waiting out the configured latency.
    pub fn in_flight(&self, op: RemoteOp) -> usize {
        self.state.lock().in_flight.get(&op).copied().unwrap_or(0)
    }

    /// Highest number of overlapping calls of `op` seen so far.
    pub fn peak_in_flight(&self, op: RemoteOp) -> usize {
        self.state.lock().peak_in_flight.get(&op).copied().unwrap_or(0)
    }

    pub fn select_calls(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .select_calls
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Every record passed to `insert`, in call order.
    pub fn inserted(&self) -> Vec<Record> {
        self.state.lock().inserted.clone()
    }

    pub fn active_session(&self) -> Option<Session> {
        self.state.lock().active.clone()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Latency, call accounting, and injected faults shared by every call.
    async fn begin(&self, op: RemoteOp) -> Result<(), RemoteError> {
        let _in_flight = InFlight::enter(&self.state, op);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        let outcome = match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        };
        drop(state);
        outcome
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, RemoteError> {
        self.begin(RemoteOp::SignIn).await?;
        let session = {
            let mut state = self.state.lock();
            let account = state
                .accounts
                .get(&credentials.email)
                .filter(|a| a.password == credentials.password)
                .ok_or_else(|| {
                    RemoteError::new(
                        "Invalid login credentials",
                        RemoteErrorKind::InvalidCredentials,
                    )
                })?;
            if !account.verified {
                return Err(RemoteError::new(
                    "Email not confirmed",
                    RemoteErrorKind::Unverified,
                ));
            }
            let identity = account.identity.clone();
            state.issue_session(identity)
        };
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), RemoteError> {
        self.begin(RemoteOp::SignOut).await?;
        {
            let mut state = self.state.lock();
            state.refresh_tokens.remove(&session.refresh_token);
            if state
                .active
                .as_ref()
                .is_some_and(|s| s.identity == session.identity)
            {
                state.active = None;
            }
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        self.begin(RemoteOp::Refresh).await?;
        let session = {
            let mut state = self.state.lock();
            let identity = state.refresh_tokens.remove(refresh_token).ok_or_else(|| {
                RemoteError::new(
                    "Invalid Refresh Token: Refresh Token Not Found",
                    RemoteErrorKind::InvalidRefreshToken,
                )
            })?;
            state.issue_session(identity)
        };
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, RemoteError> {
        self.begin(RemoteOp::CurrentSession).await?;
        Ok(self.state.lock().active.clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(
        &self,
        collection: Collection,
        owner: &OwnerId,
    ) -> Result<Vec<Record>, RemoteError> {
        self.begin(RemoteOp::Select).await?;
        let mut state = self.state.lock();
        *state.select_calls.entry(collection).or_default() += 1;
        state.authorize(owner)?;
        Ok(state
            .rows
            .get(&collection)
            .map(|rows| rows.iter().filter(|r| r.owner_id() == owner).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: Collection, record: &Record) -> Result<Record, RemoteError> {
        self.begin(RemoteOp::Insert).await?;
        let mut state = self.state.lock();
        state.inserted.push(record.clone());
        state.authorize(record.owner_id())?;
        if record.collection() != collection {
            return Err(RemoteError::validation(format!(
                "record does not belong to {collection}"
            )));
        }
        let rows = state.rows.entry(collection).or_default();
        if rows.iter().any(|r| r.id() == record.id()) {
            return Err(RemoteError::validation(format!(
                "duplicate key value violates unique constraint ({})",
                record.id()
            )));
        }

        let mut stored = record.clone();
        if stored.id().is_empty() {
            stored.set_id(RecordId::generate());
        }
        let trimmed = stored.category().trim().to_string();
        *stored.category_mut() = trimmed;
        stored.set_created_at(Some(Utc::now()));
        rows.insert(0, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        collection: Collection,
        record: &Record,
        match_id: &RecordId,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteOp::Update).await?;
        let mut state = self.state.lock();
        state.authorize(record.owner_id())?;
        let owner = record.owner_id().clone();
        let rows = state.rows.entry(collection).or_default();
        let existing = rows
            .iter_mut()
            .find(|r| r.id() == match_id && r.owner_id() == &owner)
            .ok_or_else(|| {
                RemoteError::new(format!("no row {match_id}"), RemoteErrorKind::NotFound)
            })?;
        let created_at = existing.created_at();
        let mut replacement = record.clone();
        let trimmed = replacement.category().trim().to_string();
        *replacement.category_mut() = trimmed;
        replacement.set_created_at(created_at);
        *existing = replacement;
        Ok(())
    }

    async fn delete(
        &self,
        collection: Collection,
        match_id: &RecordId,
        owner: &OwnerId,
    ) -> Result<u64, RemoteError> {
        self.begin(RemoteOp::Delete).await?;
        let mut state = self.state.lock();
        state.authorize(owner)?;
        if state.phantom_deletes > 0 {
            state.phantom_deletes -= 1;
            return Ok(0);
        }
        let rows = state.rows.entry(collection).or_default();
        let before = rows.len();
        rows.retain(|r| !(r.id() == match_id && r.owner_id() == owner));
        Ok((before - rows.len()) as u64)
    }
}
