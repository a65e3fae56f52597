//! Per-process session bookkeeping owned by the coordinator.
//!
//! One instance lives for the lifetime of the coordinator and is reset in
//! place on sign-out or identity change, never replaced.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::types::OwnerId;

pub(crate) struct AppSessionState {
    /// Identity the cache currently belongs to.
    pub active: Option<OwnerId>,
    /// Set once every collection was read for `active`.
    pub loaded: bool,
    /// Owner → ticket of the load currently outstanding for it.
    in_flight: HashMap<OwnerId, u64>,
    next_ticket: u64,
    /// Parent of every token handed out for `active`.
    identity_token: CancellationToken,
    /// Background retry loop, while one is scheduled.
    background: Option<CancellationToken>,
}

impl Default for AppSessionState {
    fn default() -> Self {
        Self {
            active: None,
            loaded: false,
            in_flight: HashMap::new(),
            next_ticket: 0,
            identity_token: CancellationToken::new(),
            background: None,
        }
    }
}

impl AppSessionState {
    /// Cancel everything issued for the previous identity and start over.
    pub fn reset(&mut self, active: Option<OwnerId>) {
        self.identity_token.cancel();
        if let Some(background) = self.background.take() {
            background.cancel();
        }
        self.identity_token = CancellationToken::new();
        self.in_flight.clear();
        self.loaded = false;
        self.active = active;
    }

    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.active.as_ref() == Some(owner)
    }

    /// Token for one load or mutation of the active identity.
    pub fn token(&self) -> CancellationToken {
        self.identity_token.child_token()
    }

    /// Claim the load slot for `owner`. `None` if a load is already outstanding.
    pub fn begin_load(&mut self, owner: &OwnerId) -> Option<u64> {
        if self.in_flight.contains_key(owner) {
            return None;
        }
        self.next_ticket += 1;
        self.in_flight.insert(owner.clone(), self.next_ticket);
        Some(self.next_ticket)
    }

    /// Release the load slot, unless a reset already handed it to a newer load.
    pub fn end_load(&mut self, owner: &OwnerId, ticket: u64) {
        if self.in_flight.get(owner) == Some(&ticket) {
            self.in_flight.remove(owner);
        }
    }

    pub fn has_background_retry(&self) -> bool {
        self.background
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    pub fn start_background_retry(&mut self) -> CancellationToken {
        let token = self.identity_token.child_token();
        self.background = Some(token.clone());
        token
    }

    pub fn stop_background_retry(&mut self) {
        if let Some(background) = self.background.take() {
            background.cancel();
        }
    }
}
