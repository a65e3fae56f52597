//! SyncCoordinator: the only writer of the local cache.
//!
//! Every cache change goes through here: authoritative loads, the three
//! record mutations, sign-in/sign-out, and events from the auth listener and
//! from other tabs. Each load and mutation carries a cancellation token tied
//! to the identity it was started for; an identity change cancels them all
//! and their results are discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::journal::{JournalEntry, MutationJournal, PendingAction};
use super::state::AppSessionState;
use super::types::{
    LoadOutcome, SyncCoordinatorOptions, SyncErrorCallback, SyncErrorEvent, SyncPhase, SyncStatus,
};
use crate::broadcast::{CrossTabEvent, CrossTabNotifier};
use crate::capacity::{CapacityEdge, CapacityGuard, CapacityStatus};
use crate::collection::{autofill, autofill_for_update, AutofillOptions};
use crate::config::ConfigError;
use crate::error::{Result, SyncError};
use crate::remote::types::{AuthEvent, Credentials, RemoteError, RemoteStore};
use crate::resilience::{CallError, RetryPolicy};
use crate::session::{SessionManager, SessionState, SessionTransition, SignOutReason};
use crate::storage::{DurableMirror, LocalCache};
use crate::types::{Collection, OwnerId, Record, RecordId};

// ============================================================================
// SyncCoordinator
// ============================================================================

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    session: SessionManager,
    cache: LocalCache,
    capacity: Arc<CapacityGuard>,
    mirror: DurableMirror,
    notifier: CrossTabNotifier,
    journal: MutationJournal,
    state: Mutex<AppSessionState>,
    /// One lane per collection; a mutation holds its lane until it settles.
    lanes: [AsyncMutex<()>; 3],
    status: watch::Sender<SyncStatus>,
    policy: RetryPolicy,
    background_interval: Duration,
    on_error: Option<SyncErrorCallback>,
}

/// Who a write is performed for.
enum Writer {
    /// Nobody is signed in: records live only in this origin's storage.
    LocalOnly,
    Remote(WriteContext),
}

struct WriteContext {
    owner: OwnerId,
    token: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(options: SyncCoordinatorOptions) -> std::result::Result<Self, ConfigError> {
        let SyncCoordinatorOptions {
            remote,
            mirror,
            transport,
            config,
            on_error,
        } = options;
        config.validate()?;

        let capacity = Arc::new(CapacityGuard::new(
            config.capacity_ceiling_bytes,
            config.capacity_warn_fraction,
        ));
        let mirror = DurableMirror::new(mirror, config.mirror_namespace.clone());
        let policy = config.retry_policy();
        let session = SessionManager::new(remote.clone(), mirror.clone(), policy.timeout);
        let (status, _) = watch::channel(SyncStatus::SignedOut);

        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                session,
                cache: LocalCache::new(capacity.clone()),
                capacity,
                mirror,
                notifier: CrossTabNotifier::new(transport),
                journal: MutationJournal::default(),
                state: Mutex::new(AppSessionState::default()),
                lanes: std::array::from_fn(|_| AsyncMutex::new(())),
                status,
                policy,
                background_interval: config.background_retry_interval(),
                on_error,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn capacity(&self) -> CapacityStatus {
        self.inner.capacity.status()
    }

    pub fn subscribe_capacity(&self) -> watch::Receiver<CapacityStatus> {
        self.inner.capacity.subscribe()
    }

    pub fn capacity_edges(&self) -> broadcast::Receiver<CapacityEdge> {
        self.inner.capacity.subscribe_edges()
    }

    /// Whether every collection has been read for the active identity.
    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    pub fn active_owner(&self) -> Option<OwnerId> {
        self.inner.state.lock().active.clone()
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Restore the session at startup and load its data. With nobody signed
    /// in, restores this origin's local-only records instead.
    pub async fn bootstrap(&self) -> LoadOutcome {
        match self.inner.session.bootstrap().await {
            Some(transition) => self.apply_transition(transition).await,
            None => {
                self.enter_local_mode();
                LoadOutcome::NoIdentity
            }
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<LoadOutcome> {
        match self.inner.session.sign_in(credentials).await {
            Ok(transition) => Ok(self.apply_transition(transition).await),
            Err(err) => {
                // A rejected attempt leaves the tab anonymous; the previous
                // identity's records must go with it.
                let anonymous = self.inner.session.state() == SessionState::Anonymous;
                if let Some(owner) = self.active_owner().filter(|_| anonymous) {
                    tracing::info!(
                        owner = %owner,
                        "sign-in rejected, dropping previous identity"
                    );
                    self.clear_local();
                    self.inner.notifier.publish(CrossTabEvent::SignedOut);
                }
                self.report(SyncPhase::SignIn, None, None, &err);
                Err(err)
            }
        }
    }

    /// End the session.
    ///
    /// Session state, cache and mirror are cleared and other tabs are told
    /// before this returns; the remote sign-out runs in the background and
    /// its outcome is only logged.
    pub fn sign_out(&self) {
        let session = self.inner.session.sign_out_local(SignOutReason::Explicit);
        self.clear_local();
        self.inner.notifier.publish(CrossTabEvent::SignedOut);

        let Some(session) = session else {
            return;
        };
        let remote = self.inner.remote.clone();
        let timeout = self.inner.policy.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match tokio::time::timeout(timeout, remote.sign_out(&session)).await {
                        Ok(Ok(())) => tracing::debug!("remote sign-out acknowledged"),
                        Ok(Err(err)) => tracing::warn!("remote sign-out failed: {err}"),
                        Err(_) => tracing::warn!("remote sign-out timed out"),
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime available, skipping remote sign-out"),
        }
    }

    /// Renew the access credential. An invalid refresh token signs out.
    pub async fn refresh_session(&self) -> Result<()> {
        match self.inner.session.refresh().await {
            Ok(transition) => {
                self.apply_transition(transition).await;
                Ok(())
            }
            Err(err @ SyncError::Unauthorized(_)) => {
                self.on_signed_out(SignOutReason::RefreshRejected);
                self.report(SyncPhase::SignIn, None, None, &err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Fold one backend auth event into the session and react to it.
    pub async fn apply_auth_event(&self, event: AuthEvent) -> Option<LoadOutcome> {
        let transition = self.inner.session.apply_auth_event(event)?;
        Some(self.apply_transition(transition).await)
    }

    /// Consume backend auth events until the remote store drops its sender.
    ///
    /// State changes are applied in event order; the loads they trigger run
    /// as separate tasks so a slow load never delays a later sign-out.
    pub fn spawn_session_listener(&self) -> JoinHandle<()> {
        let mut events = self.inner.remote.auth_events();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(transition) = this.inner.session.apply_auth_event(event) else {
                            continue;
                        };
                        if let Some((owner, force)) = this.enter(&transition) {
                            let this = this.clone();
                            tokio::spawn(async move {
                                this.load_with(&owner, force, true).await;
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "auth event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("auth event listener stopped");
        })
    }

    // -----------------------------------------------------------------------
    // Cross-tab
    // -----------------------------------------------------------------------

    /// React to an event posted by another tab.
    pub async fn apply_cross_tab_event(&self, event: CrossTabEvent) -> Option<LoadOutcome> {
        match event {
            CrossTabEvent::SignedOut => {
                self.apply_cross_tab_sign_out();
                None
            }
            CrossTabEvent::DataChanged => match self.inner.session.identity() {
                Some(identity) => Some(self.load_with(&identity.id, true, false).await),
                None => {
                    self.reload_local_only();
                    None
                }
            },
        }
    }

    /// Listen for other tabs. `None` when no cross-tab transport exists.
    pub fn spawn_cross_tab_listener(&self) -> Option<JoinHandle<()>> {
        let Some(mut subscription) = self.inner.notifier.subscribe() else {
            tracing::debug!("cross-tab sync unavailable");
            return None;
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                match event {
                    CrossTabEvent::SignedOut => this.apply_cross_tab_sign_out(),
                    CrossTabEvent::DataChanged => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            this.apply_cross_tab_event(CrossTabEvent::DataChanged).await;
                        });
                    }
                }
            }
            tracing::debug!("cross-tab listener stopped");
        }))
    }

    // -----------------------------------------------------------------------
    // Authoritative load
    // -----------------------------------------------------------------------

    /// Read all three collections for `owner` and replace the cache with them.
    ///
    /// At most one load per identity is outstanding; a concurrent call
    /// returns `Deduplicated` without touching the remote store. Without
    /// `force`, an identity that is already loaded is left alone.
    pub async fn load_authoritative(&self, owner: &OwnerId, force: bool) -> LoadOutcome {
        self.load_with(owner, force, true).await
    }

    async fn load_with(&self, owner: &OwnerId, force: bool, announce: bool) -> LoadOutcome {
        let inner = &*self.inner;
        let (token, ticket, first) = {
            let mut state = inner.state.lock();
            if !state.is_active(owner) {
                return LoadOutcome::NoIdentity;
            }
            if state.loaded && !force {
                return LoadOutcome::AlreadyLoaded;
            }
            let Some(ticket) = state.begin_load(owner) else {
                tracing::debug!(owner = %owner, "load already in flight");
                return LoadOutcome::Deduplicated;
            };
            (
                state.token(),
                ticket,
                !state.loaded && inner.cache.is_empty(),
            )
        };
        self.set_status(if first {
            SyncStatus::InitialLoading
        } else {
            SyncStatus::Syncing
        });

        let generations = Collection::ALL.map(|c| inner.cache.generation(c));
        let (transactions, goals, templates) = tokio::join!(
            self.select(&token, Collection::Transactions, owner),
            self.select(&token, Collection::BudgetGoals, owner),
            self.select(&token, Collection::RecurringTemplates, owner),
        );
        inner.state.lock().end_load(owner, ticket);

        let mut failed: Vec<Collection> = Vec::new();
        let mut failure: Option<RemoteError> = None;
        {
            let state = inner.state.lock();
            if token.is_cancelled() || !state.is_active(owner) {
                tracing::debug!(owner = %owner, "discarding superseded load");
                return LoadOutcome::Superseded;
            }
            for (collection, result) in Collection::ALL
                .into_iter()
                .zip([transactions, goals, templates])
            {
                match result {
                    Ok(rows) => {
                        let since = generations[collection.index()];
                        if !inner
                            .cache
                            .replace_collection_if_current(collection, rows, since)
                        {
                            tracing::debug!(
                                owner = %owner,
                                %collection,
                                pending = inner.cache.has_pending(collection),
                                "skipping stale read, a newer local change exists"
                            );
                        }
                    }
                    Err(CallError::Cancelled) => return LoadOutcome::Superseded,
                    Err(CallError::Remote(err)) => {
                        tracing::warn!(owner = %owner, %collection, "load failed: {err}");
                        failed.push(collection);
                        if failure.as_ref().map_or(true, |f| !f.is_auth()) {
                            failure = Some(err);
                        }
                    }
                }
            }
        }

        match failure {
            None => {
                {
                    let mut state = inner.state.lock();
                    state.loaded = true;
                    state.stop_background_retry();
                }
                self.set_status(SyncStatus::Idle);
                self.persist(owner);
                if announce {
                    inner.notifier.publish(CrossTabEvent::DataChanged);
                }
                tracing::info!(
                    owner = %owner,
                    records = inner.cache.len(),
                    "authoritative load complete"
                );
                LoadOutcome::Loaded
            }
            Some(err) if err.is_auth() => {
                let err = self.remote_failure(err);
                self.report(SyncPhase::Load, None, None, &err);
                LoadOutcome::SignedOut
            }
            Some(_) => {
                let from_mirror = self.restore_from_mirror(owner, &failed);
                self.set_status(SyncStatus::Degraded);
                self.schedule_background_retry(owner);
                LoadOutcome::Degraded { from_mirror }
            }
        }
    }

    /// Fill collections that failed to load, and are empty, from the mirror.
    fn restore_from_mirror(&self, owner: &OwnerId, failed: &[Collection]) -> bool {
        let snapshot = match self.inner.mirror.load_snapshot(owner) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(owner = %owner, "mirror unavailable: {err}");
                return false;
            }
        };
        let state = self.inner.state.lock();
        if !state.is_active(owner) {
            return false;
        }
        let mut restored = false;
        for &collection in failed {
            let cache = &self.inner.cache;
            if cache.records(collection).is_empty() && snapshot.collection_len(collection) > 0 {
                let since = cache.generation(collection);
                restored |= cache.replace_collection_if_current(
                    collection,
                    snapshot.records(collection),
                    since,
                );
            }
        }
        if restored {
            tracing::info!(owner = %owner, "showing mirrored data while offline");
        }
        restored
    }

    fn schedule_background_retry(&self, owner: &OwnerId) {
        let token = {
            let mut state = self.inner.state.lock();
            if !state.is_active(owner) || state.has_background_retry() {
                return;
            }
            state.start_background_retry()
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime available, background retry disabled");
            return;
        };
        let interval = self.inner.background_interval;
        tracing::info!(
            owner = %owner,
            interval_ms = interval.as_millis() as u64,
            "starting background retry"
        );
        let this = self.clone();
        let owner = owner.clone();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match this.load_with(&owner, true, true).await {
                    LoadOutcome::Degraded { .. } | LoadOutcome::Deduplicated => continue,
                    _ => break,
                }
            }
            tracing::debug!(owner = %owner, "background retry stopped");
        });
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Insert a new record for the signed-in identity.
    ///
    /// The cache is only changed after the remote store accepted the insert,
    /// by re-reading the collection. With nobody signed in the record is kept
    /// locally under the local-only owner.
    pub async fn create_record(&self, record: impl Into<Record>) -> Result<Record> {
        let record = record.into();
        let collection = record.collection();
        let result = self.create_inner(record).await;
        if let Err(err) = &result {
            self.report(SyncPhase::Create, Some(collection), None, err);
        }
        result
    }

    /// Replace a record. Id, owner and creation time are kept from the cache.
    ///
    /// The edit is shown immediately. If the remote store cannot be reached
    /// it stays applied locally and `UpdateNotConfirmed` is returned; if the
    /// store rejects it, the previous value is restored.
    pub async fn update_record(&self, record: impl Into<Record>) -> Result<Record> {
        let record = record.into();
        let collection = record.collection();
        let id = record.id().clone();
        let result = self.update_inner(record).await;
        if let Err(err) = &result {
            self.report(SyncPhase::Update, Some(collection), Some(id), err);
        }
        result
    }

    /// Delete a record, removing it from the cache first and restoring it if
    /// the remote delete fails or cannot be confirmed.
    pub async fn delete_record(&self, collection: Collection, id: &RecordId) -> Result<()> {
        let result = self.delete_inner(collection, id).await;
        if let Err(err) = &result {
            self.report(SyncPhase::Delete, Some(collection), Some(id.clone()), err);
        }
        result
    }

    async fn create_inner(&self, record: Record) -> Result<Record> {
        let inner = &*self.inner;
        let capacity = inner.capacity.status();
        if capacity.at_capacity {
            return Err(SyncError::CapacityReached {
                percent_used: capacity.percent_used,
            });
        }
        record.validate()?;

        let ctx = match self.writer()? {
            Writer::LocalOnly => return Ok(self.create_local(record)),
            Writer::Remote(ctx) => ctx,
        };
        let collection = record.collection();
        let _lane = inner.lanes[collection.index()].lock().await;
        if ctx.token.is_cancelled() {
            return Err(SyncError::Superseded);
        }
        let _pending = inner.cache.begin_mutation(collection);

        let filled = autofill(&record, &AutofillOptions::for_owner(ctx.owner.clone()));
        let remote = &*inner.remote;
        let to_insert = &filled;
        let stored = inner
            .policy
            .run(&ctx.token, "insert", move || remote.insert(collection, to_insert))
            .await
            .map_err(|err| self.call_error(err))?;
        tracing::debug!(%collection, record_id = %stored.id(), "insert accepted");

        match self.select(&ctx.token, collection, &ctx.owner).await {
            Ok(mut rows) => {
                if !rows.iter().any(|r| r.id() == stored.id()) {
                    rows.insert(0, stored.clone());
                }
                self.apply_if_active(&ctx, |cache| cache.replace_collection(collection, rows))?;
            }
            Err(CallError::Cancelled) => return Err(SyncError::Superseded),
            Err(CallError::Remote(err)) if err.is_auth() => return Err(self.remote_failure(err)),
            Err(CallError::Remote(err)) => {
                tracing::warn!(
                    %collection,
                    record_id = %stored.id(),
                    "read-after-write failed, keeping inserted row: {err}"
                );
                self.apply_if_active(&ctx, |cache| cache.upsert(stored.clone()))?;
            }
        }
        self.persist(&ctx.owner);
        inner.notifier.publish(CrossTabEvent::DataChanged);
        Ok(stored)
    }

    async fn update_inner(&self, record: Record) -> Result<Record> {
        let inner = &*self.inner;
        record.validate()?;
        let collection = record.collection();
        let id = record.id().clone();

        let ctx = match self.writer()? {
            Writer::LocalOnly => return self.update_local(record),
            Writer::Remote(ctx) => ctx,
        };
        let _lane = inner.lanes[collection.index()].lock().await;
        if ctx.token.is_cancelled() {
            return Err(SyncError::Superseded);
        }
        let _pending = inner.cache.begin_mutation(collection);

        let not_found = || SyncError::NotFound {
            collection,
            id: id.clone(),
        };
        let existing = inner
            .cache
            .get(collection, &id)
            .filter(|r| r.owner_id() == &ctx.owner)
            .ok_or_else(not_found)?;
        let filled = autofill_for_update(&record, &existing);

        let ticket = {
            let state = inner.state.lock();
            if ctx.token.is_cancelled() || !state.is_active(&ctx.owner) {
                return Err(SyncError::Superseded);
            }
            let (index, prior) = inner.cache.replace(filled.clone()).ok_or_else(not_found)?;
            inner.journal.record(JournalEntry {
                collection,
                id: id.clone(),
                action: PendingAction::Replace,
                index,
                prior,
            })
        };

        let remote = &*inner.remote;
        let (to_update, match_id) = (&filled, &id);
        let result = inner
            .policy
            .run(&ctx.token, "update", move || {
                remote.update(collection, to_update, match_id)
            })
            .await;

        match result {
            Ok(()) => {
                inner.journal.commit(ticket);
                match self.select(&ctx.token, collection, &ctx.owner).await {
                    Ok(rows) => {
                        self.apply_if_active(&ctx, |cache| {
                            cache.replace_collection(collection, rows)
                        })?;
                    }
                    Err(CallError::Cancelled) => return Err(SyncError::Superseded),
                    Err(CallError::Remote(err)) if err.is_auth() => {
                        return Err(self.remote_failure(err))
                    }
                    Err(CallError::Remote(err)) => {
                        tracing::warn!(
                            %collection,
                            record_id = %id,
                            "read-after-write failed, keeping local copy: {err}"
                        );
                    }
                }
                self.persist(&ctx.owner);
                inner.notifier.publish(CrossTabEvent::DataChanged);
                Ok(inner.cache.get(collection, &id).unwrap_or(filled))
            }
            Err(CallError::Cancelled) => {
                inner.journal.discard(ticket);
                Err(SyncError::Superseded)
            }
            Err(CallError::Remote(err)) if err.is_retryable() => {
                inner.journal.commit(ticket);
                tracing::warn!(
                    %collection,
                    record_id = %id,
                    "update kept locally, not confirmed: {err}"
                );
                self.persist(&ctx.owner);
                Err(SyncError::UpdateNotConfirmed(err))
            }
            Err(CallError::Remote(err)) => {
                self.roll_back(&ctx, ticket);
                Err(self.remote_failure(err))
            }
        }
    }

    async fn delete_inner(&self, collection: Collection, id: &RecordId) -> Result<()> {
        let inner = &*self.inner;
        let ctx = match self.writer()? {
            Writer::LocalOnly => return self.delete_local(collection, id),
            Writer::Remote(ctx) => ctx,
        };
        let _lane = inner.lanes[collection.index()].lock().await;
        if ctx.token.is_cancelled() {
            return Err(SyncError::Superseded);
        }
        let _pending = inner.cache.begin_mutation(collection);

        let not_found = || SyncError::NotFound {
            collection,
            id: id.clone(),
        };
        let ticket = {
            let state = inner.state.lock();
            if ctx.token.is_cancelled() || !state.is_active(&ctx.owner) {
                return Err(SyncError::Superseded);
            }
            let owned = inner
                .cache
                .get(collection, id)
                .is_some_and(|r| r.owner_id() == &ctx.owner);
            if !owned {
                return Err(not_found());
            }
            let (index, prior) = inner.cache.remove(collection, id).ok_or_else(not_found)?;
            inner.journal.record(JournalEntry {
                collection,
                id: id.clone(),
                action: PendingAction::Remove,
                index,
                prior,
            })
        };

        let remote = &*inner.remote;
        let owner = &ctx.owner;
        let result = inner
            .policy
            .run(&ctx.token, "delete", move || remote.delete(collection, id, owner))
            .await;

        match result {
            Ok(0) => self.verify_delete(&ctx, collection, id, ticket).await,
            Ok(_) => {
                inner.journal.commit(ticket);
                self.persist(&ctx.owner);
                inner.notifier.publish(CrossTabEvent::DataChanged);
                Ok(())
            }
            Err(CallError::Cancelled) => {
                inner.journal.discard(ticket);
                Err(SyncError::Superseded)
            }
            Err(CallError::Remote(err)) => {
                self.roll_back(&ctx, ticket);
                Err(self.remote_failure(err))
            }
        }
    }

    /// A delete reported zero affected rows: read the collection back to
    /// learn whether the row is really gone.
    async fn verify_delete(
        &self,
        ctx: &WriteContext,
        collection: Collection,
        id: &RecordId,
        ticket: u64,
    ) -> Result<()> {
        let inner = &*self.inner;
        tracing::warn!(%collection, record_id = %id, "delete affected no rows, verifying");
        let unconfirmed = || SyncError::DeleteUnconfirmed {
            collection,
            id: id.clone(),
        };
        match self.select(&ctx.token, collection, &ctx.owner).await {
            Ok(rows) if rows.iter().any(|r| r.id() == id) => {
                self.roll_back(ctx, ticket);
                Err(unconfirmed())
            }
            Ok(_) => {
                inner.journal.commit(ticket);
                self.persist(&ctx.owner);
                inner.notifier.publish(CrossTabEvent::DataChanged);
                Ok(())
            }
            Err(CallError::Cancelled) => {
                inner.journal.discard(ticket);
                Err(SyncError::Superseded)
            }
            Err(CallError::Remote(err)) => {
                self.roll_back(ctx, ticket);
                if err.is_auth() {
                    Err(self.remote_failure(err))
                } else {
                    tracing::warn!(
                        %collection,
                        record_id = %id,
                        "delete verification failed: {err}"
                    );
                    Err(unconfirmed())
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Local-only writes
    // -----------------------------------------------------------------------

    fn create_local(&self, record: Record) -> Record {
        let owner = OwnerId::local();
        let mut filled = autofill(&record, &AutofillOptions::for_owner(owner.clone()));
        filled.set_created_at(Some(Utc::now()));
        self.inner.cache.upsert(filled.clone());
        self.after_local_write(&owner);
        filled
    }

    fn update_local(&self, record: Record) -> Result<Record> {
        let collection = record.collection();
        let existing = self
            .inner
            .cache
            .get(collection, record.id())
            .ok_or_else(|| SyncError::NotFound {
                collection,
                id: record.id().clone(),
            })?;
        let filled = autofill_for_update(&record, &existing);
        self.inner.cache.replace(filled.clone());
        self.after_local_write(&OwnerId::local());
        Ok(filled)
    }

    fn delete_local(&self, collection: Collection, id: &RecordId) -> Result<()> {
        if self.inner.cache.remove(collection, id).is_none() {
            return Err(SyncError::NotFound {
                collection,
                id: id.clone(),
            });
        }
        self.after_local_write(&OwnerId::local());
        Ok(())
    }

    fn after_local_write(&self, owner: &OwnerId) {
        self.persist(owner);
        self.inner.notifier.publish(CrossTabEvent::DataChanged);
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Synchronous half of a session transition. Returns the load to run.
    fn enter(&self, transition: &SessionTransition) -> Option<(OwnerId, bool)> {
        match transition {
            SessionTransition::NewLogin(identity) => {
                let owner = identity.id.clone();
                let switched = {
                    let mut state = self.inner.state.lock();
                    if state.is_active(&owner) {
                        false
                    } else {
                        state.reset(Some(owner.clone()));
                        true
                    }
                };
                if switched {
                    tracing::info!(owner = %owner, "activating identity");
                    self.inner.cache.clear();
                    self.set_status(SyncStatus::InitialLoading);
                }
                Some((owner, switched))
            }
            SessionTransition::Refreshed(identity) => {
                let active = self.inner.state.lock().is_active(&identity.id);
                if active {
                    tracing::debug!(owner = %identity.id, "credentials refreshed, no reload");
                    None
                } else {
                    self.enter(&SessionTransition::NewLogin(identity.clone()))
                }
            }
            SessionTransition::SignedOut(reason) => {
                self.on_signed_out(*reason);
                None
            }
        }
    }

    async fn apply_transition(&self, transition: SessionTransition) -> LoadOutcome {
        match self.enter(&transition) {
            Some((owner, force)) => self.load_with(&owner, force, true).await,
            None => match transition {
                SessionTransition::Refreshed(_) => LoadOutcome::AlreadyLoaded,
                _ => LoadOutcome::NoIdentity,
            },
        }
    }

    /// Cleanup for sign-outs this tab did not start itself.
    fn on_signed_out(&self, reason: SignOutReason) {
        match reason {
            // Cleaned up by whoever initiated them.
            SignOutReason::Explicit | SignOutReason::CrossTab | SignOutReason::Unauthorized => {}
            SignOutReason::SessionEnded | SignOutReason::RefreshRejected => {
                self.clear_local();
                self.inner.notifier.publish(CrossTabEvent::SignedOut);
            }
        }
    }

    fn apply_cross_tab_sign_out(&self) {
        self.inner.session.sign_out_local(SignOutReason::CrossTab);
        self.clear_local();
    }

    /// End the session after an authorization failure on a row call.
    fn force_sign_out(&self) {
        tracing::warn!("authorization rejected, signing out");
        self.inner.session.sign_out_local(SignOutReason::Unauthorized);
        self.clear_local();
        self.inner.notifier.publish(CrossTabEvent::SignedOut);
    }

    fn clear_local(&self) {
        self.inner.state.lock().reset(None);
        self.inner.cache.clear();
        if let Err(err) = self.inner.mirror.clear() {
            tracing::warn!("failed to clear mirror: {err}");
        }
        self.set_status(SyncStatus::SignedOut);
    }

    fn enter_local_mode(&self) {
        self.inner.state.lock().reset(None);
        self.reload_local_only();
        self.set_status(SyncStatus::SignedOut);
    }

    fn reload_local_only(&self) {
        match self.inner.mirror.load_snapshot(&OwnerId::local()) {
            Ok(Some(snapshot)) => {
                let state = self.inner.state.lock();
                if state.active.is_none() {
                    self.inner.cache.replace_all(snapshot);
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("local-only records unavailable: {err}"),
        }
    }

    fn writer(&self) -> Result<Writer> {
        match self.inner.session.state() {
            SessionState::Anonymous => Ok(Writer::LocalOnly),
            SessionState::Authenticating => Err(SyncError::AuthInProgress),
            SessionState::Authenticated(identity) => {
                let state = self.inner.state.lock();
                if !state.is_active(&identity.id) {
                    return Err(SyncError::Superseded);
                }
                Ok(Writer::Remote(WriteContext {
                    owner: identity.id,
                    token: state.token(),
                }))
            }
        }
    }

    /// Owner-scoped read through the resilient-call wrapper.
    async fn select(
        &self,
        token: &CancellationToken,
        collection: Collection,
        owner: &OwnerId,
    ) -> std::result::Result<Vec<Record>, CallError> {
        let remote = &*self.inner.remote;
        let rows = self
            .inner
            .policy
            .run(token, collection.as_str(), move || remote.select(collection, owner))
            .await?;
        Ok(scoped_to(owner, collection, rows))
    }

    /// Apply `f` to the cache unless the write's identity was superseded.
    fn apply_if_active(&self, ctx: &WriteContext, f: impl FnOnce(&LocalCache)) -> Result<()> {
        let state = self.inner.state.lock();
        if ctx.token.is_cancelled() || !state.is_active(&ctx.owner) {
            return Err(SyncError::Superseded);
        }
        f(&self.inner.cache);
        Ok(())
    }

    fn roll_back(&self, ctx: &WriteContext, ticket: u64) {
        let state = self.inner.state.lock();
        if ctx.token.is_cancelled() || !state.is_active(&ctx.owner) {
            self.inner.journal.discard(ticket);
            return;
        }
        self.inner.journal.rollback(ticket, &self.inner.cache);
    }

    /// Write the cache to the mirror if it still belongs to `owner`.
    fn persist(&self, owner: &OwnerId) {
        let snapshot = {
            let state = self.inner.state.lock();
            let current = state.active.clone().unwrap_or_else(OwnerId::local);
            if &current != owner {
                return;
            }
            self.inner.cache.snapshot()
        };
        if let Err(err) = self.inner.mirror.save_snapshot(owner, &snapshot) {
            tracing::warn!(owner = %owner, "mirror write failed: {err}");
        }
    }

    fn call_error(&self, err: CallError) -> SyncError {
        match err {
            CallError::Cancelled => SyncError::Superseded,
            CallError::Remote(err) => self.remote_failure(err),
        }
    }

    /// Classify a terminal remote failure; authorization failures end the session.
    fn remote_failure(&self, err: RemoteError) -> SyncError {
        if err.is_auth() {
            self.force_sign_out();
        }
        SyncError::from_remote(err)
    }

    fn set_status(&self, status: SyncStatus) {
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn report(
        &self,
        phase: SyncPhase,
        collection: Option<Collection>,
        id: Option<RecordId>,
        err: &SyncError,
    ) {
        if !err.is_user_visible() {
            return;
        }
        if let Some(on_error) = &self.inner.on_error {
            on_error(&SyncErrorEvent::new(phase, collection, id, err));
        }
    }
}

/// Drop rows that belong to another owner or collection.
fn scoped_to(owner: &OwnerId, collection: Collection, rows: Vec<Record>) -> Vec<Record> {
    let total = rows.len();
    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|r| r.owner_id() == owner && r.collection() == collection)
        .collect();
    if kept.len() != total {
        tracing::warn!(
            owner = %owner,
            %collection,
            dropped = total - kept.len(),
            "dropping rows outside the active identity"
        );
    }
    kept
}
