//! LocalCache: the in-memory copy of the three collections the UI reads.
//!
//! Reads are public. Every mutator is crate-private: only the sync
//! coordinator writes, so all writes pass its ownership and ordering checks.
//! Each mutation bumps the collection's generation and recomputes capacity.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::capacity::CapacityGuard;
use crate::types::{
    BudgetGoal, CacheSnapshot, Collection, EntryType, Record, RecordId, RecurringTemplate,
    Transaction,
};

#[derive(Default)]
struct CacheState {
    snapshot: CacheSnapshot,
    /// Bumped on every mutation of the collection.
    generations: [u64; 3],
    /// Mutations whose remote call has not settled yet.
    pending: [usize; 3],
}

pub struct LocalCache {
    state: Mutex<CacheState>,
    capacity: Arc<CapacityGuard>,
    /// Monotonic revision, bumped on every change; UIs re-render on change.
    revision: watch::Sender<u64>,
}

impl LocalCache {
    pub fn new(capacity: Arc<CapacityGuard>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(CacheState::default()),
            capacity,
            revision,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> CacheSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().snapshot.transactions.clone()
    }

    pub fn budget_goals(&self) -> Vec<BudgetGoal> {
        self.state.lock().snapshot.budget_goals.clone()
    }

    pub fn recurring_templates(&self) -> Vec<RecurringTemplate> {
        self.state.lock().snapshot.recurring_templates.clone()
    }

    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.state.lock().snapshot.records(collection)
    }

    pub fn get(&self, collection: Collection, id: &RecordId) -> Option<Record> {
        self.state.lock().snapshot.get(collection, id)
    }

    pub fn contains(&self, collection: Collection, id: &RecordId) -> bool {
        self.get(collection, id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct transaction categories, optionally for one entry type.
    ///
    /// Categories are free text; spellings differing only in case collapse to
    /// the first one seen. Sorted case-insensitively.
    pub fn categories(&self, entry_type: Option<EntryType>) -> Vec<String> {
        let state = self.state.lock();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for tx in &state.snapshot.transactions {
            if entry_type.is_some_and(|t| t != tx.entry_type) {
                continue;
            }
            let label = tx.category.trim();
            if label.is_empty() {
                continue;
            }
            seen.entry(label.to_lowercase())
                .or_insert_with(|| label.to_string());
        }
        seen.into_values().collect()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // -----------------------------------------------------------------------
    // Coordinator-only writes
    // -----------------------------------------------------------------------

    pub(crate) fn generation(&self, collection: Collection) -> u64 {
        self.state.lock().generations[collection.index()]
    }

    pub(crate) fn has_pending(&self, collection: Collection) -> bool {
        self.state.lock().pending[collection.index()] > 0
    }

    /// Mark a mutation of `collection` as in flight until the guard drops.
    /// Authoritative reads are not applied to the collection meanwhile.
    pub(crate) fn begin_mutation(&self, collection: Collection) -> PendingMutation<'_> {
        self.state.lock().pending[collection.index()] += 1;
        PendingMutation {
            cache: self,
            collection,
        }
    }

    fn end_mutation(&self, collection: Collection) {
        let mut state = self.state.lock();
        let slot = &mut state.pending[collection.index()];
        *slot = slot.saturating_sub(1);
    }

    pub(crate) fn replace_all(&self, snapshot: CacheSnapshot) {
        self.mutate(&Collection::ALL, |s| *s = snapshot);
    }

    pub(crate) fn replace_collection(&self, collection: Collection, records: Vec<Record>) {
        self.mutate(&[collection], |s| s.set_collection(collection, records));
    }

    /// Apply an authoritative read only if nothing touched the collection since
    /// `since_generation` and no mutation is in flight. Returns whether applied.
    pub(crate) fn replace_collection_if_current(
        &self,
        collection: Collection,
        records: Vec<Record>,
        since_generation: u64,
    ) -> bool {
        let applied = {
            let mut state = self.state.lock();
            let i = collection.index();
            if state.generations[i] != since_generation || state.pending[i] > 0 {
                false
            } else {
                state.snapshot.set_collection(collection, records);
                state.generations[i] += 1;
                self.after_change(&state);
                true
            }
        };
        if applied {
            self.bump_revision();
        }
        applied
    }

    pub(crate) fn upsert(&self, record: Record) {
        let collection = record.collection();
        self.mutate(&[collection], |s| s.upsert(record));
    }

    /// Swap in `record` for the entry with the same id, keeping its position.
    /// Returns the position and the value it replaced; `None` leaves the
    /// cache unchanged.
    pub(crate) fn replace(&self, record: Record) -> Option<(usize, Record)> {
        let collection = record.collection();
        if !self.contains(collection, record.id()) {
            return None;
        }
        let mut prior = None;
        self.mutate(&[collection], |s| {
            if let Some((index, old)) = s.remove(collection, record.id()) {
                s.insert_at(index, record);
                prior = Some((index, old));
            }
        });
        prior
    }

    pub(crate) fn remove(&self, collection: Collection, id: &RecordId) -> Option<(usize, Record)> {
        let mut removed = None;
        self.mutate(&[collection], |s| removed = s.remove(collection, id));
        removed
    }

    pub(crate) fn restore(&self, index: usize, record: Record) {
        let collection = record.collection();
        self.mutate(&[collection], |s| s.insert_at(index, record));
    }

    pub(crate) fn clear(&self) {
        self.mutate(&Collection::ALL, |s| *s = CacheSnapshot::default());
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn mutate(&self, touched: &[Collection], f: impl FnOnce(&mut CacheSnapshot)) {
        {
            let mut state = self.state.lock();
            f(&mut state.snapshot);
            for c in touched {
                state.generations[c.index()] += 1;
            }
            self.after_change(&state);
        }
        self.bump_revision();
    }

    fn after_change(&self, state: &CacheState) {
        self.capacity.recompute(&state.snapshot);
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

pub(crate) struct PendingMutation<'a> {
    cache: &'a LocalCache,
    collection: Collection,
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) {
        self.cache.end_mutation(self.collection);
    }
}
