//! Optimistic mutation journal: what the cache looked like before a change
//! that has been applied locally but not yet confirmed remotely.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::storage::LocalCache;
use crate::types::{Collection, Record, RecordId};

/// Local change awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingAction {
    Remove,
    Replace,
}

#[derive(Debug, Clone)]
pub(crate) struct JournalEntry {
    pub collection: Collection,
    pub id: RecordId,
    pub action: PendingAction,
    /// Position the record occupied before the change.
    pub index: usize,
    /// Value before the change.
    pub prior: Record,
}

#[derive(Default)]
pub(crate) struct MutationJournal {
    entries: Mutex<HashMap<u64, JournalEntry>>,
    next: Mutex<u64>,
}

impl MutationJournal {
    pub fn record(&self, entry: JournalEntry) -> u64 {
        let ticket = {
            let mut next = self.next.lock();
            *next += 1;
            *next
        };
        self.entries.lock().insert(ticket, entry);
        ticket
    }

    /// The remote change was confirmed; forget the prior state.
    pub fn commit(&self, ticket: u64) {
        self.entries.lock().remove(&ticket);
    }

    /// Forget the entry without touching the cache (the cache it described
    /// no longer exists).
    pub fn discard(&self, ticket: u64) {
        self.entries.lock().remove(&ticket);
    }

    /// Put the prior state back into `cache`. Returns the restored record.
    pub fn rollback(&self, ticket: u64, cache: &LocalCache) -> Option<Record> {
        let entry = self.entries.lock().remove(&ticket)?;
        tracing::debug!(
            collection = %entry.collection,
            record_id = %entry.id,
            action = ?entry.action,
            "rolling back optimistic change"
        );
        cache.restore(entry.index, entry.prior.clone());
        Some(entry.prior)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
