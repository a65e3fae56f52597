//! Auto-fill for record id and owner at write time.
//!
//! The id is generated client-side when a record is first written; the owner
//! is always stamped from the active identity and never taken from the caller.

use std::sync::Arc;

use crate::types::{OwnerId, Record, RecordId};

// ============================================================================
// UUID Generation
// ============================================================================

/// Generate a random UUID (v4).
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// AutofillOptions
// ============================================================================

/// Options controlling auto-fill behavior.
pub struct AutofillOptions {
    /// Owner stamped on the record.
    pub owner: OwnerId,
    /// Key generator function. Defaults to `generate_uuid()`.
    pub generate_key: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

impl AutofillOptions {
    pub fn for_owner(owner: OwnerId) -> Self {
        Self {
            owner,
            generate_key: None,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Prepare a record for its first write.
///
/// - `id`: generated if missing or blank, kept otherwise
/// - `ownerId`: always set to `opts.owner`
/// - `createdAt`: cleared; the server assigns it
/// - free-text fields: trimmed, empty descriptions dropped
pub fn autofill(record: &Record, opts: &AutofillOptions) -> Record {
    let mut filled = record.clone();
    if filled.id().is_empty() {
        let key = opts
            .generate_key
            .as_ref()
            .map(|f| f())
            .unwrap_or_else(generate_uuid);
        filled.set_id(RecordId::new(key));
    }
    filled.set_owner(opts.owner.clone());
    filled.set_created_at(None);
    normalize_text(&mut filled);
    filled
}

/// Prepare a full-replacement update: id, owner and creation time come from
/// the stored record regardless of what the caller sent.
pub fn autofill_for_update(record: &Record, existing: &Record) -> Record {
    let mut filled = record.clone();
    filled.set_id(existing.id().clone());
    filled.set_owner(existing.owner_id().clone());
    filled.set_created_at(existing.created_at());
    normalize_text(&mut filled);
    filled
}

// ============================================================================
// Core Implementation
// ============================================================================

fn normalize_text(record: &mut Record) {
    let category = record.category().trim().to_string();
    *record.category_mut() = category;

    let (description, tags) = match record {
        Record::Transaction(r) => (&mut r.description, Some(&mut r.tags)),
        Record::RecurringTemplate(r) => (&mut r.description, Some(&mut r.tags)),
        Record::BudgetGoal(_) => return,
    };
    if let Some(d) = description.as_mut() {
        *d = d.trim().to_string();
    }
    if description.as_deref().is_some_and(str::is_empty) {
        *description = None;
    }
    if let Some(tags) = tags {
        *tags = tags.iter().map(|t| t.trim().to_string()).collect();
    }
}
