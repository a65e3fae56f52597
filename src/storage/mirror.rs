//! Typed view over a `MirrorBackend`: cache snapshots and the credential
//! snapshot, namespaced under one key prefix.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::traits::MirrorBackend;
use crate::error::StorageError;
use crate::remote::types::Session;
use crate::types::{CacheSnapshot, OwnerId};

const SNAPSHOT_KEY: &str = "snapshot";
const SESSION_KEY: &str = "session";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MirroredSnapshot {
    owner: OwnerId,
    saved_at: DateTime<Utc>,
    snapshot: CacheSnapshot,
}

/// Best-effort backup of the cache. Never authoritative while signed in.
#[derive(Clone)]
pub struct DurableMirror {
    backend: Arc<dyn MirrorBackend>,
    namespace: String,
}

impl DurableMirror {
    pub fn new(backend: Arc<dyn MirrorBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    pub fn save_snapshot(
        &self,
        owner: &OwnerId,
        snapshot: &CacheSnapshot,
    ) -> Result<(), StorageError> {
        let entry = MirroredSnapshot {
            owner: owner.clone(),
            saved_at: Utc::now(),
            snapshot: snapshot.clone(),
        };
        self.backend
            .set(&self.key(SNAPSHOT_KEY), &serde_json::to_string(&entry)?)
    }

    /// The last snapshot written for `owner`. Snapshots of other owners are
    /// never returned.
    pub fn load_snapshot(&self, owner: &OwnerId) -> Result<Option<CacheSnapshot>, StorageError> {
        let Some(raw) = self.backend.get(&self.key(SNAPSHOT_KEY))? else {
            return Ok(None);
        };
        let entry: MirroredSnapshot = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("ignoring unreadable mirror snapshot: {err}");
                return Ok(None);
            }
        };
        if &entry.owner != owner {
            return Ok(None);
        }
        let mut snapshot = entry.snapshot;
        let dropped = snapshot.retain_owner(owner);
        if dropped > 0 {
            tracing::warn!(owner = %owner, dropped, "mirror snapshot held foreign records");
        }
        Ok(Some(snapshot))
    }

    pub fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.backend
            .set(&self.key(SESSION_KEY), &serde_json::to_string(session)?)
    }

    /// The persisted credential snapshot, unless it has expired by `now`.
    pub fn load_session(&self, now: DateTime<Utc>) -> Result<Option<Session>, StorageError> {
        let Some(raw) = self.backend.get(&self.key(SESSION_KEY))? else {
            return Ok(None);
        };
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!("ignoring unreadable session snapshot: {err}");
                return Ok(None);
            }
        };
        if session.is_expired_at(now) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.backend.remove(&self.key(SESSION_KEY))
    }

    /// Remove everything this mirror wrote.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear_prefix(&format!("{}:", self.namespace))
    }
}
