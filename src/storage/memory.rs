use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::traits::MirrorBackend;
use crate::error::StorageError;

/// Process-memory mirror. Survives nothing; used when no durable surface exists.
#[derive(Default)]
pub struct MemoryMirror {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl MirrorBackend for MemoryMirror {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
