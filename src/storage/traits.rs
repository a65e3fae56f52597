use crate::error::StorageError;

/// Origin-scoped key-value persistence used as the durable mirror.
///
/// Synchronous: writes happen inline with the cache mutation they back up.
pub trait MirrorBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Remove every key starting with `prefix`.
    fn clear_prefix(&self, prefix: &str) -> Result<(), StorageError>;
}
