//! SQLite-backed durable mirror: a single key-value table.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::MirrorBackend;
use crate::error::StorageError;

pub struct SqliteMirror {
    conn: Mutex<Connection>,
}

impl SqliteMirror {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::initialize(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mirror (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MirrorBackend for SqliteMirror {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM mirror WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO mirror (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("DELETE FROM mirror WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "DELETE FROM mirror WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(())
    }
}
