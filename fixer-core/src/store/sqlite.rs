//! SQLite-backed store and schema management.

use super::Store;
use crate::{FixerError, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Thread-safe store on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a store at the specified path, creating parent directories and schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // journal_mode returns a row, so it cannot go through execute()
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        debug!(
            path = %path.display(),
            version = store.schema_version()?,
            "Offline store opened"
        );
        Ok(store)
    }

    /// Create a new in-memory store for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        conn.execute(
            "INSERT INTO store_metadata (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO NOTHING",
            [CURRENT_SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;
        let version = conn.query_row(
            "SELECT version FROM store_metadata WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FixerError::LockPoisoned("sqlite store".to_string()))
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        raw.map(|text| serde_json::from_str(&text).map_err(FixerError::from))
            .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, text, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_set_get_delete() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("queue.reports").unwrap().is_none());

        store.set("queue.reports", &json!([{"id": "a"}])).unwrap();
        assert_eq!(
            store.get("queue.reports").unwrap(),
            Some(json!([{"id": "a"}]))
        );

        store.set("queue.reports", &json!([])).unwrap();
        assert_eq!(store.get("queue.reports").unwrap(), Some(json!([])));

        store.delete("queue.reports").unwrap();
        assert!(store.get("queue.reports").unwrap().is_none());
    }

    #[test]
    fn schema_version_is_recorded() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("offline.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("cache.resources", &json!({"n": 2})).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("cache.resources").unwrap(),
            Some(json!({"n": 2}))
        );
    }
}
