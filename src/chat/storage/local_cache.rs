//! Local key/value cache backing threads, credentials and flags.
//!
//! Writes overwrite the full value of a key in one statement, so a reader never
//! observes a partially written thread list.

use std::path::Path;
use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::storage::keys::CacheKey;

/// Synchronous string store addressed by [`CacheKey`].
pub trait LocalCache: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, key: &CacheKey) -> ChatResult<Option<String>>;

    /// Overwrite a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set(&self, key: &CacheKey, value: &str) -> ChatResult<()>;

    /// Delete a value; deleting a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, key: &CacheKey) -> ChatResult<()>;
}

/// `SQLite` implementation of the local cache.
pub struct SqliteLocalCache {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteLocalCache {
    /// Open (or create) the cache file described by `config`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(config: &StorageConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.sqlite_path)?;
        Self::init(conn, &config.table)
    }

    /// Open a cache at an explicit path with the default table name.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open_path(path: impl AsRef<Path>) -> ChatResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, &StorageConfig::default().table)
    }

    /// Create a cache that lives only as long as this value.
    ///
    /// # Errors
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, &StorageConfig::default().table)
    }

    fn init(conn: Connection, table: &str) -> ChatResult<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> ChatResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ChatError::Cache("sqlite connection lock poisoned".to_string()))?;
        Ok(f(&conn)?)
    }
}

impl LocalCache for SqliteLocalCache {
    fn get(&self, key: &CacheKey) -> ChatResult<Option<String>> {
        let table = &self.table;
        let key = key.storage_key();
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT value FROM {table} WHERE key = ?1"),
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &CacheKey, value: &str) -> ChatResult<()> {
        let table = &self.table;
        let key = key.storage_key();
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table} (key, value, updated_at)
                     VALUES (?1, ?2, ?3)"
                ),
                rusqlite::params![key, value, now_ms],
            )
        })?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> ChatResult<()> {
        let table = &self.table;
        let key = key.storage_key();
        self.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {table} WHERE key = ?1"),
                rusqlite::params![key],
            )
        })?;
        Ok(())
    }
}

/// In-memory implementation, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryLocalCache {
    entries: DashMap<String, String>,
}

impl MemoryLocalCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocalCache for MemoryLocalCache {
    fn get(&self, key: &CacheKey) -> ChatResult<Option<String>> {
        Ok(self
            .entries
            .get(&key.storage_key())
            .map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &CacheKey, value: &str) -> ChatResult<()> {
        self.entries.insert(key.storage_key(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> ChatResult<()> {
        self.entries.remove(&key.storage_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::ids::Identity;
    use crate::chat::core::provider::Provider;

    fn exercise(cache: &dyn LocalCache) {
        let who = Identity::new("a@x.com").unwrap();
        let key = CacheKey::Credential(who.clone(), Provider::OpenAi);

        assert_eq!(cache.get(&key).unwrap(), None);
        cache.set(&key, "sk-1").unwrap();
        cache.set(&key, "sk-2").unwrap();
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some("sk-2"));
        assert_eq!(cache.get(&CacheKey::Threads(who)).unwrap(), None);

        cache.remove(&key).unwrap();
        cache.remove(&key).unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn test_sqlite_cache_overwrites_and_removes() {
        let cache = SqliteLocalCache::in_memory().unwrap();
        exercise(&cache);
    }

    #[test]
    fn test_memory_cache_overwrites_and_removes() {
        let cache = MemoryLocalCache::new();
        exercise(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sqlite_cache_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "medlife_cache_{}.sqlite",
            uuid::Uuid::new_v4()
        ));
        {
            let cache = SqliteLocalCache::open_path(&path).unwrap();
            cache.set(&CacheKey::LastIdentity, "a@x.com").unwrap();
        }
        let reopened = SqliteLocalCache::open_path(&path).unwrap();
        assert_eq!(
            reopened.get(&CacheKey::LastIdentity).unwrap().as_deref(),
            Some("a@x.com")
        );
        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }
}
