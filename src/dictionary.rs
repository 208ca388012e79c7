//! Persistent dictionary of known translations.
//!
//! The dictionary is the source of truth behind the in-memory translation
//! cache. Entries are either user-defined (edited by hand, never overwritten by
//! the backend) or machine translations recorded after a successful backend call.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// One dictionary record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub source_text: String,
    pub translated_text: String,
    pub is_user_defined: bool,
    pub usage_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Key-value store of translations
pub trait DictionaryStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<DictionaryEntry>, StoreError>;

    /// Insert or replace a translation. A machine translation never replaces a
    /// user-defined entry.
    fn upsert(&self, key: &str, value: &str, is_user_defined: bool) -> Result<(), StoreError>;

    fn increment_usage(&self, key: &str) -> Result<(), StoreError>;

    fn list_all(&self) -> Result<Vec<DictionaryEntry>, StoreError>;

    /// Number of user-defined entries
    fn count_user_defined(&self) -> Result<usize, StoreError>;
}

/// Process-local dictionary (tests and ephemeral runs)
#[derive(Debug, Default)]
pub struct MemoryDictionary {
    entries: Mutex<HashMap<String, DictionaryEntry>>,
}

impl MemoryDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, DictionaryEntry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl DictionaryStore for MemoryDictionary {
    fn get(&self, key: &str) -> Result<Option<DictionaryEntry>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn upsert(&self, key: &str, value: &str, is_user_defined: bool) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            Some(existing) => {
                if existing.is_user_defined && !is_user_defined {
                    return Ok(());
                }
                existing.translated_text = value.to_string();
                existing.is_user_defined = is_user_defined;
                existing.updated_at = Utc::now();
            }
            None => {
                entries.insert(
                    key.to_string(),
                    DictionaryEntry {
                        source_text: key.to_string(),
                        translated_text: value.to_string(),
                        is_user_defined,
                        usage_count: 0,
                        updated_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    fn increment_usage(&self, key: &str) -> Result<(), StoreError> {
        if let Some(entry) = self.lock()?.get_mut(key) {
            entry.usage_count += 1;
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<DictionaryEntry>, StoreError> {
        let mut entries: Vec<_> = self.lock()?.values().cloned().collect();
        entries.sort_by(|a, b| a.source_text.cmp(&b.source_text));
        Ok(entries)
    }

    fn count_user_defined(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.values().filter(|e| e.is_user_defined).count())
    }
}

/// SQLite-backed dictionary
pub struct SqliteDictionary {
    conn: Mutex<Connection>,
}

impl SqliteDictionary {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dictionary (
                source_text TEXT PRIMARY KEY,
                translated_text TEXT NOT NULL,
                is_user_defined INTEGER NOT NULL DEFAULT 0,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dictionary_user ON dictionary(is_user_defined);
            "#,
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DictionaryEntry> {
        let updated_at: String = row.get(4)?;
        Ok(DictionaryEntry {
            source_text: row.get(0)?,
            translated_text: row.get(1)?,
            is_user_defined: row.get::<_, i64>(2)? != 0,
            usage_count: row.get::<_, i64>(3)?.max(0) as u64,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl DictionaryStore for SqliteDictionary {
    fn get(&self, key: &str) -> Result<Option<DictionaryEntry>, StoreError> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT source_text, translated_text, is_user_defined, usage_count, updated_at
                 FROM dictionary WHERE source_text = ?1",
                params![key],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert(&self, key: &str, value: &str, is_user_defined: bool) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        // Machine translations only land on rows that are not user-defined
        self.lock()?.execute(
            "INSERT INTO dictionary (source_text, translated_text, is_user_defined, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(source_text) DO UPDATE SET
                 translated_text = excluded.translated_text,
                 is_user_defined = excluded.is_user_defined,
                 updated_at = excluded.updated_at
             WHERE excluded.is_user_defined = 1 OR dictionary.is_user_defined = 0",
            params![key, value, is_user_defined as i64, now],
        )?;
        Ok(())
    }

    fn increment_usage(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.execute(
            "UPDATE dictionary SET usage_count = usage_count + 1 WHERE source_text = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<DictionaryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_text, translated_text, is_user_defined, usage_count, updated_at
             FROM dictionary ORDER BY source_text",
        )?;

        let rows = stmt.query_map([], Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn count_user_defined(&self) -> Result<usize, StoreError> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM dictionary WHERE is_user_defined = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
