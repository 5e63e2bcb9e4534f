use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{DatabaseIdentity, SchemaDescription};
use crate::services::entry_cache::PersistedEntry;

pub type PersistedSchema = PersistedEntry<DatabaseIdentity, SchemaDescription>;

/// SQLite copy of the schema cache, so descriptions survive restarts
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the store at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_cache (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL,
                inserted_at TEXT NOT NULL,
                ttl_ms INTEGER NOT NULL,
                last_accessed TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(())
    }

    /// Replace the stored cache contents with `entries`
    pub async fn save_entries(&self, entries: &[PersistedSchema]) -> SqliteResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM schema_cache", [])?;

        for entry in entries {
            let value_json = serde_json::to_string(&entry.value)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO schema_cache
                    (key, value_json, inserted_at, ttl_ms, last_accessed)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                rusqlite::params![
                    entry.key.cache_key(),
                    value_json,
                    entry.inserted_at.to_rfc3339(),
                    entry.ttl_ms as i64,
                    entry.last_accessed.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(entries.len())
    }

    /// Load every stored entry, skipping rows that no longer parse
    pub async fn load_entries(&self) -> SqliteResult<Vec<PersistedSchema>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT key, value_json, inserted_at, ttl_ms, last_accessed FROM schema_cache ORDER BY last_accessed",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, value_json, inserted_at, ttl_ms, last_accessed) = row?;
            let value: SchemaDescription = match serde_json::from_str(&value_json) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Skipping unreadable cached schema {}: {}", key, e);
                    continue;
                }
            };
            let (Some(inserted_at), Some(last_accessed)) =
                (parse_timestamp(&inserted_at), parse_timestamp(&last_accessed))
            else {
                tracing::warn!("Skipping cached schema {} with invalid timestamps", key);
                continue;
            };
            entries.push(PersistedEntry {
                key: value.identity.clone(),
                value,
                inserted_at,
                ttl_ms: ttl_ms.max(0) as u64,
                last_accessed,
            });
        }

        Ok(entries)
    }

    pub async fn count_entries(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM schema_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
