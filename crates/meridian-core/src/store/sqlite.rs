//! SQLite-backed state store

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::StateStore;
use crate::error::{Error, Result};

/// SQL to create the key-value state table
pub const CREATE_KV_STATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_state (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// State store persisting documents in a `kv_state` table
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a store from an existing connection pool
    ///
    /// Call [`SqliteStateStore::init`] before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and initialize the schema
    pub async fn connect(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", database_path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(Error::DatabaseError)?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(Error::DatabaseError)?;

        let store = Self { pool };
        store.init().await?;
        info!(path = %database_path.display(), "Opened state store");
        Ok(store)
    }

    /// In-memory database, single connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(Error::DatabaseError)?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_KV_STATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        debug!("State table initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(Error::DatabaseError)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_state (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(key = %key, bytes = value.len(), "Saved state");
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // substr comparison avoids LIKE wildcard escaping for ':' and '_' keys
        let rows = sqlx::query(
            "SELECT key FROM kv_state WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key"))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::DatabaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_upsert() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.put("meta_learning:global_params", "{\"v\":1}").await.unwrap();
        store.put("meta_learning:global_params", "{\"v\":2}").await.unwrap();
        assert_eq!(
            store.get("meta_learning:global_params").await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
    }

    #[tokio::test]
    async fn test_prefix_treats_underscore_literally() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store.put("ts_router:acme:state", "{}").await.unwrap();
        store.put("tsXrouter:acme:state", "{}").await.unwrap();
        store.put("ts_router:beta:state", "{}").await.unwrap();

        let keys = store.keys_with_prefix("ts_router:").await.unwrap();
        assert_eq!(keys, vec!["ts_router:acme:state", "ts_router:beta:state"]);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        let store = SqliteStateStore::connect(&path).await.unwrap();
        store.put("k", "v").await.unwrap();
        store.close().await;

        let reopened = SqliteStateStore::connect(&path).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
