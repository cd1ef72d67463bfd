//! Key-value persistence for routing state
//!
//! Tenant routing state and the aggregated global parameters are stored as
//! JSON documents under string keys. The store is injected wherever it is
//! needed; nothing in the crate reaches for a global connection.
//!
//! # Implementations
//!
//! - [`InMemoryStateStore`]: process-local map, used by tests and the simulator
//! - [`NoopStateStore`]: accepts writes and forgets them
//! - [`SqliteStateStore`]: single `kv_state` table in SQLite

mod memory;
mod sqlite;

pub use memory::InMemoryStateStore;
pub use sqlite::{CREATE_KV_STATE_TABLE_SQL, SqliteStateStore};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Key-value store holding JSON documents
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace the value under `key`
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a JSON document
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON document
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw).await
}

/// Store that discards writes and never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStateStore;

#[async_trait]
impl StateStore for NoopStateStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
