use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StateStore;
use crate::error::Result;

/// Process-local state store
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let store = InMemoryStateStore::new();
        assert!(store.is_empty().await);
        store.put("a", "1").await.unwrap();
        store.put("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_prefix_scan() {
        let store = InMemoryStateStore::new();
        store.put("ts_router:acme:state", "{}").await.unwrap();
        store.put("bandit:agent_routing:zeta:state", "{}").await.unwrap();
        store.put("bandit:agent_routing:acme:state", "{}").await.unwrap();
        store.put("bandit:other", "{}").await.unwrap();

        let keys = store.keys_with_prefix("bandit:agent_routing:").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "bandit:agent_routing:acme:state".to_string(),
                "bandit:agent_routing:zeta:state".to_string(),
            ]
        );
    }
}
