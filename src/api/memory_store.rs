use super::{ModelStore, StoreKey};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store, used as a local cache and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<StoreKey, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        Ok(self.blobs.read().await.get(&key).cloned())
    }

    async fn put(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        self.blobs.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        self.blobs.write().await.remove(&key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameRecord, Sport};

    #[tokio::test]
    async fn test_training_rows_replace_wholesale() {
        let store = MemoryStore::new();
        assert_eq!(store.fetch_training_rows(Sport::Mlb).await.unwrap(), None);

        let first = vec![GameRecord::new("A", "B"), GameRecord::new("C", "D")];
        store.save_training_rows(Sport::Mlb, &first).await.unwrap();
        let second = vec![GameRecord::new("E", "F")];
        store.save_training_rows(Sport::Mlb, &second).await.unwrap();

        assert_eq!(
            store.fetch_training_rows(Sport::Mlb).await.unwrap(),
            Some(second)
        );
        // Other sports are untouched
        assert_eq!(store.fetch_training_rows(Sport::Nhl).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.delete_model(Sport::Nfl).await.unwrap();
        store.delete_training_rows(Sport::Nfl).await.unwrap();
    }
}
