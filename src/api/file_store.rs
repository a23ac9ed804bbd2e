use super::{ModelStore, StoreKey};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-sport JSON blobs on disk: `<root>/<sport>_<kind>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        self.root
            .join(format!("{}_{}.json", key.sport, key.kind.key()))
    }
}

#[async_trait]
impl ModelStore for FileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(&value)?;

        // Write then rename so readers never see a half-written blob
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved {} to {}", key, path.display());
        Ok(())
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BlobKind;
    use crate::models::{GameRecord, Sport};

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "betting_model_{}_{}",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let root = temp_root("file_store");
        let store = FileStore::new(&root);

        let mut game = GameRecord::new("Celtics", "Knicks");
        game.team1_moneyline = Some(-250);
        game.features.insert("team1_last5".to_string(), 0.8);
        store
            .save_training_rows(Sport::Nba, &[game.clone()])
            .await
            .unwrap();

        assert!(root.join("nba_training_data.json").exists());
        let rows = store.fetch_training_rows(Sport::Nba).await.unwrap();
        assert_eq!(rows, Some(vec![game]));

        store.delete_training_rows(Sport::Nba).await.unwrap();
        store.delete_training_rows(Sport::Nba).await.unwrap();
        assert_eq!(store.fetch_training_rows(Sport::Nba).await.unwrap(), None);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_missing_root_reads_as_empty() {
        let store = FileStore::new(temp_root("missing").join("nope"));
        let key = StoreKey::new(Sport::Nhl, BlobKind::Model);
        assert_eq!(store.get(key).await.unwrap(), None);
    }
}
