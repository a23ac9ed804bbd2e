pub mod file_store;
pub mod http_store;
pub mod memory_store;
pub mod server;

pub use file_store::FileStore;
pub use http_store::HttpStore;
pub use memory_store::MemoryStore;

use crate::error::StoreError;
use crate::models::{GameRecord, Sport, StoredModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Kind of blob stored per sport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    TrainingData,
    Model,
}

impl BlobKind {
    pub fn key(self) -> &'static str {
        match self {
            BlobKind::TrainingData => "training_data",
            BlobKind::Model => "model",
        }
    }
}

/// Composite storage key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub sport: Sport,
    pub kind: BlobKind,
}

impl StoreKey {
    pub fn new(sport: Sport, kind: BlobKind) -> Self {
        Self { sport, kind }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sport, self.kind.key())
    }
}

/// Key-value port every persistence adapter implements.
///
/// A missing blob is `Ok(None)`, and deleting a missing blob succeeds.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError>;

    /// Replace any existing blob wholesale
    async fn put(&self, key: StoreKey, value: Value) -> Result<(), StoreError>;

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    async fn save_training_rows(&self, sport: Sport, rows: &[GameRecord]) -> Result<(), StoreError> {
        let value = serde_json::to_value(rows)?;
        self.put(StoreKey::new(sport, BlobKind::TrainingData), value)
            .await
    }

    async fn fetch_training_rows(&self, sport: Sport) -> Result<Option<Vec<GameRecord>>, StoreError> {
        match self.get(StoreKey::new(sport, BlobKind::TrainingData)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn delete_training_rows(&self, sport: Sport) -> Result<(), StoreError> {
        self.delete(StoreKey::new(sport, BlobKind::TrainingData))
            .await
    }

    async fn save_model(&self, sport: Sport, model: &StoredModel) -> Result<(), StoreError> {
        let value = serde_json::to_value(model)?;
        self.put(StoreKey::new(sport, BlobKind::Model), value).await
    }

    async fn fetch_model(&self, sport: Sport) -> Result<Option<StoredModel>, StoreError> {
        match self.get(StoreKey::new(sport, BlobKind::Model)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn delete_model(&self, sport: Sport) -> Result<(), StoreError> {
        self.delete(StoreKey::new(sport, BlobKind::Model)).await
    }
}

/// Reads from `primary`, degrading to `secondary` when the primary is
/// unavailable. Writes go to both and succeed if either does.
///
/// Keys whose write reached only one side are remembered. A key the primary
/// missed is copied back from the secondary before the primary is read
/// again, and a key the secondary missed is never served from it.
pub struct FallbackStore<P, S> {
    primary: P,
    secondary: S,
    behind: Mutex<Behind>,
}

/// Keys each side failed to write
#[derive(Default)]
struct Behind {
    primary: HashSet<StoreKey>,
    secondary: HashSet<StoreKey>,
}

impl<P: ModelStore, S: ModelStore> FallbackStore<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            behind: Mutex::new(Behind::default()),
        }
    }

    fn behind(&self) -> MutexGuard<'_, Behind> {
        self.behind
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the outcome of a write to both sides
    fn settle_write(
        &self,
        key: StoreKey,
        op: &str,
        primary: Result<(), StoreError>,
        secondary: Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if let Err(e) = &primary {
            warn!("{} of {} failed on {}: {}", op, key, self.primary.name(), e);
        }
        if let Err(e) = &secondary {
            warn!("{} of {} failed on {}: {}", op, key, self.secondary.name(), e);
        }

        let mut behind = self.behind();
        match (primary, secondary) {
            (Ok(()), Ok(())) => {
                behind.primary.remove(&key);
                behind.secondary.remove(&key);
                Ok(())
            }
            (Ok(()), Err(_)) => {
                behind.primary.remove(&key);
                behind.secondary.insert(key);
                Ok(())
            }
            (Err(_), Ok(())) => {
                behind.primary.insert(key);
                behind.secondary.remove(&key);
                Ok(())
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Copy the secondary's blob for `key` back to the primary
    async fn resync(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        let value = self.secondary.get(key).await?;
        match &value {
            Some(v) => self.primary.put(key, v.clone()).await?,
            None => self.primary.delete(key).await?,
        }
        self.behind().primary.remove(&key);
        info!("Resynced {} to {}", key, self.primary.name());
        Ok(value)
    }
}

#[async_trait]
impl<P: ModelStore, S: ModelStore> ModelStore for FallbackStore<P, S> {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
        let primary_behind = self.behind().primary.contains(&key);
        if primary_behind {
            return match self.resync(key).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(
                        "{} still behind for {} ({}), reading {}",
                        self.primary.name(),
                        key,
                        e,
                        self.secondary.name()
                    );
                    self.secondary.get(key).await
                }
            };
        }

        match self.primary.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let secondary_behind = self.behind().secondary.contains(&key);
                if secondary_behind {
                    warn!(
                        "{} unavailable for {} and {} holds a stale copy",
                        self.primary.name(),
                        key,
                        self.secondary.name()
                    );
                    return Err(e);
                }
                warn!(
                    "{} unavailable for {} ({}), reading {}",
                    self.primary.name(),
                    key,
                    e,
                    self.secondary.name()
                );
                self.secondary.get(key).await
            }
        }
    }

    async fn put(&self, key: StoreKey, value: Value) -> Result<(), StoreError> {
        let secondary = self.secondary.put(key, value.clone()).await;
        let primary = self.primary.put(key, value).await;
        self.settle_write(key, "write", primary, secondary)
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        let secondary = self.secondary.delete(key).await;
        let primary = self.primary.delete(key).await;
        self.settle_write(key, "delete", primary, secondary)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
