//! Checkpoint manager: persists the highest fully-processed block height.
//!
//! The checkpoint only moves forward, and callers advance it only after every
//! event at or below the new height has been durably applied. On restart the
//! indexer resumes at `checkpoint + 1`; with no checkpoint it starts
//! `lookback_window` blocks behind the head.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::IndexerError;

/// A persisted checkpoint for an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Highest block height guaranteed fully processed.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Single-record checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for `indexer_id`.
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting an indexer).
    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError>;
}

/// Reads and monotonically advances one indexer's checkpoint.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    indexer_id: String,
    lookback_window: u64,
    /// Serializes read-compare-write in [`CheckpointManager::set`].
    write_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        indexer_id: impl Into<String>,
        lookback_window: u64,
    ) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
            lookback_window,
            write_lock: Mutex::new(()),
        }
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    /// The stored height, if any.
    pub async fn stored(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.store.load(&self.indexer_id).await?.map(|cp| cp.block_number))
    }

    /// Last known height, or `head - lookback_window` if none exists yet.
    pub async fn get(&self, head: u64) -> Result<u64, IndexerError> {
        Ok(self
            .stored()
            .await?
            .unwrap_or_else(|| head.saturating_sub(self.lookback_window)))
    }

    /// First block that still needs scanning.
    pub async fn resume_from(&self, head: u64) -> Result<u64, IndexerError> {
        Ok(match self.stored().await? {
            Some(height) => height + 1,
            None => head.saturating_sub(self.lookback_window),
        })
    }

    /// Advance the checkpoint to `height`.
    ///
    /// Callers must only pass a height whose events have all been applied.
    /// A height at or below the stored one is ignored; returns whether the
    /// checkpoint moved.
    pub async fn set(&self, height: u64) -> Result<bool, IndexerError> {
        let _guard = self.write_lock.lock().await;
        if let Some(current) = self.stored().await? {
            if height <= current {
                tracing::debug!(current, requested = height, "checkpoint not advanced");
                return Ok(false);
            }
        }
        self.store
            .save(Checkpoint {
                indexer_id: self.indexer_id.clone(),
                block_number: height,
                updated_at: chrono::Utc::now().timestamp(),
            })
            .await?;
        tracing::info!(indexer = %self.indexer_id, block = height, "checkpoint advanced");
        Ok(true)
    }

    /// Forget the checkpoint so the next run starts from the lookback window.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&self.indexer_id).await?;
        tracing::warn!(indexer = %self.indexer_id, "checkpoint reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Checkpoint rows keyed by indexer id.
    #[derive(Default)]
    struct Rows(StdMutex<HashMap<String, Checkpoint>>);

    impl Rows {
        fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, Checkpoint>> {
            self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl CheckpointStore for Rows {
        async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
            Ok(self.rows().get(indexer_id).cloned())
        }

        async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
            self.rows().insert(checkpoint.indexer_id.clone(), checkpoint);
            Ok(())
        }

        async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
            self.rows().remove(indexer_id);
            Ok(())
        }
    }

    fn manager(lookback: u64) -> CheckpointManager {
        CheckpointManager::new(Arc::new(Rows::default()), "mirror", lookback)
    }

    #[tokio::test]
    async fn default_is_head_minus_lookback() {
        let mgr = manager(100);
        assert_eq!(mgr.get(1_000).await.unwrap(), 900);
        assert_eq!(mgr.get(50).await.unwrap(), 0);
        assert_eq!(mgr.resume_from(1_000).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn set_then_get() {
        let mgr = manager(100);
        assert!(mgr.set(500).await.unwrap());
        assert_eq!(mgr.get(1_000).await.unwrap(), 500);
        assert_eq!(mgr.resume_from(1_000).await.unwrap(), 501);
    }

    #[tokio::test]
    async fn never_moves_backwards() {
        let mgr = manager(100);
        mgr.set(500).await.unwrap();
        assert!(!mgr.set(400).await.unwrap());
        assert!(!mgr.set(500).await.unwrap());
        assert_eq!(mgr.stored().await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn survives_manager_restart() {
        let store: Arc<dyn CheckpointStore> = Arc::new(Rows::default());
        CheckpointManager::new(store.clone(), "mirror", 10).set(77).await.unwrap();
        let reopened = CheckpointManager::new(store, "mirror", 10);
        assert_eq!(reopened.stored().await.unwrap(), Some(77));
    }

    #[tokio::test]
    async fn reset_forgets_height() {
        let mgr = manager(10);
        mgr.set(42).await.unwrap();
        mgr.reset().await.unwrap();
        assert_eq!(mgr.stored().await.unwrap(), None);
        assert_eq!(mgr.get(100).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn store_lock_recovers_after_panic() {
        let store = Arc::new(Rows::default());
        let mgr = CheckpointManager::new(store.clone(), "mirror", 10);
        mgr.set(5).await.unwrap();

        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _rows = holder.0.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert_eq!(mgr.stored().await.unwrap(), Some(5));
        assert!(mgr.set(6).await.unwrap());
    }
}
