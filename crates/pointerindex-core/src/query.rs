//! Read-only query surface over the mirror, for an external API layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::identity::{identity_hash, normalize_hash};
use crate::pointer::IdentityPointer;
use crate::store::DocumentStore;
use crate::types::{EventKind, LedgerEvent};

/// Aggregate mirror statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStats {
    /// Highest fully-processed block, if any batch has completed.
    pub checkpoint: Option<u64>,
    pub total_events: u64,
    pub events_by_kind: BTreeMap<EventKind, u64>,
    pub pointers: u64,
    pub active_pointers: u64,
}

/// Query handle. Cheap to clone; safe to use while the indexer writes.
#[derive(Clone)]
pub struct MirrorQuery {
    store: Arc<dyn DocumentStore>,
    indexer_id: String,
}

impl MirrorQuery {
    pub fn new(store: Arc<dyn DocumentStore>, indexer_id: impl Into<String>) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
        }
    }

    pub async fn events_by_identity_hash(
        &self,
        hash: &str,
    ) -> Result<Vec<LedgerEvent>, IndexerError> {
        self.store.events_by_identity(&normalize_hash(hash)).await
    }

    pub async fn events_by_identity(&self, identity: &str) -> Result<Vec<LedgerEvent>, IndexerError> {
        self.store.events_by_identity(&identity_hash(identity)).await
    }

    pub async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<LedgerEvent>, IndexerError> {
        self.store.events_by_kind(kind).await
    }

    pub async fn pointer_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<IdentityPointer>, IndexerError> {
        self.store.get_pointer(&normalize_hash(hash)).await
    }

    pub async fn pointer(&self, identity: &str) -> Result<Option<IdentityPointer>, IndexerError> {
        self.store.get_pointer(&identity_hash(identity)).await
    }

    pub async fn pointers_by_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<IdentityPointer>, IndexerError> {
        self.store.pointers_by_owner(&owner.to_ascii_lowercase()).await
    }

    pub async fn stats(&self) -> Result<IndexerStats, IndexerError> {
        let checkpoint = self
            .store
            .load(&self.indexer_id)
            .await?
            .map(|cp| cp.block_number);
        let events_by_kind = self.store.event_counts().await?;
        let counts = self.store.pointer_counts().await?;
        Ok(IndexerStats {
            checkpoint,
            total_events: events_by_kind.values().sum(),
            events_by_kind,
            pointers: counts.total,
            active_pointers: counts.active,
        })
    }
}
