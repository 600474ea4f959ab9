//! Document Store traits.
//!
//! The store keeps three collections: immutable [`LedgerEvent`] records keyed
//! by `(tx_hash, log_index)`, mutable [`IdentityPointer`]s keyed by identity
//! hash, and one [`Checkpoint`](crate::checkpoint::Checkpoint) per indexer.
//! Backends live in `pointerindex-storage`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::error::IndexerError;
use crate::pointer::IdentityPointer;
use crate::types::{EventKind, LedgerEvent};

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert `event` unless its key already exists.
    ///
    /// Returns `true` if a new record was written, `false` on key conflict.
    async fn insert_event(&self, event: &LedgerEvent) -> Result<bool, IndexerError>;

    /// Events for one identity, ordered by `(block_number, log_index)`.
    async fn events_by_identity(&self, identity_hash: &str)
        -> Result<Vec<LedgerEvent>, IndexerError>;

    /// Events of one kind, ordered by `(block_number, log_index)`.
    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<LedgerEvent>, IndexerError>;

    /// Number of stored events per kind.
    async fn event_counts(&self) -> Result<BTreeMap<EventKind, u64>, IndexerError>;
}

/// Pointer counts for stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerCounts {
    pub total: u64,
    pub active: u64,
}

/// Mutable pointer collection.
#[async_trait]
pub trait PointerStore: Send + Sync {
    async fn get_pointer(&self, identity_hash: &str)
        -> Result<Option<IdentityPointer>, IndexerError>;

    /// Upsert by `identity_hash`.
    async fn put_pointer(&self, pointer: &IdentityPointer) -> Result<(), IndexerError>;

    /// Pointers currently owned by `owner` (case-insensitive).
    async fn pointers_by_owner(&self, owner: &str) -> Result<Vec<IdentityPointer>, IndexerError>;

    async fn pointer_counts(&self) -> Result<PointerCounts, IndexerError>;
}

/// A full Document Store backend.
#[async_trait]
pub trait DocumentStore: EventStore + PointerStore + CheckpointStore {
    /// Verify the backend is reachable. Failure here is fatal at startup.
    async fn ping(&self) -> Result<(), IndexerError>;
}
