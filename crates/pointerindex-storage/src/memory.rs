//! In-memory storage backend.
//!
//! Stores event records, pointers, and checkpoints in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use pointerindex_core::checkpoint::{Checkpoint, CheckpointStore};
use pointerindex_core::error::IndexerError;
use pointerindex_core::pointer::IdentityPointer;
use pointerindex_core::store::{DocumentStore, EventStore, PointerCounts, PointerStore};
use pointerindex_core::types::{EventKey, EventKind, LedgerEvent};

/// In-memory document store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    events: Mutex<BTreeMap<EventKey, LedgerEvent>>,
    pointers: Mutex<HashMap<String, IdentityPointer>>,
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    /// Writes allowed before failing; `None` = unlimited.
    write_budget: Mutex<Option<u64>>,
    unreachable: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sorted(mut events: Vec<LedgerEvent>) -> Vec<LedgerEvent> {
    events.sort_by(|a, b| {
        a.position()
            .cmp(&b.position())
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
    });
    events
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error (until cleared).
    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.write_budget) = if fail { Some(0) } else { None };
    }

    /// Let `n` more writes succeed, then fail every write after them.
    pub fn fail_writes_after(&self, n: u64) {
        *lock(&self.write_budget) = Some(n);
    }

    /// Make [`DocumentStore::ping`] fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), IndexerError> {
        let mut budget = lock(&self.write_budget);
        match budget.as_mut() {
            None => Ok(()),
            Some(0) => Err(IndexerError::Storage("write rejected (injected failure)".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }

    /// Total number of event records.
    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    /// Snapshot of every pointer, keyed by identity hash.
    pub fn pointers(&self) -> BTreeMap<String, IdentityPointer> {
        lock(&self.pointers)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn insert_event(&self, event: &LedgerEvent) -> Result<bool, IndexerError> {
        self.check_writable()?;
        let mut events = lock(&self.events);
        let key = event.key();
        if events.contains_key(&key) {
            return Ok(false);
        }
        events.insert(key, event.clone());
        Ok(true)
    }

    async fn events_by_identity(
        &self,
        identity_hash: &str,
    ) -> Result<Vec<LedgerEvent>, IndexerError> {
        Ok(sorted(
            lock(&self.events)
                .values()
                .filter(|e| e.identity_hash == identity_hash)
                .cloned()
                .collect(),
        ))
    }

    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<LedgerEvent>, IndexerError> {
        Ok(sorted(
            lock(&self.events)
                .values()
                .filter(|e| e.kind == kind)
                .cloned()
                .collect(),
        ))
    }

    async fn event_counts(&self) -> Result<BTreeMap<EventKind, u64>, IndexerError> {
        let mut counts = BTreeMap::new();
        for event in lock(&self.events).values() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl PointerStore for InMemoryStorage {
    async fn get_pointer(
        &self,
        identity_hash: &str,
    ) -> Result<Option<IdentityPointer>, IndexerError> {
        Ok(lock(&self.pointers).get(identity_hash).cloned())
    }

    async fn put_pointer(&self, pointer: &IdentityPointer) -> Result<(), IndexerError> {
        self.check_writable()?;
        lock(&self.pointers).insert(pointer.identity_hash.clone(), pointer.clone());
        Ok(())
    }

    async fn pointers_by_owner(&self, owner: &str) -> Result<Vec<IdentityPointer>, IndexerError> {
        let mut out: Vec<_> = lock(&self.pointers)
            .values()
            .filter(|p| p.owner.eq_ignore_ascii_case(owner))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.identity_hash.cmp(&b.identity_hash));
        Ok(out)
    }

    async fn pointer_counts(&self) -> Result<PointerCounts, IndexerError> {
        let pointers = lock(&self.pointers);
        Ok(PointerCounts {
            total: pointers.len() as u64,
            active: pointers.values().filter(|p| p.active).count() as u64,
        })
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(lock(&self.checkpoints).get(indexer_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.check_writable()?;
        lock(&self.checkpoints).insert(checkpoint.indexer_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        lock(&self.checkpoints).remove(indexer_id);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStorage {
    async fn ping(&self) -> Result<(), IndexerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("store unreachable".into()));
        }
        Ok(())
    }
}
