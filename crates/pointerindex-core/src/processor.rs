//! Event processor: classifies raw events, records them, and hands them to
//! the materializer.
//!
//! Every producer (historical scanner, live listener) goes through one
//! processor, which applies events one at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::{classify, LedgerAddresses};
use crate::materializer::PointerMaterializer;
use crate::store::DocumentStore;
use crate::types::RawLedgerEvent;

/// Counters for processed events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    pub events_seen: u64,
    pub events_applied: u64,
    /// Events whose record already existed (redelivery).
    pub duplicates: u64,
    pub skipped_unknown: u64,
    pub skipped_malformed: u64,
}

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Unconfigured ledger or unrecognized signature.
    Unrecognized,
    /// Recognized signature with undecodable fields.
    Malformed,
}

/// Result of processing one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied {
        /// `false` if the event record already existed.
        new_record: bool,
        pointer_changed: bool,
    },
    Skipped(SkipReason),
}

pub struct EventProcessor {
    ledgers: LedgerAddresses,
    store: Arc<dyn DocumentStore>,
    materializer: PointerMaterializer,
    metrics: Mutex<ProcessorMetrics>,
    apply_lock: tokio::sync::Mutex<()>,
}

impl EventProcessor {
    pub fn new(ledgers: LedgerAddresses, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            ledgers,
            materializer: PointerMaterializer::new(store.clone()),
            store,
            metrics: Mutex::new(ProcessorMetrics::default()),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> ProcessorMetrics {
        self.lock_metrics().clone()
    }

    fn lock_metrics(&self) -> MutexGuard<'_, ProcessorMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self, f: impl FnOnce(&mut ProcessorMetrics)) {
        f(&mut self.lock_metrics());
    }

    /// Process one raw event.
    ///
    /// Unknown and malformed events are skipped and logged. A storage failure
    /// is returned so the caller can abort its batch; the event record and the
    /// pointer write are both idempotent, so retrying the batch is safe.
    pub async fn process(&self, raw: &RawLedgerEvent) -> Result<ProcessOutcome, IndexerError> {
        self.bump(|m| m.events_seen += 1);

        let classified = match classify(raw, &self.ledgers) {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(
                    ledger = %raw.address,
                    signature = %raw.signature,
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    "skipping unrecognized event"
                );
                self.bump(|m| m.skipped_unknown += 1);
                return Ok(ProcessOutcome::Skipped(SkipReason::Unrecognized));
            }
            Err(e) => {
                tracing::warn!(
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    error = %e,
                    "skipping malformed event"
                );
                self.bump(|m| m.skipped_malformed += 1);
                return Ok(ProcessOutcome::Skipped(SkipReason::Malformed));
            }
        };

        let _guard = self.apply_lock.lock().await;

        let record = classified.to_record()?;
        let new_record = self.store.insert_event(&record).await?;
        if !new_record {
            self.bump(|m| m.duplicates += 1);
        }
        // Materialize even for a known record: a crash between the record
        // write and the pointer write leaves the pointer behind.
        let pointer_changed = self.materializer.apply(&classified).await?;
        self.bump(|m| m.events_applied += 1);

        tracing::debug!(
            kind = %classified.kind(),
            identity_hash = classified.event.identity_hash(),
            block = classified.position.block_number,
            log_index = classified.position.log_index,
            new_record,
            pointer_changed,
            "event applied"
        );

        Ok(ProcessOutcome::Applied {
            new_record,
            pointer_changed,
        })
    }
}
