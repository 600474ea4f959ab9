//! Historical scanner: replays a bounded block range through the processor.
//!
//! The range is walked in `batch_size` chunks. For each chunk every
//! configured ledger is queried, its events are applied in
//! `(block, log index)` order, and only then is the checkpoint advanced to the
//! chunk's end. Any failure returns before the checkpoint moves, so the next
//! attempt rescans the same chunk.
//!
//! A range that starts past `checkpoint + 1` is applied but never moves the
//! checkpoint; the blocks in between are still unprocessed.

use std::sync::Arc;
use std::time::Duration;

use pointerindex_core::checkpoint::CheckpointManager;
use pointerindex_core::error::IndexerError;
use pointerindex_core::processor::{EventProcessor, ProcessOutcome};
use pointerindex_core::retry::RetryPolicy;
use pointerindex_core::source::LedgerEventSource;

/// Summary of a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub from: u64,
    pub to: u64,
    pub events: usize,
    pub applied: usize,
    pub skipped: usize,
}

pub struct HistoricalScanner {
    source: Arc<dyn LedgerEventSource>,
    processor: Arc<EventProcessor>,
    checkpoint: Arc<CheckpointManager>,
    /// Configured ledger addresses, identity ledger first.
    ledgers: Vec<String>,
    batch_size: u64,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HistoricalScanner {
    pub fn new(
        source: Arc<dyn LedgerEventSource>,
        processor: Arc<EventProcessor>,
        checkpoint: Arc<CheckpointManager>,
        ledgers: Vec<String>,
        batch_size: u64,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            processor,
            checkpoint,
            ledgers,
            batch_size: batch_size.max(1),
            retry,
            timeout,
        }
    }

    /// Current chain head, with timeout and retry.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        let source = &self.source;
        self.retry
            .run("current_height", self.timeout, || source.current_height())
            .await
    }

    /// Scan `[from, to]`.
    ///
    /// The checkpoint advances to `to` on success only if the range is
    /// contiguous with it (`from <= checkpoint + 1`, or no checkpoint yet).
    pub async fn scan(&self, from: u64, to: u64) -> Result<ScanReport, IndexerError> {
        let mut report = ScanReport {
            from,
            to,
            ..Default::default()
        };
        if from > to {
            return Ok(report);
        }

        let stored = self.checkpoint.stored().await?;
        let contiguous = stored.map_or(true, |height| from <= height.saturating_add(1));
        if !contiguous {
            tracing::warn!(
                from,
                checkpoint = stored,
                "scan starts past the checkpoint; checkpoint will not advance"
            );
        }

        tracing::info!(from, to, ledgers = self.ledgers.len(), "historical scan starting");

        let mut start = from;
        loop {
            let end = start.saturating_add(self.batch_size - 1).min(to);
            self.scan_batch(start, end, &mut report).await?;
            if contiguous {
                self.checkpoint.set(end).await?;
            }

            if end >= to {
                break;
            }
            start = end + 1;
        }

        tracing::info!(
            from,
            to,
            events = report.events,
            applied = report.applied,
            skipped = report.skipped,
            "historical scan complete"
        );
        Ok(report)
    }

    async fn scan_batch(
        &self,
        start: u64,
        end: u64,
        report: &mut ScanReport,
    ) -> Result<(), IndexerError> {
        for ledger in &self.ledgers {
            let source = &self.source;
            let mut events = self
                .retry
                .run("get_events", self.timeout, || source.get_events(ledger, start, end))
                .await?;
            events.retain(|e| (start..=end).contains(&e.block_number));
            events.sort_by_key(|e| e.position());

            for raw in &events {
                match self.processor.process(raw).await {
                    Ok(ProcessOutcome::Applied { .. }) => report.applied += 1,
                    Ok(ProcessOutcome::Skipped(_)) => report.skipped += 1,
                    Err(e) => {
                        tracing::error!(
                            ledger = %ledger,
                            block = raw.block_number,
                            log_index = raw.log_index,
                            error = %e,
                            "batch aborted; checkpoint not advanced"
                        );
                        return Err(e);
                    }
                }
            }
            report.events += events.len();

            tracing::debug!(ledger = %ledger, start, end, events = events.len(), "ledger batch applied");
        }
        Ok(())
    }
}
