//! Periodic reconciler: the correctness backstop.
//!
//! On every tick it re-derives `[checkpoint + 1, head]` and hands that range
//! to the historical scanner. Missed live notifications, dropped
//! subscriptions and restarts are all healed here. A failed pass leaves the
//! checkpoint where it was, so the next tick retries the same range.

use std::sync::Arc;
use std::time::Duration;

use pointerindex_core::checkpoint::CheckpointManager;
use pointerindex_core::error::IndexerError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::scanner::{HistoricalScanner, ScanReport};
use crate::task::{shutdown_requested, CancellableTask};

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to scan: `checkpoint + 1 > head`.
    UpToDate { head: u64 },
    /// Scanned a range.
    Scanned(ScanReport),
}

pub struct Reconciler {
    scanner: Arc<HistoricalScanner>,
    checkpoint: Arc<CheckpointManager>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        scanner: Arc<HistoricalScanner>,
        checkpoint: Arc<CheckpointManager>,
        interval: Duration,
    ) -> Self {
        Self {
            scanner,
            checkpoint,
            interval,
        }
    }

    /// Run a single reconciliation pass.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome, IndexerError> {
        let head = self.scanner.head().await?;
        let from = self.checkpoint.resume_from(head).await?;
        if from > head {
            tracing::debug!(head, "mirror up to date");
            return Ok(ReconcileOutcome::UpToDate { head });
        }
        let report = self.scanner.scan(from, head).await?;
        Ok(ReconcileOutcome::Scanned(report))
    }

    /// Schedule a pass every `interval`, first firing one interval from now.
    pub fn spawn(self: Arc<Self>) -> CancellableTask {
        let period = self.interval;
        CancellableTask::spawn("reconciler", move |mut shutdown| async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "reconciler scheduled");

            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    result = self.reconcile_once() => match result {
                        Ok(ReconcileOutcome::Scanned(report)) => tracing::info!(
                            from = report.from,
                            to = report.to,
                            events = report.events,
                            "reconciliation pass healed range"
                        ),
                        Ok(ReconcileOutcome::UpToDate { .. }) => {}
                        Err(e) => tracing::warn!(
                            error = %e,
                            "reconciliation pass failed; range retried next tick"
                        ),
                    }
                }
            }
            tracing::info!("reconciler stopped");
        })
    }
}
