//! Live listener: forwards newly emitted events to the processor.
//!
//! The listener is a latency optimization only. It does not deduplicate and
//! does not touch the checkpoint; overlap with reconciler scans is absorbed by
//! idempotent application. When a stream ends it resubscribes after a backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pointerindex_core::processor::EventProcessor;
use pointerindex_core::retry::RetryPolicy;
use pointerindex_core::source::LedgerEventSource;

use crate::task::{shutdown_requested, CancellableTask};

pub struct LiveListener {
    source: Arc<dyn LedgerEventSource>,
    processor: Arc<EventProcessor>,
    ledger: String,
    retry: RetryPolicy,
}

impl LiveListener {
    pub fn new(
        source: Arc<dyn LedgerEventSource>,
        processor: Arc<EventProcessor>,
        ledger: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            processor,
            ledger: ledger.into(),
            retry,
        }
    }

    fn resubscribe_delay(&self, attempt: u32) -> Duration {
        let capped = attempt.clamp(1, self.retry.config.max_retries.max(1));
        self.retry
            .next_delay(capped)
            .unwrap_or(Duration::from_millis(self.retry.config.max_backoff_ms))
    }

    /// Subscribe and start forwarding; the returned handle tears it down.
    pub fn spawn(self: Arc<Self>) -> CancellableTask {
        let name = format!("live:{}", self.ledger);
        CancellableTask::spawn(name, move |mut shutdown| async move {
            let mut attempt = 0u32;
            loop {
                let subscribed = tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    result = self.source.subscribe(&self.ledger) => result,
                };

                match subscribed {
                    Err(e) => {
                        attempt += 1;
                        tracing::warn!(ledger = %self.ledger, attempt, error = %e, "live subscribe failed");
                    }
                    Ok(mut stream) => {
                        attempt = 0;
                        tracing::info!(ledger = %self.ledger, "live subscription open");
                        loop {
                            let item = tokio::select! {
                                _ = shutdown_requested(&mut shutdown) => {
                                    tracing::info!(ledger = %self.ledger, "live listener stopped");
                                    return;
                                }
                                item = stream.next() => item,
                            };
                            match item {
                                Some(Ok(raw)) => {
                                    if let Err(e) = self.processor.process(&raw).await {
                                        tracing::error!(
                                            ledger = %self.ledger,
                                            block = raw.block_number,
                                            log_index = raw.log_index,
                                            error = %e,
                                            "live event not applied; left to reconciler"
                                        );
                                    }
                                }
                                Some(Err(e)) => {
                                    tracing::warn!(ledger = %self.ledger, error = %e, "live stream error");
                                    break;
                                }
                                None => {
                                    tracing::info!(ledger = %self.ledger, "live stream closed");
                                    break;
                                }
                            }
                        }
                        attempt += 1;
                    }
                }

                let delay = self.resubscribe_delay(attempt);
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tracing::info!(ledger = %self.ledger, "live listener stopped");
        })
    }
}
