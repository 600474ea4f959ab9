//! In-memory Ledger Event Source.
//!
//! Holds an append-only event log per ledger plus a head height, and feeds
//! live subscribers through unbounded channels. Tests use the extra knobs to
//! simulate missed notifications, redelivery, disconnects and RPC failures.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;

use pointerindex_core::error::IndexerError;
use pointerindex_core::source::{LedgerEventSource, RawEventStream};
use pointerindex_core::types::RawLedgerEvent;

type Subscriber = mpsc::UnboundedSender<Result<RawLedgerEvent, IndexerError>>;

#[derive(Default)]
struct Inner {
    logs: HashMap<String, Vec<RawLedgerEvent>>,
    head: u64,
    subscribers: HashMap<String, Vec<Subscriber>>,
    failures_pending: u32,
    range_queries: u64,
}

/// An in-memory ledger pair.
#[derive(Default)]
pub struct MemoryLedgerSource {
    inner: Mutex<Inner>,
}

fn key(ledger: &str) -> String {
    ledger.to_ascii_lowercase()
}

impl MemoryLedgerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source pre-loaded with `events`; the head is the highest block.
    pub fn from_events(events: impl IntoIterator<Item = RawLedgerEvent>) -> Self {
        let source = Self::new();
        for event in events {
            source.append_silent(event);
        }
        source
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event and notify live subscribers.
    pub fn append(&self, event: RawLedgerEvent) {
        self.append_silent(event.clone());
        self.deliver(event);
    }

    /// Append an event without any live notification (a missed notification).
    pub fn append_silent(&self, event: RawLedgerEvent) {
        let mut inner = self.lock();
        inner.head = inner.head.max(event.block_number);
        inner.logs.entry(key(&event.address)).or_default().push(event);
    }

    /// Push `event` to live subscribers only (redelivery).
    pub fn deliver(&self, event: RawLedgerEvent) {
        let mut inner = self.lock();
        if let Some(subs) = inner.subscribers.get_mut(&key(&event.address)) {
            subs.retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
        }
    }

    /// Move the head without adding events (empty blocks).
    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    /// Fail the next `n` range/head queries with an RPC error.
    pub fn fail_next_queries(&self, n: u32) {
        self.lock().failures_pending = n;
    }

    /// End every live stream, as a dropped connection would.
    pub fn disconnect_all(&self) {
        self.lock().subscribers.clear();
    }

    /// Live subscribers currently attached to `ledger`.
    pub fn subscriber_count(&self, ledger: &str) -> usize {
        self.lock()
            .subscribers
            .get(&key(ledger))
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Number of `get_events` calls served so far.
    pub fn range_queries(&self) -> u64 {
        self.lock().range_queries
    }

    fn take_failure(inner: &mut Inner) -> Result<(), IndexerError> {
        if inner.failures_pending > 0 {
            inner.failures_pending -= 1;
            return Err(IndexerError::Rpc("injected ledger failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerEventSource for MemoryLedgerSource {
    async fn get_events(
        &self,
        ledger: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLedgerEvent>, IndexerError> {
        let mut inner = self.lock();
        Self::take_failure(&mut inner)?;
        inner.range_queries += 1;
        let mut events: Vec<_> = inner
            .logs
            .get(&key(ledger))
            .map(|log| {
                log.iter()
                    .filter(|e| e.block_number >= from && e.block_number <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.position());
        Ok(events)
    }

    async fn subscribe(&self, ledger: &str) -> Result<RawEventStream, IndexerError> {
        let (tx, rx) = mpsc::unbounded();
        self.lock().subscribers.entry(key(ledger)).or_default().push(tx);
        Ok(Box::pin(rx))
    }

    async fn current_height(&self) -> Result<u64, IndexerError> {
        let mut inner = self.lock();
        Self::take_failure(&mut inner)?;
        Ok(inner.head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn ev(ledger: &str, block: u64, log: u32) -> RawLedgerEvent {
        RawLedgerEvent {
            address: ledger.into(),
            signature: "Revoked".into(),
            block_number: block,
            block_timestamp: block as i64,
            tx_hash: format!("0x{block}"),
            log_index: log,
            fields: serde_json::json!({ "identity_hash": "0x1" }),
        }
    }

    #[tokio::test]
    async fn range_query_filters_and_sorts() {
        let source = MemoryLedgerSource::from_events([ev("0xA", 12, 0), ev("0xa", 10, 1), ev("0xa", 10, 0), ev("0xb", 11, 0)]);
        assert_eq!(source.current_height().await.unwrap(), 12);
        let got = source.get_events("0xA", 10, 11).await.unwrap();
        assert_eq!(
            got.iter().map(|e| (e.block_number, e.log_index)).collect::<Vec<_>>(),
            vec![(10, 0), (10, 1)]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_appends() {
        let source = MemoryLedgerSource::new();
        let mut stream = source.subscribe("0xa").await.unwrap();
        source.append(ev("0xa", 5, 0));
        let got = stream.next().await.unwrap().unwrap();
        assert_eq!(got.block_number, 5);

        source.disconnect_all();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_failures_then_recovery() {
        let source = MemoryLedgerSource::new();
        source.fail_next_queries(1);
        assert!(source.current_height().await.unwrap_err().is_retryable());
        assert_eq!(source.current_height().await.unwrap(), 0);
    }
}
