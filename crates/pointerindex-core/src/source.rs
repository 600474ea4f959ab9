//! `LedgerEventSource` trait: abstraction over the ledger RPC backend.
//!
//! One source serves both ledgers; every call names the ledger address it
//! targets.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::IndexerError;
use crate::types::RawLedgerEvent;

/// A live stream of raw events from one ledger.
///
/// Dropping the stream ends the subscription on the source side.
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<RawLedgerEvent, IndexerError>> + Send>>;

/// Historical query, live subscription, and head height for the ledgers.
#[async_trait]
pub trait LedgerEventSource: Send + Sync {
    /// Events emitted by `ledger` in blocks `[from, to]` (inclusive).
    async fn get_events(
        &self,
        ledger: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLedgerEvent>, IndexerError>;

    /// Subscribe to events from `ledger` as new blocks are appended.
    async fn subscribe(&self, ledger: &str) -> Result<RawEventStream, IndexerError>;

    /// The current chain head height.
    async fn current_height(&self) -> Result<u64, IndexerError>;
}
