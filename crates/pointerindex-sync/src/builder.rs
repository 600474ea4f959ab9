//! Fluent builder API for mirror indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use pointerindex_sync::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .id("mainnet-mirror")
//!     .identity_ledger("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .data_ledger("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512")
//!     .lookback_window(50_000)
//!     .batch_size(500)
//!     .build_config();
//! ```

use std::sync::Arc;
use std::time::Duration;

use pointerindex_core::error::IndexerError;
use pointerindex_core::indexer::IndexerConfig;
use pointerindex_core::retry::RetryConfig;
use pointerindex_core::source::LedgerEventSource;
use pointerindex_core::store::DocumentStore;

use crate::indexer::MirrorIndexer;

/// Fluent builder for `IndexerConfig` and `MirrorIndexer`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the indexer ID (used for the checkpoint key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn identity_ledger(mut self, address: impl Into<String>) -> Self {
        self.config.identity_ledger = Some(address.into());
        self
    }

    pub fn data_ledger(mut self, address: impl Into<String>) -> Self {
        self.config.data_ledger = Some(address.into());
        self
    }

    /// Blocks behind head to start from when no checkpoint exists.
    pub fn lookback_window(mut self, blocks: u64) -> Self {
        self.config.lookback_window = blocks;
        self
    }

    /// Set the number of blocks per range query.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.config.reconcile_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Enable or disable live subscriptions.
    pub fn live(mut self, live: bool) -> Self {
        self.config.live = live;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build a `MirrorIndexer` over `source` and `store`.
    pub fn build<S>(
        self,
        source: Arc<dyn LedgerEventSource>,
        store: Arc<S>,
    ) -> Result<MirrorIndexer, IndexerError>
    where
        S: DocumentStore + 'static,
    {
        MirrorIndexer::new(self.config, source, store)
    }
}
