//! Indexer configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::LedgerAddresses;
use crate::retry::RetryConfig;

/// Configuration for a mirror indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used for the checkpoint key).
    #[serde(default = "default_id")]
    pub id: String,
    /// Identity ledger address. `None` = identity events are never scanned.
    #[serde(default)]
    pub identity_ledger: Option<String>,
    /// Data ledger address. `None` = data events are never scanned.
    #[serde(default)]
    pub data_ledger: Option<String>,
    /// How far behind the head the first run starts.
    #[serde(default = "default_lookback_window")]
    pub lookback_window: u64,
    /// Maximum blocks per range query (and per checkpoint advance).
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Reconciler period in seconds.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Timeout for each ledger-source call, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Subscribe to live events on start.
    #[serde(default = "bool_true")]
    pub live: bool,
}

fn default_id() -> String { "pointer-mirror".into() }
fn default_lookback_window() -> u64 { 10_000 }
fn default_batch_size() -> u64 { 2_000 }
fn default_reconcile_interval_secs() -> u64 { 300 }
fn default_rpc_timeout_ms() -> u64 { 30_000 }
fn bool_true() -> bool { true }

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            identity_ledger: None,
            data_ledger: None,
            lookback_window: default_lookback_window(),
            batch_size: default_batch_size(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            retry: RetryConfig::default(),
            live: true,
        }
    }
}

impl IndexerConfig {
    pub fn ledgers(&self) -> LedgerAddresses {
        LedgerAddresses {
            identity: self.identity_ledger.clone(),
            data: self.data_ledger.clone(),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Reject values that would stall the pipeline.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.is_empty() {
            return Err(IndexerError::Config("indexer id must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be at least 1".into()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(IndexerError::Config(
                "reconcile_interval_secs must be at least 1".into(),
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(IndexerError::Config("rpc_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Running the initial historical catch-up.
    CatchingUp,
    /// Live listener and reconciler running.
    Running,
    /// Tearing down subscriptions.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
