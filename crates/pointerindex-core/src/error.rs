//! Error types for the pointerindex pipeline.

use thiserror::Error;

/// Errors that can occur while mirroring ledger state.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed '{event}' event: {reason}")]
    Decode { event: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for transient ledger-source failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the error came from the document store.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
