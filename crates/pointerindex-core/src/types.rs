//! Shared types for the mirroring pipeline.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── EventPosition ────────────────────────────────────────────────────────────

/// Where an event sits in its ledger: `(block height, log position)`.
///
/// Ordering is lexicographic, which is the fold order for a single ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl PartialOrd for EventPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.block_number, self.log_index).cmp(&(other.block_number, other.log_index))
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

// ─── LedgerFamily / EventKind ────────────────────────────────────────────────

/// The two ledgers the mirror follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFamily {
    /// The identity registry.
    Identity,
    /// The encrypted-data ledger.
    Data,
}

impl fmt::Display for LedgerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// Every event kind the mirror understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Revoked,
    Transferred,
    ControllerAdded,
    ControllerRemoved,
    DataStored,
    DataUpdated,
    DataDeleted,
    AccessGranted,
    AccessRevoked,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        Self::Created,
        Self::Updated,
        Self::Revoked,
        Self::Transferred,
        Self::ControllerAdded,
        Self::ControllerRemoved,
        Self::DataStored,
        Self::DataUpdated,
        Self::DataDeleted,
        Self::AccessGranted,
        Self::AccessRevoked,
    ];

    /// Which ledger emits this kind.
    pub fn family(self) -> LedgerFamily {
        match self {
            Self::Created
            | Self::Updated
            | Self::Revoked
            | Self::Transferred
            | Self::ControllerAdded
            | Self::ControllerRemoved => LedgerFamily::Identity,
            Self::DataStored
            | Self::DataUpdated
            | Self::DataDeleted
            | Self::AccessGranted
            | Self::AccessRevoked => LedgerFamily::Data,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Revoked => "Revoked",
            Self::Transferred => "Transferred",
            Self::ControllerAdded => "ControllerAdded",
            Self::ControllerRemoved => "ControllerRemoved",
            Self::DataStored => "DataStored",
            Self::DataUpdated => "DataUpdated",
            Self::DataDeleted => "DataDeleted",
            Self::AccessGranted => "AccessGranted",
            Self::AccessRevoked => "AccessRevoked",
        }
    }

    /// Resolve an emitted event signature to a kind.
    ///
    /// Accepts bare names (`"DataStored"`), `Identity`-prefixed names
    /// (`"IdentityCreated"`), and full signatures (`"DataStored(bytes32,string,bytes32)"`).
    pub fn from_signature(signature: &str) -> Option<Self> {
        let name = signature.split('(').next().unwrap_or(signature).trim();
        let name = match name {
            "IdentityCreated" | "IdentityUpdated" | "IdentityRevoked" | "IdentityTransferred" => {
                &name["Identity".len()..]
            }
            other => other,
        };
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_signature(s).ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

// ─── RawLedgerEvent ──────────────────────────────────────────────────────────

/// An event as delivered by the Ledger Event Source, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLedgerEvent {
    /// Address of the ledger contract that emitted the event.
    pub address: String,
    /// Event name or full signature (e.g. `"IdentityCreated"`).
    pub signature: String,
    pub block_number: u64,
    /// Unix timestamp of the enclosing block.
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub log_index: u32,
    /// Decoded event arguments.
    #[serde(default)]
    pub fields: serde_json::Value,
}

impl RawLedgerEvent {
    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block_number, self.log_index)
    }
}

// ─── LedgerEvent ─────────────────────────────────────────────────────────────

/// Deduplication key of a ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: String,
    pub log_index: u32,
}

/// Immutable audit record of a classified event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_timestamp: i64,
    /// Emitting ledger address.
    pub ledger: String,
    pub kind: EventKind,
    pub identity_hash: String,
    /// The typed payload, serialized.
    pub payload: serde_json::Value,
}

impl LedgerEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block_number, self.log_index)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
