//! pointerindex-core: foundation for mirroring identity-ledger state.
//!
//! # Architecture
//!
//! ```text
//! LedgerEventSource ─┬─ HistoricalScanner ─┐
//!                    └─ LiveListener ──────┤
//!                                          ▼
//!                                   EventProcessor  ── classify → LedgerEvent record
//!                                          │
//!                                          ▼
//!                                 PointerMaterializer ── IdentityPointer fold
//!                                          │
//!                                          ▼
//!                            DocumentStore (events / pointers / checkpoint)
//! ```
//!
//! The scanner, listener and reconciler live in `pointerindex-sync`; storage
//! backends live in `pointerindex-storage`.

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod identity;
pub mod indexer;
pub mod materializer;
pub mod pointer;
pub mod processor;
pub mod query;
pub mod retry;
pub mod source;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
pub use error::IndexerError;
pub use event::{ClassifiedEvent, DataEvent, IdentityEvent, LedgerAddresses, TypedEvent};
pub use identity::identity_hash;
pub use indexer::{IndexerConfig, IndexerState};
pub use materializer::PointerMaterializer;
pub use pointer::IdentityPointer;
pub use processor::{EventProcessor, ProcessOutcome, ProcessorMetrics, SkipReason};
pub use query::{IndexerStats, MirrorQuery};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{LedgerEventSource, RawEventStream};
pub use store::{DocumentStore, EventStore, PointerCounts, PointerStore};
pub use types::{EventKey, EventKind, EventPosition, LedgerEvent, LedgerFamily, RawLedgerEvent};
