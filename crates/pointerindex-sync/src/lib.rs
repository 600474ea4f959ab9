//! pointerindex-sync: keeps the pointer mirror in step with the ledgers.
//!
//! - [`scanner::HistoricalScanner`] replays a bounded block range and
//!   advances the checkpoint.
//! - [`listener::LiveListener`] forwards newly emitted events as they arrive.
//! - [`reconciler::Reconciler`] periodically scans `[checkpoint + 1, head]`;
//!   it is what guarantees eventual consistency.
//! - [`indexer::MirrorIndexer`] wires them together behind `start`/`stop`.

pub mod builder;
pub mod indexer;
pub mod listener;
pub mod memory_source;
pub mod reconciler;
pub mod scanner;
pub mod task;

pub use builder::IndexerBuilder;
pub use indexer::MirrorIndexer;
pub use listener::LiveListener;
pub use memory_source::MemoryLedgerSource;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scanner::{HistoricalScanner, ScanReport};
pub use task::CancellableTask;
