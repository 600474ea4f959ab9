//! `MirrorIndexer`: the control surface that wires scanner, listeners and
//! reconciler around one event processor.
//!
//! All handles are fields of the instance, so several indexers (e.g. one per
//! environment) can run side by side in one process.

use std::sync::{Arc, Mutex};

use pointerindex_core::checkpoint::CheckpointManager;
use pointerindex_core::error::IndexerError;
use pointerindex_core::indexer::{IndexerConfig, IndexerState};
use pointerindex_core::processor::{EventProcessor, ProcessorMetrics};
use pointerindex_core::query::MirrorQuery;
use pointerindex_core::retry::RetryPolicy;
use pointerindex_core::source::LedgerEventSource;
use pointerindex_core::store::DocumentStore;

use crate::listener::LiveListener;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::scanner::HistoricalScanner;
use crate::task::CancellableTask;

pub struct MirrorIndexer {
    config: IndexerConfig,
    source: Arc<dyn LedgerEventSource>,
    store: Arc<dyn DocumentStore>,
    processor: Arc<EventProcessor>,
    checkpoint: Arc<CheckpointManager>,
    scanner: Arc<HistoricalScanner>,
    reconciler: Arc<Reconciler>,
    state: Mutex<IndexerState>,
    tasks: tokio::sync::Mutex<Vec<CancellableTask>>,
}

impl MirrorIndexer {
    pub fn new<S>(
        config: IndexerConfig,
        source: Arc<dyn LedgerEventSource>,
        store: Arc<S>,
    ) -> Result<Self, IndexerError>
    where
        S: DocumentStore + 'static,
    {
        config.validate()?;

        let checkpoint = Arc::new(CheckpointManager::new(
            store.clone(),
            &config.id,
            config.lookback_window,
        ));
        let store: Arc<dyn DocumentStore> = store;
        let processor = Arc::new(EventProcessor::new(config.ledgers(), store.clone()));
        let retry = RetryPolicy::new(config.retry.clone());

        let ledgers: Vec<String> = [&config.identity_ledger, &config.data_ledger]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        let scanner = Arc::new(HistoricalScanner::new(
            source.clone(),
            processor.clone(),
            checkpoint.clone(),
            ledgers,
            config.batch_size,
            retry,
            config.rpc_timeout(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            scanner.clone(),
            checkpoint.clone(),
            config.reconcile_interval(),
        ));

        Ok(Self {
            config,
            source,
            store,
            processor,
            checkpoint,
            scanner,
            reconciler,
            state: Mutex::new(IndexerState::Idle),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: IndexerState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// `true` from the start of catch-up until `stop()`.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), IndexerState::CatchingUp | IndexerState::Running)
    }

    pub fn metrics(&self) -> ProcessorMetrics {
        self.processor.metrics()
    }

    pub fn query(&self) -> MirrorQuery {
        MirrorQuery::new(self.store.clone(), &self.config.id)
    }

    pub fn checkpoint(&self) -> &CheckpointManager {
        &self.checkpoint
    }

    pub fn scanner(&self) -> &HistoricalScanner {
        &self.scanner
    }

    /// Run one reconciliation pass outside the schedule.
    pub async fn reconcile_now(&self) -> Result<ReconcileOutcome, IndexerError> {
        self.reconciler.reconcile_once().await
    }

    /// Catch up historically, then start live listening and the reconciler.
    ///
    /// Only an unreachable document store is fatal. A failed catch-up is
    /// logged and left to the reconciler.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let mut tasks = self.tasks.lock().await;
        if self.is_running() {
            tracing::warn!(indexer = %self.config.id, "start called on a running indexer");
            return Ok(());
        }
        self.set_state(IndexerState::CatchingUp);

        if let Err(e) = self.store.ping().await {
            self.set_state(IndexerState::Idle);
            tracing::error!(indexer = %self.config.id, error = %e, "document store unreachable");
            return Err(IndexerError::Aborted {
                reason: format!("document store unreachable: {e}"),
            });
        }

        if self.config.identity_ledger.is_none() {
            tracing::warn!("identity ledger address not configured; identity events will not be indexed");
        }
        if self.config.data_ledger.is_none() {
            tracing::warn!("data ledger address not configured; data events will not be indexed");
        }

        tracing::info!(indexer = %self.config.id, "initial catch-up starting");
        match self.reconciler.reconcile_once().await {
            Ok(ReconcileOutcome::Scanned(report)) => tracing::info!(
                from = report.from,
                to = report.to,
                events = report.events,
                "initial catch-up complete"
            ),
            Ok(ReconcileOutcome::UpToDate { head }) => {
                tracing::info!(head, "initial catch-up: already up to date")
            }
            Err(e) => tracing::warn!(error = %e, "initial catch-up failed; reconciler will retry"),
        }

        if self.config.live {
            let retry = RetryPolicy::new(self.config.retry.clone());
            for ledger in [&self.config.identity_ledger, &self.config.data_ledger]
                .into_iter()
                .flatten()
            {
                let listener = Arc::new(LiveListener::new(
                    self.source.clone(),
                    self.processor.clone(),
                    ledger.clone(),
                    retry.clone(),
                ));
                tasks.push(listener.spawn());
            }
        }
        tasks.push(self.reconciler.clone().spawn());

        self.set_state(IndexerState::Running);
        tracing::info!(indexer = %self.config.id, tasks = tasks.len(), "indexer running");
        Ok(())
    }

    /// Cancel live subscriptions and the reconciler schedule.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        if !self.is_running() {
            return;
        }
        self.set_state(IndexerState::Stopping);
        for task in tasks.drain(..) {
            task.cancel().await;
        }
        self.set_state(IndexerState::Stopped);
        tracing::info!(indexer = %self.config.id, "indexer stopped");
    }
}
