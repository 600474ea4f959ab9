//! Cancellable background task handle.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned loop that stops when [`CancellableTask::cancel`] is called.
///
/// Dropping the handle without cancelling aborts the task.
pub struct CancellableTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CancellableTask {
    /// Spawn `f`, handing it the shutdown receiver it must watch.
    pub fn spawn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(f(rx));
        Self {
            name: name.into(),
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while the task is still running.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and wait for the task to exit.
    pub async fn cancel(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(task = %self.name, error = %e, "task panicked");
                }
            }
        }
        tracing::debug!(task = %self.name, "task cancelled");
    }
}

impl Drop for CancellableTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Resolves once shutdown has been requested (or the handle is gone).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
