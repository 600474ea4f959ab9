//! Exponential backoff retry policy for ledger-source calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (caps exponential growth).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff on each retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff_ms as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Run `op` under a per-attempt `timeout`, retrying retryable failures.
    ///
    /// Non-retryable errors (storage, decode) are returned immediately.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(IndexerError::Timeout {
                    ms: timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.next_delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                op = what,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying ledger call"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(op = what, attempts = attempt, error = %e, "giving up");
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
