//! Bounded retries for external calls
//!
//! Embedding and vector-store calls cross a network boundary. Each attempt
//! runs under its own timeout, and failures for which
//! [`Error::is_retryable`] holds are retried with doubling backoff.

use knowledge_engine_config::constants::embedding;
use knowledge_engine_config::{EmbeddingSettings, VectorStoreSettings};
use knowledge_engine_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Retry and timeout policy for one kind of external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn embedding(settings: &EmbeddingSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    pub fn vector_store(settings: &VectorStoreSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    /// Run `attempt` until it succeeds, fails permanently, or retries run out
    ///
    /// A timed-out attempt becomes `timeout_error(..)`, which should be the
    /// error kind of the service being called so it is retried like any
    /// other transient failure of that service.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        timeout_error: fn(String) -> Error,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut tries = 0;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(timeout_error(format!(
                    "{} timed out after {:?}",
                    operation, self.timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && tries < self.max_retries => {
                    tries += 1;
                    tracing::warn!(
                        operation,
                        error = %e,
                        attempt = tries,
                        max_retries = self.max_retries,
                        ?backoff,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: embedding::MAX_RETRIES,
            initial_backoff: Duration::from_millis(embedding::INITIAL_BACKOFF_MS),
            timeout: Duration::from_millis(embedding::TIMEOUT_MS),
        }
    }
}
