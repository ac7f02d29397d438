//! Retrying front end for the line store.
//!
//! Every read or replace is a single logical operation. When an attempt
//! fails with a transient error the whole operation is rerun from scratch on
//! a fresh connection, after a fixed delay, until the attempt budget runs
//! out. The store rolls back an interrupted replace, so a retried replace
//! never leaves rows from an earlier attempt behind.

use crate::config::RetryConfig;
use crate::content_codec::{encode_lines, TextFileKey};
use crate::line_store::{LineStore, StoreError};
use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// How often and how patiently storage operations are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

/// Transactional, retrying access to stored text files
pub struct StorageGateway {
    store: Arc<dyn LineStore>,
    policy: RetryPolicy,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn LineStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Stored line fragments of a file in line order. A missing file is empty.
    #[instrument(skip(self, key), fields(compid = key.component_id, filetype = %key.file_type))]
    pub async fn read_file(&self, key: &TextFileKey) -> Result<Vec<String>, StoreError> {
        let lines = self
            .with_retry("read_file", || self.store.fetch_lines(key))
            .await?;

        metrics::counter!("textfile.files.read").increment(1);

        Ok(lines)
    }

    /// Replace every stored line of a file with `lines`, numbered from 1.
    ///
    /// An empty `lines` clears the file.
    #[instrument(skip(self, key, lines), fields(compid = key.component_id, filetype = %key.file_type, line_count = lines.len()))]
    pub async fn replace_file(&self, key: &TextFileKey, lines: &[String]) -> Result<(), StoreError> {
        let rows = encode_lines(lines);

        self.with_retry("replace_file", || self.store.replace_lines(key, &rows))
            .await?;

        metrics::counter!("textfile.files.written").increment(1);

        Ok(())
    }

    /// Single storage round trip, not retried.
    pub async fn probe(&self) -> Result<(), StoreError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.policy.attempt_timeout)),
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = Constant::new(self.policy.delay);
        let mut attempt = 1u32;

        loop {
            let result = match tokio::time::timeout(self.policy.attempt_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.policy.attempt_timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Storage operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.policy.delay);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database connection error, retrying"
                    );
                    metrics::counter!("textfile.storage.retries").increment(1);

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(operation, attempts = attempt, error = %e, "Storage retries exhausted");
                    }
                    metrics::counter!("textfile.storage.failures").increment(1);
                    return Err(e);
                }
            }
        }
    }
}
