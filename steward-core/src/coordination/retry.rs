use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::errors::Result;

/// Retry transient coordination failures a fixed number of times with a fixed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    sleep_between: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, sleep_between: Duration) -> Self {
        Self {
            max_retries,
            sleep_between,
        }
    }

    /// Get the maximum number of retries after the first attempt
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn sleep_between(&self) -> Duration {
        self.sleep_between
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the retry
    /// budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        operation = %op_name,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "coordination operation failed, retrying"
                    );
                    tokio::time::sleep(self.sleep_between).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
