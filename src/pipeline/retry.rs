//! Bounded retry with a fixed backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// on exhaustion. No sleep follows the final attempt.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_while(op_name, op, |_| true).await
    }

    /// Like [`run`](Self::run), but errors for which `retryable` is false are
    /// returned immediately.
    pub async fn run_while<T, E, F, Fut, R>(
        &self,
        op_name: &str,
        mut op: F,
        retryable: R,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        "{} failed after {} attempt(s): {}",
                        op_name,
                        attempt,
                        err
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(
                        "{} failed, retrying in {:?} (attempt {}/{}): {}",
                        op_name,
                        self.backoff,
                        attempt,
                        self.max_attempts,
                        err
                    );
                    sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.backoff_secs))
    }
}
