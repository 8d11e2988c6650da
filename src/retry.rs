//! Bounded retry with a per-attempt timeout.
//!
//! Only failures classified as transient (HTTP 429/5xx, transport errors,
//! timeouts) are retried. Everything else fails on the first attempt.

use std::future::Future;
use std::time::Duration;

use summary_rag_core::{KbError, Result};
use tracing::{debug, warn};

use crate::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            max_attempts: llm.max_retries.max(1),
            delay: Duration::from_millis(llm.retry_delay_ms),
            timeout: Duration::from_secs(llm.timeout_secs),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(KbError::transient(format!(
                    "{} timed out after {:?}",
                    what, self.timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        what,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(what, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let out = policy()
            .run("embed", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(KbError::transient("503"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(KbError::transient("429"))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(KbError::permanent("400"))
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_transient() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };
        let out = policy
            .run("complete", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok("done")
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
