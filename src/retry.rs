// Bounded fixed-delay retry around a single outbound request

use std::{future::Future, time::Duration};

use tracing::{debug, error, warn};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Runs `request_fn` until it succeeds, fails with a non-retryable error, or
/// `max_retries` additional attempts have been spent.
///
/// The delay between attempts is fixed. The last observed error is returned
/// unchanged when retries run out.
pub async fn execute<T, F, Fut>(mut request_fn: F, config: &RetryConfig) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut remaining = config.max_retries;
    let mut attempt: u32 = 1;

    loop {
        let err = match request_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(attempt, kind = ?err.kind(), error = %err, "request failed with fatal error");
            return Err(err);
        }

        if remaining == 0 {
            error!(attempts = attempt, kind = ?err.kind(), error = %err, "retries exhausted");
            return Err(err);
        }

        warn!(
            attempt,
            remaining,
            delay_ms = config.delay_ms,
            kind = ?err.kind(),
            error = %err,
            "retryable failure, retrying"
        );

        if config.delay_ms > 0 {
            tokio::time::sleep(config.delay()).await;
        }

        remaining -= 1;
        attempt += 1;
    }
}
