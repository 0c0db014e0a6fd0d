//! Exponential-backoff retry for transient provider failures.
//!
//! Only the transient network classes (`ProviderError::is_retryable`) are
//! re-attempted; everything else propagates on the first failure.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Retry schedule for chat-provider invocations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff delays, one per retry. Length bounds the retry count.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6),
            ],
        }
    }
}

impl RetryPolicy {
    /// No retries; used by callers that manage their own failure handling.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }
}

/// Run `op`, retrying on transient failures per `policy`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.delays.len() => {
                let delay = policy.delays[attempt];
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "transient provider failure, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
