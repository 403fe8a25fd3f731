//! Retry loop for store calls

use std::future::Future;

use cerrojo_common::RetryPolicy;
use cerrojo_store::StoreError;
use tokio::time::Instant;
use tracing::warn;

/// Final error of a retried call
#[derive(Debug)]
pub(crate) struct RetryFailure {
    pub error: StoreError,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy (or `deadline`) is exhausted. Only connection errors are retried.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    operation: &'static str,
    mut call: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let retries = attempts - 1;
        if !error.is_retryable() || !policy.allows_retry(retries) {
            return Err(RetryFailure { error, attempts });
        }

        let delay = policy.delay_for(retries);
        if let Some(deadline) = deadline
            && Instant::now() + delay >= deadline
        {
            return Err(RetryFailure { error, attempts });
        }

        warn!(
            operation,
            attempt = attempts,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Store call failed, retrying: {}",
            error
        );
        tokio::time::sleep(delay).await;
    }
}
