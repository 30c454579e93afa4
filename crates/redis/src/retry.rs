//! One-shot retry for transient log-store failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::store::LogStoreError;

/// Retries a transient failure exactly once after a configurable delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run `op`; on a transient error wait the delay (abortable by
    /// `cancel`) and retry once. Non-transient errors and second failures
    /// propagate unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
    ) -> Result<T, LogStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LogStoreError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(error) if error.is_transient() => {
                warn!(
                    %error,
                    delay_ms = self.delay.as_millis() as u64,
                    "transient log store failure, retrying once"
                );
                tokio::select! {
                    _ = cancel.cancelled() => Err(LogStoreError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => op().await,
                }
            }
            Err(error) => Err(error),
        }
    }
}
