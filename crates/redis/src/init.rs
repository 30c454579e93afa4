//! Idempotent stream/consumer-group initialization.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::{LogStore, LogStoreError};

/// Delay between creation attempts.
const ATTEMPT_DELAY: Duration = Duration::from_millis(500);

/// Ensure `group` exists on `stream`, retrying inside the `timeout`
/// bound.
///
/// An already-existing group is a no-op; a fresh group starts at the
/// stream's current tail. Exhausting the bound is fatal to the caller.
pub async fn ensure_consumer_group(
    store: &dyn LogStore,
    stream: &str,
    group: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), LogStoreError> {
    let attempts = async {
        loop {
            match store.ensure_group(stream, group).await {
                Ok(()) => {
                    debug!(stream, group, "consumer group ready");
                    return Ok(());
                }
                Err(error) => {
                    warn!(stream, group, %error, "consumer group creation failed, retrying");
                    tokio::time::sleep(ATTEMPT_DELAY).await;
                }
            }
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(LogStoreError::Cancelled),
        bounded = tokio::time::timeout(timeout, attempts) => match bounded {
            Ok(result) => result,
            Err(_elapsed) => Err(LogStoreError::Timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogStore;

    #[tokio::test]
    async fn creates_the_group_once() {
        let store = MemoryLogStore::new();
        let cancel = CancellationToken::new();

        ensure_consumer_group(&store, "s", "g", Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert!(store.has_group("s", "g"));

        // Second call is a no-op.
        ensure_consumer_group(&store, "s", "g", Duration::from_secs(1), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_bound_expires() {
        let store = MemoryLogStore::new();
        store.fail_next_ensure_group(usize::MAX);
        let cancel = CancellationToken::new();

        let result =
            ensure_consumer_group(&store, "s", "g", Duration::from_secs(2), &cancel).await;
        assert!(matches!(result, Err(LogStoreError::Timeout)));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let store = MemoryLogStore::new();
        store.fail_next_ensure_group(1);
        let cancel = CancellationToken::new();

        tokio::time::pause();
        ensure_consumer_group(&store, "s", "g", Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(store.has_group("s", "g"));
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let store = MemoryLogStore::new();
        store.fail_next_ensure_group(usize::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            ensure_consumer_group(&store, "s", "g", Duration::from_secs(30), &cancel).await;
        assert!(matches!(result, Err(LogStoreError::Cancelled)));
    }
}
