//! Transport-facing contracts.
//!
//! A transport contributes an emitter, a receiver, or both. The composite
//! plane treats children uniformly through these traits; deduplication is
//! NOT a transport concern.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use courier_core::CourierResult;

use crate::notification::Notification;

/// Lazy, cancellable sequence of notifications.
pub type NotificationStream = BoxStream<'static, Arc<dyn Notification>>;

/// Tag interest of a subscription. Empty matches everything; otherwise a
/// notification matches when its tag set intersects the filter.
#[derive(Debug, Clone, Default)]
pub struct TagFilter(BTreeSet<String>);

impl TagFilter {
    /// Match every notification.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        self.0.is_empty() || self.0.iter().any(|tag| tags.contains(tag))
    }
}

/// Outbound side of a transport.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    /// Dispatch one notification. Identity is already frozen by the
    /// caller and must be transported verbatim.
    async fn emit(
        &self,
        notification: Arc<dyn Notification>,
        cancel: &CancellationToken,
    ) -> CourierResult<()>;

    /// Release transport resources. Idempotent; implementations log their
    /// own teardown failures instead of surfacing them.
    async fn shutdown(&self);

    /// Short transport name used in logs.
    fn name(&self) -> &str;
}

/// Inbound side of a transport.
#[async_trait]
pub trait NotificationReceiver: Send + Sync {
    /// Open a lazy sequence of notifications. Tag filtering happens inside
    /// the transport. Cancellation completes the sequence; it never errors
    /// it.
    async fn subscribe(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<NotificationStream>;

    async fn shutdown(&self);

    fn name(&self) -> &str;
}
