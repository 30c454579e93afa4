//! Co-located transport over a shared broadcast conduit.
//!
//! One conduit backs the matching emitter/receiver pair. Dispatch is
//! serialized by the conduit itself, so concurrent emits do not
//! interleave a subscriber's view. No deduplication happens here; that is
//! the composite receiver's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use courier_core::{CourierError, CourierResult};

use crate::notification::Notification;
use crate::transport::{NotificationEmitter, NotificationReceiver, NotificationStream, TagFilter};

/// Default number of in-flight notifications a subscriber may lag behind
/// before it starts missing them.
pub const DEFAULT_CONDUIT_CAPACITY: usize = 256;

/// Shared broadcast conduit backing the in-process transport pair.
pub struct InProcessConduit {
    tx: broadcast::Sender<Arc<dyn Notification>>,
}

impl InProcessConduit {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Arc::new(Self { tx })
    }
}

pub struct InProcessEmitter {
    conduit: Arc<InProcessConduit>,
    disposed: AtomicBool,
}

impl InProcessEmitter {
    pub fn new(conduit: Arc<InProcessConduit>) -> Self {
        Self {
            conduit,
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl NotificationEmitter for InProcessEmitter {
    async fn emit(
        &self,
        notification: Arc<dyn Notification>,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        if cancel.is_cancelled() {
            return Err(CourierError::Cancelled);
        }
        // Zero subscribers is not a failure.
        let _ = self.conduit.tx.send(notification);
        Ok(())
    }

    async fn shutdown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "in-process"
    }
}

pub struct InProcessReceiver {
    conduit: Arc<InProcessConduit>,
    disposed: AtomicBool,
    halt: CancellationToken,
}

impl InProcessReceiver {
    pub fn new(conduit: Arc<InProcessConduit>) -> Self {
        Self {
            conduit,
            disposed: AtomicBool::new(false),
            halt: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl NotificationReceiver for InProcessReceiver {
    async fn subscribe(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<NotificationStream> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        let rx = self.conduit.tx.subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(move |item| {
                futures::future::ready(match item {
                    Ok(notification) if filter.matches(&notification.envelope().tags) => {
                        Some(notification)
                    }
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "in-process subscriber lagged, notifications dropped");
                        None
                    }
                })
            })
            .take_until(cancel.cancelled_owned())
            .take_until(self.halt.clone().cancelled_owned())
            .boxed();
        Ok(stream)
    }

    async fn shutdown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.halt.cancel();
    }

    fn name(&self) -> &str {
        "in-process"
    }
}
