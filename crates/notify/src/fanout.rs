//! Composite emitter: one emit call, every transport, in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use courier_core::{CourierError, CourierResult};

use crate::notification::Notification;
use crate::transport::NotificationEmitter;

/// Dispatches every notification to all registered transports
/// concurrently, freezing identity first so each transport observes the
/// same notification id and timestamp.
///
/// A slow or failing transport never stalls or fails the others: child
/// failures are logged and swallowed. Cancellation is propagated so
/// callers observe shutdown. Only the case where every child rejects the
/// payload surfaces as an error.
pub struct CompositeEmitter {
    children: Vec<Arc<dyn NotificationEmitter>>,
    disposed: AtomicBool,
}

impl CompositeEmitter {
    pub fn new(children: Vec<Arc<dyn NotificationEmitter>>) -> Self {
        Self {
            children,
            disposed: AtomicBool::new(false),
        }
    }

    pub async fn emit<N: Notification>(
        &self,
        notification: N,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        self.emit_boxed(Box::new(notification), cancel).await
    }

    pub async fn emit_boxed(
        &self,
        mut notification: Box<dyn Notification>,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        if cancel.is_cancelled() {
            return Err(CourierError::Cancelled);
        }

        notification.envelope_mut().ensure_identity();

        let shared: Arc<dyn Notification> = Arc::from(notification);
        let results = join_all(
            self.children
                .iter()
                .map(|child| child.emit(Arc::clone(&shared), cancel)),
        )
        .await;

        let mut accepted = 0usize;
        for (child, result) in self.children.iter().zip(results) {
            match result {
                Ok(()) => accepted += 1,
                Err(CourierError::Cancelled) => return Err(CourierError::Cancelled),
                Err(error) => {
                    warn!(
                        transport = child.name(),
                        id = %shared.envelope().id,
                        %error,
                        "transport rejected notification"
                    );
                }
            }
        }
        if accepted == 0 && !self.children.is_empty() {
            return Err(CourierError::AllTransportsRejected);
        }
        debug!(id = %shared.envelope().id, accepted, "notification dispatched");
        Ok(())
    }

    /// Dispose every child transport. Idempotent.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for child in &self.children {
            child.shutdown().await;
        }
    }
}
