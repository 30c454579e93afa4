//! Composite receiver: every transport merged into one deduplicated
//! subscription.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use courier_core::{CourierError, CourierResult};

use crate::dedup::DedupCache;
use crate::notification::Notification;
use crate::options::NotificationOptions;
use crate::transport::{NotificationReceiver, NotificationStream, TagFilter};

/// In-flight buffer between the child forwarders and the merged stream.
const MERGE_BUFFER: usize = 256;

/// Merges every child receiver into one lazy sequence, suppressing
/// duplicate notification identifiers centrally.
///
/// The first transport to deliver an id determines what the subscriber
/// sees; later deliveries of that id are dropped silently until the dedup
/// entry expires. Children interleave as they produce; nothing reorders.
/// A child that fails to subscribe, or whose sequence ends, never
/// terminates the merged sequence.
pub struct CompositeReceiver {
    children: Vec<Arc<dyn NotificationReceiver>>,
    dedup: Arc<DedupCache>,
    disposed: AtomicBool,
    halt: CancellationToken,
}

impl CompositeReceiver {
    pub fn new(children: Vec<Arc<dyn NotificationReceiver>>, options: &NotificationOptions) -> Self {
        Self {
            children,
            dedup: Arc::new(DedupCache::new(options)),
            disposed: AtomicBool::new(false),
            halt: CancellationToken::new(),
        }
    }

    /// Open the merged sequence. Tag filtering is delegated to children;
    /// this layer only deduplicates. Cancellation completes the sequence.
    pub async fn subscribe(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<NotificationStream> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        self.dedup.start_scan(self.halt.clone());

        let (tx, rx) = mpsc::channel(MERGE_BUFFER);
        for child in &self.children {
            match child.subscribe(filter.clone(), cancel.child_token()).await {
                Ok(stream) => {
                    tokio::spawn(forward(
                        stream,
                        tx.clone(),
                        Arc::clone(&self.dedup),
                        cancel.clone(),
                        self.halt.clone(),
                    ));
                }
                Err(error) => {
                    warn!(
                        transport = child.name(),
                        %error,
                        "receiver failed to subscribe, merged sequence continues without it"
                    );
                }
            }
        }
        drop(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Merged sequence narrowed to payloads of type `T`, applied after
    /// deduplication.
    pub async fn subscribe_typed<T: Notification>(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<BoxStream<'static, Arc<T>>> {
        let stream = self.subscribe(filter, cancel).await?;
        Ok(stream
            .filter_map(|notification| {
                futures::future::ready(notification.as_any_arc().downcast::<T>().ok())
            })
            .boxed())
    }

    /// Dispose every child receiver and stop the dedup scan. Idempotent.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.halt.cancel();
        for child in &self.children {
            child.shutdown().await;
        }
    }
}

async fn forward(
    mut stream: NotificationStream,
    tx: mpsc::Sender<Arc<dyn Notification>>,
    dedup: Arc<DedupCache>,
    cancel: CancellationToken,
    halt: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = halt.cancelled() => break,
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(notification) = next else { break };
        let id = notification.envelope().id.clone();
        if id.is_empty() || dedup.insert_if_absent(id.as_str()) {
            if tx.send(notification).await.is_err() {
                break;
            }
        }
    }
}
