//! Fire-and-forget emission pipeline.
//!
//! `emit` only writes a work item to a bounded queue, keeping its latency
//! independent of log-store latency. One long-lived worker drains the
//! queue, picks a write strategy per payload type, and writes to the log
//! store. A failing item never kills the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{CourierError, CourierResult};
use courier_notify::{Notification, NotificationEmitter};

use crate::codec;
use crate::options::RedisTransportOptions;
use crate::queue::{BoundedQueue, PushOutcome, QueueError};
use crate::retry::RetryPolicy;
use crate::store::{LogStore, LogStoreError};

/// Type identifier of last resort.
const UNKNOWN_TYPE: &str = "Unknown";

struct WorkItem {
    notification: Arc<dyn Notification>,
    enqueued_at: Instant,
}

/// Emitter writing notifications to the log store through a bounded
/// queue and one long-lived drain worker.
pub struct RedisStreamEmitter {
    store: Arc<dyn LogStore>,
    options: Arc<RedisTransportOptions>,
    queue: Arc<BoundedQueue<WorkItem>>,
    retry: RetryPolicy,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_cancel: CancellationToken,
    disposed: AtomicBool,
}

impl RedisStreamEmitter {
    pub fn new(store: Arc<dyn LogStore>, options: Arc<RedisTransportOptions>) -> Self {
        Self {
            queue: Arc::new(BoundedQueue::new(
                options.queue_capacity,
                options.queue_full_mode,
            )),
            retry: RetryPolicy::new(options.retry_delay),
            store,
            options,
            worker: Mutex::new(None),
            worker_cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Spawn the drain worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        *worker = Some(tokio::spawn(worker_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.options),
            Arc::clone(&self.queue),
            self.retry.clone(),
            self.worker_cancel.clone(),
        )));
    }

    /// Queued items not yet drained.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl NotificationEmitter for RedisStreamEmitter {
    async fn emit(
        &self,
        notification: Arc<dyn Notification>,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        let item = WorkItem {
            notification,
            enqueued_at: Instant::now(),
        };
        match self.queue.push(item, cancel).await {
            Ok(PushOutcome::Enqueued) => Ok(()),
            Ok(PushOutcome::DroppedNewest) => {
                debug!("emission queue full, incoming notification dropped");
                Ok(())
            }
            Ok(PushOutcome::DroppedOldest) => {
                debug!("emission queue full, oldest queued notification dropped");
                Ok(())
            }
            Err(QueueError::Closed) => Err(CourierError::Disposed),
            Err(QueueError::Cancelled) => Err(CourierError::Cancelled),
        }
    }

    /// Stop accepting writes, cancel the worker, and await it. The item
    /// in flight completes; the rest of the queue is dropped.
    async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.close();
        self.worker_cancel.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("log emission worker ended abnormally");
            }
        }
    }

    fn name(&self) -> &str {
        "redis-stream"
    }
}

async fn worker_loop(
    store: Arc<dyn LogStore>,
    options: Arc<RedisTransportOptions>,
    queue: Arc<BoundedQueue<WorkItem>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    info!("log emission worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(dropped = queue.len(), "log emission worker cancelled");
                break;
            }
            item = queue.pop() => match item {
                Some(item) => item,
                None => break,
            },
        };
        if let Err(error) = publish_item(store.as_ref(), &options, &retry, &cancel, &item).await {
            warn!(
                %error,
                item_age_ms = item.enqueued_at.elapsed().as_millis() as u64,
                "notification publish failed, continuing with next item"
            );
        }
    }
    info!("log emission worker stopped");
}

async fn publish_item(
    store: &dyn LogStore,
    options: &RedisTransportOptions,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    item: &WorkItem,
) -> Result<(), LogStoreError> {
    let notification = item.notification.as_ref();
    let body = notification
        .encode()
        .map_err(|error| LogStoreError::Encode(error.to_string()))?;

    let type_id = derive_type_id(notification);
    let stream = options
        .stream_routes
        .get(&type_id)
        .unwrap_or(&options.default_stream);

    let envelope = notification.envelope();
    let id = envelope.id.to_string();
    let timestamp = codec::format_timestamp(envelope.timestamp.unwrap_or_else(Utc::now));

    let mut fields = vec![
        (codec::FIELD_TYPE.to_string(), type_id.clone()),
        (codec::FIELD_ID.to_string(), id.clone()),
        (codec::FIELD_TIMESTAMP.to_string(), timestamp),
    ];

    if options.stream_only_types.contains(&type_id) {
        fields.push((
            codec::FIELD_STORAGE.to_string(),
            codec::STORAGE_STREAM_ONLY.to_string(),
        ));
        fields.push((codec::FIELD_PAYLOAD.to_string(), body));
    } else if let Some((update_key, sequence)) = updateable_key(options, &type_id, notification) {
        let key = format!("updateable:{update_key}");
        retry
            .run(|| store.set_key(&key, &body, options.message_ttl), cancel)
            .await?;
        fields.push((
            codec::FIELD_STORAGE.to_string(),
            codec::STORAGE_UPDATEABLE.to_string(),
        ));
        fields.push((codec::FIELD_KEY.to_string(), key));
        fields.push((codec::FIELD_UPDATE_KEY.to_string(), update_key));
        if let Some(sequence) = sequence {
            fields.push((codec::FIELD_SEQUENCE.to_string(), sequence.to_string()));
        }
    } else {
        retry
            .run(|| store.set_key(&id, &body, options.message_ttl), cancel)
            .await?;
        fields.push((codec::FIELD_KEY.to_string(), id.clone()));
    }

    let max_length = (options.max_stream_length > 0).then_some(options.max_stream_length);
    // The append itself is not retried; a failure lands in the per-item
    // error branch of the worker.
    store
        .append_stream(stream, &fields, max_length, options.approximate_trim)
        .await?;

    if let Err(error) = store.set_key_ttl(stream, options.stream_ttl).await {
        warn!(stream, %error, "stream TTL refresh failed");
    }
    debug!(stream, id = %envelope.id, type_id, "notification appended");
    Ok(())
}

fn derive_type_id(notification: &dyn Notification) -> String {
    let from_payload = notification.type_name().trim();
    if !from_payload.is_empty() {
        return from_payload.to_string();
    }
    let from_envelope = notification.envelope().notification_type.trim();
    if from_envelope.is_empty() {
        UNKNOWN_TYPE.to_string()
    } else {
        from_envelope.to_string()
    }
}

fn updateable_key(
    options: &RedisTransportOptions,
    type_id: &str,
    notification: &dyn Notification,
) -> Option<(String, Option<u64>)> {
    let route = options.updateable_types.get(type_id)?;
    let key = (route.update_key)(notification)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let sequence = route
        .sequence
        .as_ref()
        .and_then(|extract| extract(notification));
    Some((key.to_string(), sequence))
}
