//! Reliable at-least-once consumer over one stream.
//!
//! Each receiver instance owns one stream and an ephemeral consumer name
//! inside the configured group. Entries are acknowledged only after the
//! subscriber has observed them; entries that fail before emission stay
//! in the pending list for external reclaim.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::{CourierError, CourierResult};
use courier_notify::{Notification, NotificationReceiver, NotificationStream, TagFilter, TypeRegistry};

use crate::codec::{self, StreamEntry};
use crate::init;
use crate::options::RedisTransportOptions;
use crate::store::LogStore;

/// Upper bound of one group read.
const READ_BATCH: usize = 100;
/// Buffer between the read loop and the subscriber.
const DELIVERY_BUFFER: usize = 128;

pub struct RedisStreamReceiver {
    store: Arc<dyn LogStore>,
    options: Arc<RedisTransportOptions>,
    registry: Arc<TypeRegistry>,
    stream: String,
    consumer: String,
    disposed: AtomicBool,
    halt: CancellationToken,
}

impl RedisStreamReceiver {
    pub fn new(
        store: Arc<dyn LogStore>,
        options: Arc<RedisTransportOptions>,
        registry: Arc<TypeRegistry>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            options,
            registry,
            stream: stream.into(),
            consumer: ephemeral_consumer_name(),
            disposed: AtomicBool::new(false),
            halt: CancellationToken::new(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// Ephemeral consumer identity of form `consumer-{host}-{random}`.
fn ephemeral_consumer_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("consumer-{host}-{}", uuid::Uuid::now_v7())
}

#[async_trait]
impl NotificationReceiver for RedisStreamReceiver {
    async fn subscribe(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<NotificationStream> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CourierError::Disposed);
        }
        init::ensure_consumer_group(
            self.store.as_ref(),
            &self.stream,
            &self.options.consumer_group,
            self.options.init_timeout,
            &cancel,
        )
        .await
        .map_err(|error| match error {
            crate::store::LogStoreError::Cancelled => CourierError::Cancelled,
            other => CourierError::transport(format!(
                "consumer group init on {}: {other}",
                self.stream
            )),
        })?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        tokio::spawn(read_loop(ReadLoop {
            store: Arc::clone(&self.store),
            options: Arc::clone(&self.options),
            registry: Arc::clone(&self.registry),
            stream: self.stream.clone(),
            consumer: self.consumer.clone(),
            filter,
            tx,
            cancel,
            halt: self.halt.clone(),
        }));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn shutdown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.halt.cancel();
    }

    fn name(&self) -> &str {
        "redis-stream"
    }
}

struct ReadLoop {
    store: Arc<dyn LogStore>,
    options: Arc<RedisTransportOptions>,
    registry: Arc<TypeRegistry>,
    stream: String,
    consumer: String,
    filter: TagFilter,
    tx: mpsc::Sender<Arc<dyn Notification>>,
    cancel: CancellationToken,
    halt: CancellationToken,
}

async fn read_loop(ctx: ReadLoop) {
    info!(stream = %ctx.stream, consumer = %ctx.consumer, "log consumer started");
    loop {
        let batch = tokio::select! {
            biased;
            _ = ctx.halt.cancelled() => break,
            _ = ctx.cancel.cancelled() => break,
            batch = ctx.store.read_group(
                &ctx.options.consumer_group,
                &ctx.consumer,
                &ctx.stream,
                ctx.options.read_block,
                READ_BATCH,
            ) => batch,
        };
        match batch {
            Ok(entries) => {
                for entry in entries {
                    if !process_entry(&ctx, &entry).await {
                        info!(stream = %ctx.stream, "subscriber gone, log consumer stopping");
                        return;
                    }
                }
            }
            Err(error) if error.is_transient() => {
                warn!(stream = %ctx.stream, %error, "log read failed, resuming after delay");
                tokio::select! {
                    biased;
                    _ = ctx.halt.cancelled() => break,
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ctx.options.error_recovery_delay) => {}
                }
            }
            Err(error) => {
                error!(stream = %ctx.stream, %error, "log consumer failed, sequence ends");
                break;
            }
        }
    }
    info!(stream = %ctx.stream, "log consumer stopped");
}

/// Handle one entry. Returns false once the subscriber went away.
///
/// The entry is acknowledged only after a successful emit (or a tag
/// mismatch); any earlier failure leaves it pending.
async fn process_entry(ctx: &ReadLoop, entry: &StreamEntry) -> bool {
    let body = match entry_body(ctx.store.as_ref(), entry).await {
        Ok(body) => body,
        Err(reason) => {
            warn!(stream = %ctx.stream, entry = %entry.id, reason, "entry rejected, left pending");
            return true;
        }
    };

    let type_name = entry.field(codec::FIELD_TYPE).unwrap_or_default();
    let wire_id = entry.field(codec::FIELD_ID);
    let wire_timestamp = entry
        .field(codec::FIELD_TIMESTAMP)
        .and_then(codec::parse_timestamp);
    let notification = ctx
        .registry
        .decode_or_fallback(&body, type_name, wire_id, wire_timestamp);

    if ctx.filter.matches(&notification.envelope().tags) {
        let shared: Arc<dyn Notification> = Arc::from(notification);
        if ctx.tx.send(shared).await.is_err() {
            // Not acknowledged: a future reader may reclaim the entry.
            return false;
        }
    } else {
        debug!(stream = %ctx.stream, entry = %entry.id, "entry filtered out by tags");
    }

    if let Err(error) = ctx
        .store
        .ack(&ctx.stream, &ctx.options.consumer_group, &entry.id)
        .await
    {
        warn!(stream = %ctx.stream, entry = %entry.id, %error, "acknowledge failed, entry stays pending");
    }
    true
}

async fn entry_body(store: &dyn LogStore, entry: &StreamEntry) -> Result<String, String> {
    let storage = entry
        .field(codec::FIELD_STORAGE)
        .unwrap_or(codec::STORAGE_STANDARD);
    if storage == codec::STORAGE_STREAM_ONLY {
        return entry
            .field(codec::FIELD_PAYLOAD)
            .map(str::to_string)
            .ok_or_else(|| "stream-only entry without payload field".to_string());
    }
    let key = entry
        .field(codec::FIELD_KEY)
        .ok_or_else(|| "entry without key field".to_string())?;
    match store.get_key(key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(format!("key {key} missing from log store")),
        Err(error) => Err(format!("key {key} fetch failed: {error}")),
    }
}
