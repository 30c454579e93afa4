//! Registration and wiring of the notification fabric.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use courier_core::{CourierError, CourierResult};
use courier_notify::{
    CompositeEmitter, CompositeReceiver, DEFAULT_CONDUIT_CAPACITY, InProcessConduit,
    InProcessEmitter, InProcessReceiver, Notification, NotificationEmitter, NotificationOptions,
    NotificationReceiver, NotificationStream, TagFilter, TypeRegistry,
};
use courier_redis::{
    LogStore, RedisLogStore, RedisStreamEmitter, RedisStreamReceiver, RedisTransportOptions,
};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

struct RedisRegistration {
    options: RedisTransportOptions,
    store: Option<Arc<dyn LogStore>>,
}

/// Collects transport registrations, payload types, and options, then
/// wires the composite emitter and receiver.
///
/// Registration order is the dispatch order: in-process first (when
/// registered), then the log transport, then custom transports. Options
/// are frozen at [`build`](Self::build).
pub struct CourierBuilder {
    options: NotificationOptions,
    registry: TypeRegistry,
    in_process: bool,
    conduit_capacity: usize,
    redis: Option<RedisRegistration>,
    extra_emitters: Vec<Arc<dyn NotificationEmitter>>,
    extra_receivers: Vec<Arc<dyn NotificationReceiver>>,
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self {
            options: NotificationOptions::default(),
            registry: TypeRegistry::new(),
            in_process: false,
            conduit_capacity: DEFAULT_CONDUIT_CAPACITY,
            redis: None,
            extra_emitters: Vec::new(),
            extra_receivers: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: NotificationOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a payload type for decode on the receive side.
    pub fn register_type<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: Notification + DeserializeOwned,
    {
        self.registry.register::<T>(type_name);
        self
    }

    /// Register the co-located in-process transport (emitter + receiver).
    pub fn with_in_process(mut self) -> Self {
        self.in_process = true;
        self
    }

    pub fn with_in_process_capacity(mut self, capacity: usize) -> Self {
        self.in_process = true;
        self.conduit_capacity = capacity;
        self
    }

    /// Register the log transport; the store is connected at build time
    /// from the options' connection string.
    pub fn with_redis(mut self, options: RedisTransportOptions) -> Self {
        self.redis = Some(RedisRegistration {
            options,
            store: None,
        });
        self
    }

    /// Register the log transport over an already-connected store handle
    /// (tests, custom pools). The connection string is not consulted.
    pub fn with_redis_store(
        mut self,
        store: Arc<dyn LogStore>,
        options: RedisTransportOptions,
    ) -> Self {
        self.redis = Some(RedisRegistration {
            options,
            store: Some(store),
        });
        self
    }

    /// Register a custom transport emitter.
    pub fn register_emitter(mut self, emitter: Arc<dyn NotificationEmitter>) -> Self {
        self.extra_emitters.push(emitter);
        self
    }

    /// Register a custom transport receiver.
    pub fn register_receiver(mut self, receiver: Arc<dyn NotificationReceiver>) -> Self {
        self.extra_receivers.push(receiver);
        self
    }

    /// Validate the registrations and wire the fabric.
    pub async fn build(self) -> CourierResult<Courier> {
        let has_builtin = self.in_process || self.redis.is_some();
        if !has_builtin && self.extra_emitters.is_empty() {
            return Err(CourierError::config("no transport emitters registered"));
        }
        if !has_builtin && self.extra_receivers.is_empty() {
            return Err(CourierError::config("no transport receivers registered"));
        }
        if let Some(redis) = &self.redis {
            if redis.store.is_none() && redis.options.connection_string.trim().is_empty() {
                return Err(CourierError::config(
                    "log transport registered without a connection string",
                ));
            }
        }

        let mut emitters: Vec<Arc<dyn NotificationEmitter>> = Vec::new();
        let mut receivers: Vec<Arc<dyn NotificationReceiver>> = Vec::new();

        if self.in_process {
            let conduit = InProcessConduit::new(self.conduit_capacity);
            emitters.push(Arc::new(InProcessEmitter::new(Arc::clone(&conduit))));
            receivers.push(Arc::new(InProcessReceiver::new(conduit)));
        }

        if let Some(redis) = self.redis {
            let options = Arc::new(redis.options);
            let store = match redis.store {
                Some(store) => store,
                None => Arc::new(
                    RedisLogStore::connect(&options.connection_string, options.read_block)
                        .await
                        .map_err(|error| CourierError::transport(error.to_string()))?,
                ) as Arc<dyn LogStore>,
            };

            let emitter = RedisStreamEmitter::new(Arc::clone(&store), Arc::clone(&options));
            emitter.start();
            emitters.push(Arc::new(emitter));

            let registry = Arc::new(self.registry.clone());
            // One receiver instance per registered stream; each stream is
            // an independent sequence.
            for stream in options.consumed_streams() {
                receivers.push(Arc::new(RedisStreamReceiver::new(
                    Arc::clone(&store),
                    Arc::clone(&options),
                    Arc::clone(&registry),
                    stream,
                )));
            }
        }

        emitters.extend(self.extra_emitters);
        receivers.extend(self.extra_receivers);

        info!(
            emitters = emitters.len(),
            receivers = receivers.len(),
            "notification fabric wired"
        );
        Ok(Courier {
            emitter: CompositeEmitter::new(emitters),
            receiver: CompositeReceiver::new(receivers, &self.options),
        })
    }
}

/// The wired fabric: composite emitter plus composite receiver.
pub struct Courier {
    emitter: CompositeEmitter,
    receiver: CompositeReceiver,
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier").finish_non_exhaustive()
    }
}

impl Courier {
    /// Emit a payload to every transport; identity is frozen here.
    pub async fn emit<N: Notification>(
        &self,
        notification: N,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        self.emitter.emit(notification, cancel).await
    }

    /// One merged, deduplicated sequence over every transport.
    pub async fn subscribe(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<NotificationStream> {
        self.receiver.subscribe(filter, cancel).await
    }

    /// Merged sequence narrowed to payloads of type `T`.
    pub async fn subscribe_typed<T: Notification>(
        &self,
        filter: TagFilter,
        cancel: CancellationToken,
    ) -> CourierResult<BoxStream<'static, Arc<T>>> {
        self.receiver.subscribe_typed(filter, cancel).await
    }

    pub fn emitter(&self) -> &CompositeEmitter {
        &self.emitter
    }

    pub fn receiver(&self) -> &CompositeReceiver {
        &self.receiver
    }

    /// Dispose both sides of the fabric. Idempotent.
    pub async fn shutdown(&self) {
        self.emitter.shutdown().await;
        self.receiver.shutdown().await;
    }
}
