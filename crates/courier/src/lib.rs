//! Courier: a reactive notification fabric.
//!
//! One emit call fans out to every registered transport; one subscription
//! merges every transport with centralized duplicate suppression. Ships
//! with a co-located in-process transport and a log-structured stream
//! transport backed by Redis Streams.
//!
//! ```ignore
//! let courier = CourierBuilder::new()
//!     .register_type::<DeployStarted>("deploy.Started")
//!     .with_in_process()
//!     .with_redis(RedisTransportOptions::new("redis://localhost:6379"))
//!     .build()
//!     .await?;
//!
//! courier.emit(DeployStarted::new("api"), &cancel).await?;
//! let mut stream = courier.subscribe(TagFilter::any(), cancel.clone()).await?;
//! ```

pub mod builder;


pub use builder::{Courier, CourierBuilder};

pub use courier_core::{CourierError, CourierResult, NotificationId, Severity};
pub use courier_notify::{
    Envelope, GenericNotification, Notification, NotificationEmitter, NotificationOptions,
    NotificationReceiver, NotificationStream, TagFilter, TypeRegistry, notification_payload,
};
pub use courier_redis::{
    LogStore, LogStoreError, MemoryLogStore, QueueFullMode, RedisLogStore,
    RedisTransportOptions, UpdateableRoute,
};

pub use courier_observability as observability;
