//! Log transport configuration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_notify::Notification;

/// Behavior of `emit` when the work queue is full.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum QueueFullMode {
    /// Suspend the caller until room frees up (backpressure).
    #[default]
    Wait,
    /// Discard the item being written.
    DropNewest,
    /// Discard the oldest queued item.
    DropOldest,
}

/// Extracts the overwrite key for an updateable payload type.
pub type UpdateKeyFn = Arc<dyn Fn(&dyn Notification) -> Option<String> + Send + Sync>;
/// Extracts the optional monotonic sequence for an updateable payload.
pub type SequenceFn = Arc<dyn Fn(&dyn Notification) -> Option<u64> + Send + Sync>;

/// Write routing of an updateable payload type: each write overwrites the
/// key derived from the payload, losing prior versions.
#[derive(Clone)]
pub struct UpdateableRoute {
    pub update_key: UpdateKeyFn,
    pub sequence: Option<SequenceFn>,
}

impl UpdateableRoute {
    pub fn keyed<F>(update_key: F) -> Self
    where
        F: Fn(&dyn Notification) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            update_key: Arc::new(update_key),
            sequence: None,
        }
    }

    pub fn with_sequence<F>(mut self, sequence: F) -> Self
    where
        F: Fn(&dyn Notification) -> Option<u64> + Send + Sync + 'static,
    {
        self.sequence = Some(Arc::new(sequence));
        self
    }
}

impl fmt::Debug for UpdateableRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateableRoute")
            .field("sequence", &self.sequence.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RedisTransportOptions {
    /// Connection string of the log store. Required unless a store handle
    /// is injected directly.
    pub connection_string: String,
    /// Stream receiving payload types without an explicit route.
    pub default_stream: String,
    /// Consumer group every receiver joins.
    pub consumer_group: String,
    /// Bound of the emission work queue.
    pub queue_capacity: usize,
    pub queue_full_mode: QueueFullMode,
    /// Bound on stream/group initialization.
    pub init_timeout: Duration,
    /// Block duration of one group read.
    pub read_block: Duration,
    /// Delay before the single key-write retry.
    pub retry_delay: Duration,
    /// Delay before the consumer loop resumes after a transient failure.
    pub error_recovery_delay: Duration,
    /// TTL of individual payload keys.
    pub message_ttl: Duration,
    /// TTL of the stream key, refreshed on every write.
    pub stream_ttl: Duration,
    /// Stream trim threshold; 0 disables trimming.
    pub max_stream_length: u64,
    /// Faster, inexact trimming.
    pub approximate_trim: bool,
    /// Payload type to stream routing.
    pub stream_routes: HashMap<String, String>,
    /// Payload types carried inline in the stream, with no key record.
    pub stream_only_types: HashSet<String>,
    /// Payload types overwritten under a derived key.
    pub updateable_types: HashMap<String, UpdateableRoute>,
    /// Streams the consumer side reads; empty derives the set from the
    /// routes plus the default stream.
    pub streams: Vec<String>,
}

impl Default for RedisTransportOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            default_stream: "notifications:stream:default".to_string(),
            consumer_group: "G_api_worker".to_string(),
            queue_capacity: 10_000,
            queue_full_mode: QueueFullMode::Wait,
            init_timeout: Duration::from_secs(30),
            read_block: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
            error_recovery_delay: Duration::from_secs(1),
            message_ttl: Duration::from_secs(60 * 60),
            stream_ttl: Duration::from_secs(24 * 60 * 60),
            max_stream_length: 10_000,
            approximate_trim: false,
            stream_routes: HashMap::new(),
            stream_only_types: HashSet::new(),
            updateable_types: HashMap::new(),
            streams: Vec::new(),
        }
    }
}

impl RedisTransportOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    pub fn with_default_stream(mut self, stream: impl Into<String>) -> Self {
        self.default_stream = stream.into();
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_queue_full_mode(mut self, mode: QueueFullMode) -> Self {
        self.queue_full_mode = mode;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_read_block(mut self, block: Duration) -> Self {
        self.read_block = block;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_error_recovery_delay(mut self, delay: Duration) -> Self {
        self.error_recovery_delay = delay;
        self
    }

    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    pub fn with_stream_ttl(mut self, ttl: Duration) -> Self {
        self.stream_ttl = ttl;
        self
    }

    pub fn with_max_stream_length(mut self, max: u64) -> Self {
        self.max_stream_length = max;
        self
    }

    pub fn with_approximate_trim(mut self, approximate: bool) -> Self {
        self.approximate_trim = approximate;
        self
    }

    /// Route a payload type to a dedicated stream.
    pub fn route_type(mut self, type_name: impl Into<String>, stream: impl Into<String>) -> Self {
        self.stream_routes.insert(type_name.into(), stream.into());
        self
    }

    /// Carry a payload type inline in the stream entry.
    pub fn stream_only(mut self, type_name: impl Into<String>) -> Self {
        self.stream_only_types.insert(type_name.into());
        self
    }

    /// Overwrite a payload type under a key derived from the payload.
    pub fn updateable(mut self, type_name: impl Into<String>, route: UpdateableRoute) -> Self {
        self.updateable_types.insert(type_name.into(), route);
        self
    }

    /// Consume an explicit stream (repeatable).
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.streams.push(stream.into());
        self
    }

    /// Streams the consumer side should read: the explicit list when
    /// given, otherwise the default stream plus every routed stream.
    pub fn consumed_streams(&self) -> Vec<String> {
        let mut streams = if self.streams.is_empty() {
            let mut routed: Vec<String> = self.stream_routes.values().cloned().collect();
            routed.sort();
            let mut derived = vec![self.default_stream.clone()];
            derived.extend(routed);
            derived
        } else {
            self.streams.clone()
        };
        let mut seen = HashSet::new();
        streams.retain(|stream| seen.insert(stream.clone()));
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let options = RedisTransportOptions::default();
        assert_eq!(options.default_stream, "notifications:stream:default");
        assert_eq!(options.consumer_group, "G_api_worker");
        assert_eq!(options.queue_capacity, 10_000);
        assert_eq!(options.queue_full_mode, QueueFullMode::Wait);
        assert_eq!(options.init_timeout, Duration::from_secs(30));
        assert_eq!(options.read_block, Duration::from_secs(5));
        assert_eq!(options.retry_delay, Duration::from_secs(2));
        assert_eq!(options.error_recovery_delay, Duration::from_secs(1));
        assert_eq!(options.message_ttl, Duration::from_secs(3600));
        assert_eq!(options.stream_ttl, Duration::from_secs(86_400));
        assert_eq!(options.max_stream_length, 10_000);
        assert!(!options.approximate_trim);
        assert!(options.stream_routes.is_empty());
    }

    #[test]
    fn consumed_streams_derive_from_routes() {
        let options = RedisTransportOptions::default()
            .route_type("a.Metric", "notifications:stream:metrics")
            .route_type("b.Metric", "notifications:stream:metrics")
            .route_type("a.Audit", "notifications:stream:audit");
        assert_eq!(
            options.consumed_streams(),
            vec![
                "notifications:stream:default".to_string(),
                "notifications:stream:audit".to_string(),
                "notifications:stream:metrics".to_string(),
            ]
        );
    }

    #[test]
    fn explicit_streams_win_and_deduplicate() {
        let options = RedisTransportOptions::default()
            .route_type("a.Metric", "notifications:stream:metrics")
            .with_stream("s-1")
            .with_stream("s-2")
            .with_stream("s-1");
        assert_eq!(options.consumed_streams(), vec!["s-1".to_string(), "s-2".to_string()]);
    }
}
