//! Bounded TTL set of already-delivered notification identifiers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::options::NotificationOptions;

/// First-writer-wins duplicate suppression.
///
/// `insert_if_absent` returns true only for the first delivery of an id
/// inside the TTL window. Entries leave the set on TTL expiry (periodic
/// scan or on access) or through size-driven compaction: when the set
/// reaches its bound, expired entries are purged and the oldest
/// configured fraction is evicted. An evicted identifier may be admitted
/// again.
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
    compaction_fraction: f64,
    scan_interval: Duration,
    scan_started: AtomicBool,
}

impl DedupCache {
    pub fn new(options: &NotificationOptions) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: options.dedup_ttl,
            max_entries: options.dedup_max_entries.max(1),
            compaction_fraction: options.dedup_compaction_fraction.clamp(0.0, 1.0),
            scan_interval: options.dedup_scan_interval,
            scan_started: AtomicBool::new(false),
        }
    }

    /// Record `id` as seen. Returns false when it was already present
    /// inside the TTL window.
    pub fn insert_if_absent(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(seen_at) = entries.get(id) {
            if now.duration_since(*seen_at) < self.ttl {
                return false;
            }
            entries.remove(id);
        }
        if entries.len() >= self.max_entries {
            self.evict(&mut entries, now);
        }
        entries.insert(id.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        before - entries.len()
    }

    fn evict(&self, entries: &mut HashMap<String, Instant>, now: Instant) {
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        if entries.len() < self.max_entries {
            return;
        }
        let count = ((self.max_entries as f64 * self.compaction_fraction).ceil() as usize).max(1);
        let mut by_age: Vec<(String, Instant)> = entries
            .iter()
            .map(|(id, seen_at)| (id.clone(), *seen_at))
            .collect();
        by_age.sort_by_key(|(_, seen_at)| *seen_at);
        let evicted = by_age.len().min(count);
        for (id, _) in by_age.into_iter().take(count) {
            entries.remove(&id);
        }
        debug!(evicted, "dedup cache reached capacity, oldest entries evicted");
    }

    /// Start the periodic TTL scan. Idempotent; the task stops when
    /// `halt` fires.
    pub fn start_scan(self: &Arc<Self>, halt: CancellationToken) {
        if self.scan_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cache.scan_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = halt.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "dedup scan dropped expired entries");
                        }
                    }
                }
            }
        });
    }
}
