//! Global notification options.

use std::time::Duration;

/// Deduplication policy of the composite receiver.
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    /// Lifetime of a dedup entry. After expiry the same identifier is
    /// accepted again.
    pub dedup_ttl: Duration,
    /// Size bound of the dedup cache; every entry costs one unit.
    pub dedup_max_entries: usize,
    /// Fraction of the cache evicted (oldest first) when the bound is hit.
    pub dedup_compaction_fraction: f64,
    /// Interval of the periodic TTL scan.
    pub dedup_scan_interval: Duration,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(10 * 60),
            dedup_max_entries: 10_000,
            dedup_compaction_fraction: 0.25,
            dedup_scan_interval: Duration::from_secs(60),
        }
    }
}

impl NotificationOptions {
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    pub fn with_dedup_max_entries(mut self, max_entries: usize) -> Self {
        self.dedup_max_entries = max_entries;
        self
    }

    pub fn with_dedup_compaction_fraction(mut self, fraction: f64) -> Self {
        self.dedup_compaction_fraction = fraction;
        self
    }

    pub fn with_dedup_scan_interval(mut self, interval: Duration) -> Self {
        self.dedup_scan_interval = interval;
        self
    }
}
