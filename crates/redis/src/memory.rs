//! In-memory log store for tests and development.
//!
//! Implements the full capability surface: keys with expiry, ordered
//! stream entries, per-group cursors starting at the tail, pending entry
//! tracking, and acknowledgement. Failure injection counters let tests
//! exercise the retry and error-branch paths without a live store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::codec::StreamEntry;
use crate::store::{LogStore, LogStoreError};

struct KeyRecord {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, KeyRecord>,
    streams: HashMap<String, Vec<StreamEntry>>,
    /// (stream, group) -> index of the next entry to hand out.
    cursors: HashMap<(String, String), usize>,
    /// (stream, group) -> entry ids read but not yet acknowledged.
    pending: HashMap<(String, String), Vec<String>>,
}

#[derive(Default)]
pub struct MemoryLogStore {
    state: Mutex<State>,
    appended: Notify,
    next_entry: AtomicU64,
    key_writes: AtomicUsize,
    stream_appends: AtomicUsize,
    ttl_refreshes: AtomicUsize,
    acks: AtomicUsize,
    fail_set_key: AtomicUsize,
    fail_append: AtomicUsize,
    fail_read: AtomicUsize,
    fail_ensure_group: AtomicUsize,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_write_count(&self) -> usize {
        self.key_writes.load(Ordering::SeqCst)
    }

    pub fn append_count(&self) -> usize {
        self.stream_appends.load(Ordering::SeqCst)
    }

    pub fn ttl_refresh_count(&self) -> usize {
        self.ttl_refreshes.load(Ordering::SeqCst)
    }

    pub fn ack_count(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }

    /// Fail the next `count` `set_key` calls with a transient error.
    pub fn fail_next_set_key(&self, count: usize) {
        self.fail_set_key.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` `append_stream` calls with a transient error.
    pub fn fail_next_append(&self, count: usize) {
        self.fail_append.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` `read_group` calls with a transient error.
    pub fn fail_next_read(&self, count: usize) {
        self.fail_read.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` `ensure_group` calls with a transient error.
    pub fn fail_next_ensure_group(&self, count: usize) {
        self.fail_ensure_group.store(count, Ordering::SeqCst);
    }

    pub fn key(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .keys
            .get(key)
            .filter(|record| record.expires_at > Instant::now())
            .map(|record| record.value.clone())
    }

    /// Remove a key, regardless of TTL.
    pub fn drop_key(&self, key: &str) {
        self.state.lock().unwrap().keys.remove(key);
    }

    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        let state = self.state.lock().unwrap();
        state.streams.get(stream).cloned().unwrap_or_default()
    }

    pub fn pending(&self, stream: &str, group: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .pending
            .get(&(stream.to_string(), group.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .cursors
            .contains_key(&(stream.to_string(), group.to_string()))
    }

    /// Append an entry directly, bypassing the emitter pipeline.
    pub fn seed_entry(&self, stream: &str, fields: Vec<(String, String)>) -> String {
        let id = format!("{}-0", self.next_entry.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(StreamEntry {
                id: id.clone(),
                fields,
            });
        drop(state);
        self.appended.notify_waiters();
        id
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn set_key(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogStoreError> {
        if Self::take_failure(&self.fail_set_key) {
            return Err(LogStoreError::Connection("injected set_key failure".into()));
        }
        self.key_writes.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().keys.insert(
            key.to_string(),
            KeyRecord {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>, LogStoreError> {
        Ok(self.key(key))
    }

    async fn append_stream(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_length: Option<u64>,
        _approximate: bool,
    ) -> Result<String, LogStoreError> {
        if Self::take_failure(&self.fail_append) {
            return Err(LogStoreError::Connection("injected append failure".into()));
        }
        let id = format!("{}-0", self.next_entry.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        let entries = state.streams.entry(stream.to_string()).or_default();
        entries.push(StreamEntry {
            id: id.clone(),
            fields: fields.to_vec(),
        });
        let excess = match max_length {
            Some(max) => entries.len().saturating_sub(max as usize),
            None => 0,
        };
        if excess > 0 {
            entries.drain(0..excess);
            for ((cursor_stream, _), cursor) in state.cursors.iter_mut() {
                if cursor_stream == stream {
                    *cursor = cursor.saturating_sub(excess);
                }
            }
        }
        drop(state);
        self.stream_appends.fetch_add(1, Ordering::SeqCst);
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn set_key_ttl(&self, key: &str, ttl: Duration) -> Result<(), LogStoreError> {
        self.ttl_refreshes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.keys.get_mut(key) {
            record.expires_at = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), LogStoreError> {
        if Self::take_failure(&self.fail_ensure_group) {
            return Err(LogStoreError::Connection("injected group failure".into()));
        }
        let mut state = self.state.lock().unwrap();
        let tail = state.streams.get(stream).map_or(0, Vec::len);
        state
            .cursors
            .entry((stream.to_string(), group.to_string()))
            .or_insert(tail);
        state
            .pending
            .entry((stream.to_string(), group.to_string()))
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        _consumer: &str,
        stream: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogStoreError> {
        if Self::take_failure(&self.fail_read) {
            return Err(LogStoreError::Connection("injected read failure".into()));
        }
        let deadline = Instant::now() + block;
        loop {
            {
                let mut state = self.state.lock().unwrap();
                let key = (stream.to_string(), group.to_string());
                let Some(&cursor) = state.cursors.get(&key) else {
                    return Err(LogStoreError::Command(format!(
                        "NOGROUP no such consumer group '{group}' for stream '{stream}'"
                    )));
                };
                let available = state.streams.get(stream).map_or(0, Vec::len);
                if cursor < available {
                    let upto = (cursor + count.max(1)).min(available);
                    let batch: Vec<StreamEntry> =
                        state.streams.get(stream).map_or_else(Vec::new, |entries| {
                            entries[cursor..upto].to_vec()
                        });
                    state.cursors.insert(key.clone(), upto);
                    let pending = state.pending.entry(key).or_default();
                    for entry in &batch {
                        pending.push(entry.id.clone());
                    }
                    return Ok(batch);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = self.appended.notified() => {}
                _ = tokio::time::sleep(deadline - now) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), LogStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pending) = state
            .pending
            .get_mut(&(stream.to_string(), group.to_string()))
        {
            pending.retain(|id| id != entry_id);
        }
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, LogStoreError> {
        Ok(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn keys_expire() {
        let store = MemoryLogStore::new();
        store.set_key("k", "v", Duration::from_millis(20)).await.unwrap();
        assert_eq!(store.get_key("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get_key("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn groups_start_at_the_tail() {
        let store = MemoryLogStore::new();
        store.seed_entry("s", fields(&[("type", "old")]));
        store.ensure_group("s", "g").await.unwrap();
        store.seed_entry("s", fields(&[("type", "new")]));

        let batch = store
            .read_group("g", "c", "s", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].field("type"), Some("new"));
    }

    #[tokio::test]
    async fn reads_track_pending_until_acked() {
        let store = MemoryLogStore::new();
        store.ensure_group("s", "g").await.unwrap();
        let id = store.seed_entry("s", fields(&[("type", "x")]));

        let batch = store
            .read_group("g", "c", "s", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(store.pending("s", "g"), vec![id.clone()]);

        store.ack("s", "g", &id).await.unwrap();
        assert!(store.pending("s", "g").is_empty());
    }

    #[tokio::test]
    async fn read_without_a_group_is_an_error() {
        let store = MemoryLogStore::new();
        let result = store
            .read_group("g", "c", "s", Duration::from_millis(10), 10)
            .await;
        assert!(matches!(result, Err(LogStoreError::Command(message)) if message.contains("NOGROUP")));
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let store = MemoryLogStore::new();
        store.ensure_group("s", "g").await.unwrap();
        let batch = store
            .read_group("g", "c", "s", Duration::from_millis(20), 10)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn trimming_keeps_the_newest_entries() {
        let store = MemoryLogStore::new();
        for i in 0..5 {
            store
                .append_stream("s", &fields(&[("n", &i.to_string())]), Some(3), false)
                .await
                .unwrap();
        }
        let entries = store.entries("s");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].field("n"), Some("2"));
    }

    #[tokio::test]
    async fn ping_answers_immediately() {
        let store = MemoryLogStore::new();
        assert_eq!(store.ping().await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryLogStore::new();
        store.fail_next_set_key(1);
        assert!(store.set_key("k", "v", Duration::from_secs(1)).await.is_err());
        assert!(store.set_key("k", "v", Duration::from_secs(1)).await.is_ok());
    }
}
