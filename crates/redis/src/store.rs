//! Log-store capability and its Redis implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;

use crate::codec::{self, StreamEntry};

#[derive(Debug, Error)]
pub enum LogStoreError {
    /// Transport-level failure (socket, pool, refused connection).
    #[error("log store connection: {0}")]
    Connection(String),

    /// The store did not answer inside the response deadline.
    #[error("log store timed out")]
    Timeout,

    /// The store answered with an error or an unusable reply.
    #[error("log store command failed: {0}")]
    Command(String),

    /// The payload could not be encoded for the wire.
    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// The operation was cancelled before completion.
    #[error("log store operation cancelled")]
    Cancelled,
}

impl LogStoreError {
    /// Transient failures are worth one retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout)
    }
}

impl From<redis::RedisError> for LogStoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error()
        {
            Self::Connection(error.to_string())
        } else {
            Self::Command(error.to_string())
        }
    }
}

/// Minimal abstract surface the transport consumes from the log store.
///
/// The handle behind an implementation is expected to be multiplexed:
/// every emitter and consumer shares one.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Set `key` to `value` with a TTL. Atomic.
    async fn set_key(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogStoreError>;

    /// Fetch `key`, or `None` when missing or expired.
    async fn get_key(&self, key: &str) -> Result<Option<String>, LogStoreError>;

    /// Append an entry, optionally trimming the stream to `max_length`
    /// (inexactly when `approximate` is set). Returns the entry id.
    async fn append_stream(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_length: Option<u64>,
        approximate: bool,
    ) -> Result<String, LogStoreError>;

    /// Refresh/extend a key's TTL.
    async fn set_key_ttl(&self, key: &str, ttl: Duration) -> Result<(), LogStoreError>;

    /// Idempotently create a consumer group at the stream's current tail.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), LogStoreError>;

    /// Blocking read of new entries for `consumer` within `group`.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogStoreError>;

    /// Remove an entry from the group's pending list.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), LogStoreError>;

    /// Health probe; returns round-trip latency.
    async fn ping(&self) -> Result<Duration, LogStoreError>;
}

/// Response deadline that comfortably outlives a blocking group read.
pub fn response_deadline(read_block: Duration) -> Duration {
    read_block.mul_f64(2.5) + Duration::from_secs(15)
}

/// Redis-backed log store over one multiplexed connection.
///
/// The connection handle is cheap to clone and shared by every emitter
/// and consumer. Blocking group reads hold a connection for the full
/// block interval, so the response deadline is derived from the
/// configured block duration at connection time.
#[derive(Clone)]
pub struct RedisLogStore {
    conn: ConnectionManager,
    response_timeout: Duration,
}

impl RedisLogStore {
    pub async fn connect(
        connection_string: &str,
        read_block: Duration,
    ) -> Result<Self, LogStoreError> {
        let client = redis::Client::open(connection_string)
            .map_err(|error| LogStoreError::Connection(error.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(LogStoreError::from)?;
        Ok(Self {
            conn,
            response_timeout: response_deadline(read_block),
        })
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, LogStoreError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.response_timeout, cmd.query_async::<_, T>(&mut conn)).await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(error.into()),
            Err(_elapsed) => Err(LogStoreError::Timeout),
        }
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn set_key(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogStoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl.as_millis() as u64);
        self.query::<()>(&cmd).await
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>, LogStoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query::<Option<String>>(&cmd).await
    }

    async fn append_stream(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_length: Option<u64>,
        approximate: bool,
    ) -> Result<String, LogStoreError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max) = max_length.filter(|max| *max > 0) {
            cmd.arg("MAXLEN");
            if approximate {
                cmd.arg("~");
            } else {
                cmd.arg("=");
            }
            cmd.arg(max);
        }
        cmd.arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }
        self.query::<String>(&cmd).await
    }

    async fn set_key_ttl(&self, key: &str, ttl: Duration) -> Result<(), LogStoreError> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl.as_millis() as u64);
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), LogStoreError> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg("$").arg("MKSTREAM");
        match self.query::<String>(&cmd).await {
            Ok(_) => Ok(()),
            // Group already exists: the call is a no-op.
            Err(LogStoreError::Command(message)) if message.contains("BUSYGROUP") => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogStoreError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">");
        let reply = self.query::<redis::Value>(&cmd).await?;
        Ok(codec::decode_read_reply(&reply))
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), LogStoreError> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(entry_id);
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, LogStoreError> {
        let started = Instant::now();
        let cmd = redis::cmd("PING");
        let _: String = self.query(&cmd).await?;
        Ok(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LogStoreError::Connection("refused".into()).is_transient());
        assert!(LogStoreError::Timeout.is_transient());
        assert!(!LogStoreError::Command("WRONGTYPE".into()).is_transient());
        assert!(!LogStoreError::Encode("bad".into()).is_transient());
        assert!(!LogStoreError::Cancelled.is_transient());
    }

    #[test]
    fn response_deadline_outlives_the_block() {
        let block = Duration::from_secs(5);
        let deadline = response_deadline(block);
        assert_eq!(deadline, Duration::from_millis(5 * 2500) + Duration::from_secs(15));
        assert!(deadline > block * 2);
    }
}
