//! Consumer-group read side of the event stream.
//!
//! The consumer loop drives this through the [`StreamReader`] trait so the
//! ack-ordering properties can be exercised against an in-memory fake.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::error::StreamError;

/// One delivered stream entry. `fields` is empty when the entry was trimmed
/// from the stream after delivery (a nil-ified pending entry).
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

#[async_trait]
pub trait StreamReader: Send {
    /// Create the consumer group with a new-entries-only cursor, creating
    /// the stream if absent. Idempotent: an already-existing group is fine.
    async fn ensure_group(&mut self) -> Result<(), StreamError>;

    /// Re-read this consumer's own pending (delivered, unacknowledged)
    /// entries from the beginning.
    async fn read_pending(&mut self, count: usize) -> Result<Vec<StreamEntry>, StreamError>;

    /// Read up to `count` new entries, blocking up to `block_ms`.
    async fn read_new(&mut self, count: usize, block_ms: u64)
        -> Result<Vec<StreamEntry>, StreamError>;

    /// Acknowledge one entry, removing it from this consumer's pending list.
    async fn ack(&mut self, id: &str) -> Result<(), StreamError>;
}

pub struct RedisStreamReader {
    conn: ConnectionManager,
    key: String,
    group: String,
    consumer: String,
}

impl RedisStreamReader {
    pub fn new(
        conn: ConnectionManager,
        key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key: key.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    async fn read(&mut self, cursor: &str, opts: StreamReadOptions) -> Result<Vec<StreamEntry>, StreamError> {
        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.key], &[cursor], &opts)
            .await?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let mut fields = Vec::with_capacity(id.map.len());
                for (name, value) in id.map {
                    match redis::from_redis_value::<String>(&value) {
                        Ok(v) => fields.push((name, v)),
                        Err(_) => continue, // nil value from a trimmed entry
                    }
                }
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl StreamReader for RedisStreamReader {
    async fn ensure_group(&mut self) -> Result<(), StreamError> {
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.key)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            // Group already exists — create-if-absent semantics.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_pending(&mut self, count: usize) -> Result<Vec<StreamEntry>, StreamError> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);
        self.read("0", opts).await
    }

    async fn read_new(
        &mut self,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(block_ms as usize);
        self.read(">", opts).await
    }

    async fn ack(&mut self, id: &str) -> Result<(), StreamError> {
        let _: i64 = self.conn.xack(&self.key, &self.group, &[id]).await?;
        Ok(())
    }
}
