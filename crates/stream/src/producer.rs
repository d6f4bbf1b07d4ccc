//! Append-only producer side of the event stream.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use pulse_core::Event;

use crate::error::StreamError;
use crate::wire::event_fields;

/// Appends one entry per call; the stream assigns the monotonically
/// increasing entry id.
#[derive(Clone)]
pub struct StreamProducer {
    conn: ConnectionManager,
    stream_key: String,
}

impl StreamProducer {
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
        }
    }

    /// XADD the event; returns the assigned stream id.
    pub async fn enqueue(&self, event: &Event) -> Result<String, StreamError> {
        let fields = event_fields(event)?;
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(&self.stream_key, "*", &fields).await?;
        Ok(id)
    }
}
