//! Stream producer
//!
//! Publishes payloads onto a stream so any subscription's consumer group
//! picks them up.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_worker::StreamProducer;
//!
//! let producer = StreamProducer::from_stream_def::<ImmediateStream>(redis);
//! let id = producer.publish_json(&envelope).await?;
//! ```

use crate::consumer::PAYLOAD_FIELD;
use crate::error::StreamError;
use crate::registry::StreamDef;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::debug;

/// Publishes messages to one stream
pub struct StreamProducer {
    redis: ConnectionManager,
    stream_name: String,
    max_length: i64,
}

impl StreamProducer {
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            max_length: 100_000,
        }
    }

    /// Create a producer from a `StreamDef` so names match the worker
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self {
            redis,
            stream_name: S::STREAM_NAME.to_string(),
            max_length: S::MAX_LENGTH,
        }
    }

    /// Set the maximum stream length (MAXLEN ~).
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Publish raw payload bytes. Returns the stream message id.
    pub async fn publish(&self, payload: &[u8]) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();

        let stream_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!(
            stream = %self.stream_name,
            stream_id = %stream_id,
            "Published message"
        );

        Ok(stream_id)
    }

    /// Serialize `value` as JSON and publish it
    pub async fn publish_json<T: Serialize>(&self, value: &T) -> Result<String, StreamError> {
        let payload = serde_json::to_vec(value)?;
        self.publish(&payload).await
    }
}
