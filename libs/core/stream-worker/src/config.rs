//! Worker configuration
//!
//! This module provides `WorkerConfig` for configuring a subscription and its worker.

use crate::registry::StreamDef;
use uuid::Uuid;

/// Configuration for one subscription
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream name
    pub stream_name: String,

    /// Consumer group name (the subscription)
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Maximum stream length before trimming
    pub max_length: i64,

    /// Poll interval in milliseconds when no messages are available
    pub poll_interval_ms: u64,

    /// Batch size for reading messages
    pub batch_size: usize,

    /// Blocking read timeout in milliseconds (None = non-blocking poll)
    pub blocking_timeout_ms: Option<u64>,

    /// Idle time after which an unacknowledged message is redelivered
    pub ack_deadline_ms: u64,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a StreamDef
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_group: S::CONSUMER_GROUP.to_string(),
            consumer_id: format!("consumer-{}", Uuid::new_v4()),
            max_length: S::MAX_LENGTH,
            poll_interval_ms: S::POLL_INTERVAL_MS,
            batch_size: S::BATCH_SIZE,
            // ConnectionManager multiplexes one connection; BLOCK would stall XACK.
            blocking_timeout_ms: None,
            ack_deadline_ms: S::ACK_DEADLINE_MS,
        }
    }

    /// Create a new WorkerConfig with explicit names
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_group: consumer_group.into(),
            consumer_id: format!("consumer-{}", Uuid::new_v4()),
            max_length: 100_000,
            poll_interval_ms: 500,
            batch_size: 10,
            blocking_timeout_ms: None,
            ack_deadline_ms: 60_000,
        }
    }

    /// Override the stream name (deployment-specific naming)
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    /// Override the consumer group
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the blocking timeout (None for non-blocking)
    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.blocking_timeout_ms = timeout_ms;
        self
    }

    /// Set the redelivery deadline for unacknowledged messages
    pub fn with_ack_deadline_ms(mut self, deadline: u64) -> Self {
        self.ack_deadline_ms = deadline;
        self
    }
}
