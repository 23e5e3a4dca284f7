//! Subscription registry types.
//!
//! This module provides:
//! - `StreamDef` trait for domain-specific stream definitions
//! - `Disposition` for settling a delivered message
//! - `StreamHandler` trait implemented by domain message handlers

use crate::source::BusMessage;
use async_trait::async_trait;
use strum::{Display, IntoStaticStr};

/// How a handled message is settled on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    /// Remove the message from the subscription.
    Ack,
    /// Leave the message for redelivery.
    Nack,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Stream definition trait.
///
/// Each domain implements this trait to define a subscription.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct ImmediateStream;
///
/// impl StreamDef for ImmediateStream {
///     const STREAM_NAME: &'static str = "email-notifications:immediate";
///     const CONSUMER_GROUP: &'static str = "email-notifications-immediate-sub";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name.
    const STREAM_NAME: &'static str;

    /// The consumer group (subscription) name.
    const CONSUMER_GROUP: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN).
    const MAX_LENGTH: i64 = 100_000;

    /// Messages fetched per read.
    const BATCH_SIZE: usize = 10;

    /// Poll interval when the stream is idle.
    const POLL_INTERVAL_MS: u64 = 500;

    /// Idle time before an unsettled message is redelivered.
    const ACK_DEADLINE_MS: u64 = 60_000;

    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }
}

/// Handles messages of one subscription.
///
/// Handlers report a [`Disposition`] instead of an error: every failure
/// mode has already been mapped to ack or nack by the time `handle` returns.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, message: &BusMessage) -> Disposition;

    /// Handler name for logging and metrics.
    fn name(&self) -> &'static str;
}
