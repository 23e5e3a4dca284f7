//! Message source abstraction
//!
//! A subscription hands out `{id, payload}` messages and expects each one
//! to be settled with exactly one `ack` or `nack`.

use crate::error::StreamError;
use async_trait::async_trait;

/// A message delivered by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Bus-assigned message id, used to settle the message
    pub id: String,
    /// Raw payload bytes (JSON for the notification subscriptions)
    pub payload: Vec<u8>,
    /// How many times the bus has delivered this message (1 on first delivery)
    pub delivery_count: u64,
}

impl BusMessage {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            delivery_count: 1,
        }
    }

    /// Whether this is a redelivery of an unacknowledged message
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// At-least-once subscription.
///
/// Messages that are neither acked nor nacked are redelivered after the
/// subscription's ack deadline. `nack` requests redelivery.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Subscription name, used for logs and metric labels
    fn subscription(&self) -> &str;

    /// Prepare the subscription (create consumer group etc.)
    async fn init(&self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Fetch the next batch of messages, possibly empty
    async fn fetch(&self) -> Result<Vec<BusMessage>, StreamError>;

    /// Settle a message as handled
    async fn ack(&self, id: &str) -> Result<(), StreamError>;

    /// Settle a message as not handled; the bus redelivers it
    async fn nack(&self, id: &str) -> Result<(), StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_first_delivery() {
        let msg = BusMessage::new("1-0", b"{}".to_vec());
        assert_eq!(msg.delivery_count, 1);
        assert!(!msg.is_redelivery());
    }
}
