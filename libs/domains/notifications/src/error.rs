//! Error types for the notifications domain.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Event payload could not be decoded. Redelivery cannot fix it.
    #[error("Malformed event: {0}")]
    Decode(String),

    /// Transport failure that may succeed on a later attempt
    /// (network, expired credentials, throttling, 5xx).
    #[error("Transient delivery failure: {0}")]
    TransientDelivery(String),

    /// Transport permanently rejected the message (bad recipient, 4xx).
    #[error("Delivery rejected: {0}")]
    RejectedDelivery(String),

    /// Every attempt failed; carries the last underlying error.
    #[error("Delivery failed after {attempts} attempts: {last}")]
    DeliveryExhausted {
        attempts: u32,
        last: Box<NotificationError>,
    },

    /// Template missing or failed to render.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Notification store error.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Whether another delivery attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotificationError::TransientDelivery(_))
    }

    /// Short error class for logs and metric labels.
    pub fn class(&self) -> &'static str {
        match self {
            NotificationError::Decode(_) => "decode",
            NotificationError::TransientDelivery(_) => "transient",
            NotificationError::RejectedDelivery(_) => "rejected",
            NotificationError::DeliveryExhausted { .. } => "exhausted",
            NotificationError::Template(_) => "template",
            NotificationError::Store(_) => "store",
            NotificationError::Config(_) => "config",
            NotificationError::Internal(_) => "internal",
        }
    }
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::Store(err.to_string())
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::TransientDelivery(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_delivery_is_retryable() {
        assert!(NotificationError::TransientDelivery("timeout".into()).is_retryable());
        assert!(!NotificationError::RejectedDelivery("550".into()).is_retryable());
        assert!(!NotificationError::Template("missing".into()).is_retryable());
        assert!(
            !NotificationError::DeliveryExhausted {
                attempts: 4,
                last: Box::new(NotificationError::TransientDelivery("timeout".into())),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_exhausted_message_includes_last_error() {
        let err = NotificationError::DeliveryExhausted {
            attempts: 4,
            last: Box::new(NotificationError::TransientDelivery("connection reset".into())),
        };
        assert_eq!(
            err.to_string(),
            "Delivery failed after 4 attempts: Transient delivery failure: connection reset"
        );
        assert_eq!(err.class(), "exhausted");
    }
}
