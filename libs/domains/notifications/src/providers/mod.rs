//! Email provider implementations.
//!
//! This module contains the `EmailProvider` trait and implementations
//! for different email sending services.

mod sendgrid;
mod smtp;

pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{GmailOAuthConfig, SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use crate::models::DeliveryOrder;
use async_trait::async_trait;

/// Represents a sent email with provider-specific message ID.
#[derive(Debug, Clone, Default)]
pub struct SentEmail {
    /// Provider-specific message ID for tracking.
    pub message_id: Option<String>,
}

/// Trait for email sending providers.
///
/// A single call is a single transport attempt. Failures must come back as
/// `TransientDelivery` (worth retrying) or `RejectedDelivery` (final).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email.
    async fn send(&self, order: &DeliveryOrder) -> NotificationResult<SentEmail>;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;

    /// Check if the provider is healthy/configured.
    async fn health_check(&self) -> NotificationResult<bool>;
}
