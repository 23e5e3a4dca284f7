//! Notifications Domain
//!
//! Turns "a user has new content" events into delivered email, either right
//! away or batched into a daily digest.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │ immediate stream     │   │ daily stream         │
//! └──────────┬───────────┘   └──────────┬───────────┘
//!            │                          │
//! ┌──────────▼──────────────────────────▼───────────┐
//! │ EventIntake      decode → route → ack/nack       │
//! └──────────┬──────────────────────────┬───────────┘
//!            │                          │
//!            │                ┌─────────▼──────────┐
//!            │                │ DigestAggregator   │ ← flush (cron / HTTP)
//!            │                └─────────┬──────────┘
//!            │                          │
//! ┌──────────▼──────────────────────────▼───────────┐
//! │ DeliveryEngine   retries + backoff               │
//! └──────────┬──────────────────────────────────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ Email Provider       │  ← SMTP (OAuth2), SendGrid
//! └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{DeliveryEngine, DigestAggregator, RetryPolicy};
//!
//! let engine = Arc::new(DeliveryEngine::new(provider, RetryPolicy::default()));
//! let aggregator = DigestAggregator::new(store, renderer, engine, preferences_url);
//! let report = aggregator.flush().await?;
//! ```

pub mod delivery;
pub mod digest;
pub mod error;
pub mod intake;
pub mod models;
pub mod providers;
pub mod store;
pub mod streams;
pub mod templates;

// Re-export commonly used types
pub use delivery::{DeliveryEngine, RetryPolicy};
pub use digest::{AddOutcome, DigestAggregator, FlushReport, PendingSummary};
pub use error::{NotificationError, NotificationResult};
pub use intake::{AckPolicy, EventIntake, IntakeHandler, IntakeOutcome};
pub use models::{
    DeliveryOrder, DeliveryReceipt, DigestRecipient, EventEnvelope, InstantPreference,
    NotificationEvent, PendingDigest, StoredNotification, Subscription,
};
pub use providers::{EmailProvider, SendGridProvider, SmtpProvider};
pub use store::{NotificationStore, PgNotificationStore};
pub use streams::{DailyStream, ImmediateStream};
pub use templates::{Renderer, TemplateEngine};
