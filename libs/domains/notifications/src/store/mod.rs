//! Notification store interface.
//!
//! The relational store of users and notifications, seen through the four
//! queries the dispatch core needs.

mod postgres;

pub use postgres::PgNotificationStore;

use crate::error::NotificationResult;
use crate::models::{DigestRecipient, InstantPreference, StoredNotification};
use async_trait::async_trait;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Users with unread, not-yet-emailed notifications inside the lookback
    /// window who have email notifications enabled.
    async fn list_users_with_unread_notifications(&self) -> NotificationResult<Vec<DigestRecipient>>;

    /// A user's unread, not-yet-emailed notifications, newest first.
    async fn list_unread_notifications(&self, user_id: Uuid) -> NotificationResult<Vec<StoredNotification>>;

    /// Record that these notifications have been emailed. Empty input is a no-op.
    async fn mark_as_sent(&self, ids: &[Uuid]) -> NotificationResult<()>;

    /// Whether the user wants instant emails, and the preferred address.
    /// Unknown users resolve to `should_send: false`.
    async fn instant_delivery_preference(&self, user_id: Uuid) -> NotificationResult<InstantPreference>;
}
