//! Data models for the notifications domain.

use crate::error::{NotificationError, NotificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Events
// ============================================================================

/// "A user has new content to be told about."
///
/// Immutable once decoded. `recipient_email` is resolved later when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub source_url: String,
    pub subscription_label: String,
    pub occurred_at: DateTime<Utc>,
    pub recipient_email: Option<String>,
}

/// Which subscription an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    Immediate,
    Daily,
}

impl Subscription {
    pub fn as_str(self) -> &'static str {
        match self {
            Subscription::Immediate => "immediate",
            Subscription::Daily => "daily",
        }
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Bus payload: `{userId, email?, notification}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub notification: WireNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNotification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source_url: String,
    pub subscription_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    /// Decode a raw bus payload. `received_at` stands in for a missing `createdAt`.
    pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> NotificationResult<NotificationEvent> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| NotificationError::Decode(e.to_string()))?;
        Ok(envelope.into_event(received_at))
    }

    fn into_event(self, received_at: DateTime<Utc>) -> NotificationEvent {
        let n = self.notification;
        NotificationEvent {
            id: n.id,
            user_id: self.user_id,
            title: n.title,
            body: n.content,
            source_url: n.source_url,
            subscription_label: n.subscription_name,
            occurred_at: n.created_at.unwrap_or(received_at),
            recipient_email: self.email.filter(|e| !e.trim().is_empty()),
        }
    }
}

impl From<&NotificationEvent> for EventEnvelope {
    fn from(event: &NotificationEvent) -> Self {
        Self {
            user_id: event.user_id,
            email: event.recipient_email.clone(),
            notification: WireNotification {
                id: event.id,
                title: event.title.clone(),
                content: event.body.clone(),
                source_url: event.source_url.clone(),
                subscription_name: event.subscription_label.clone(),
                created_at: Some(event.occurred_at),
            },
        }
    }
}

// ============================================================================
// Digest state
// ============================================================================

/// Per-user accumulator owned by the digest aggregator.
#[derive(Debug, Clone)]
pub struct PendingDigest {
    pub user_id: Uuid,
    pub recipient_email: Option<String>,
    pub notifications: Vec<NotificationEvent>,
    pub first_added_at: DateTime<Utc>,
}

impl PendingDigest {
    pub fn new(user_id: Uuid, recipient_email: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            recipient_email,
            notifications: Vec::new(),
            first_added_at: now,
        }
    }

    /// Append `event` unless a notification with the same id is already
    /// pending. Returns whether it was appended.
    pub fn push(&mut self, event: NotificationEvent) -> bool {
        if self.contains(event.id) {
            return false;
        }
        if self.recipient_email.is_none() {
            self.recipient_email = event.recipient_email.clone();
        }
        self.notifications.push(event);
        true
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.notifications.iter().any(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// A fully rendered message ready for transport.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryOrder {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl DeliveryOrder {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
        }
    }
}

// Bodies stay out of logs.
impl std::fmt::Debug for DeliveryOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryOrder")
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("html_len", &self.html.len())
            .finish()
    }
}

/// Result of a successful `DeliveryEngine::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub message_id: Option<String>,
}

// ============================================================================
// Store records
// ============================================================================

/// A user with unread, not-yet-emailed notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestRecipient {
    pub id: Uuid,
    pub email: String,
    pub notification_email: Option<String>,
    pub language: Option<String>,
}

impl DigestRecipient {
    /// Preferred address: the notification email when set, else the account email.
    pub fn address(&self) -> &str {
        self.notification_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// An unread notification as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNotification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub subscription_label: String,
    pub created_at: DateTime<Utc>,
}

impl StoredNotification {
    pub fn into_event(self, user_id: Uuid) -> NotificationEvent {
        NotificationEvent {
            id: self.id,
            user_id,
            title: self.title,
            body: self.content,
            source_url: self.source_url,
            subscription_label: self.subscription_label,
            occurred_at: self.created_at,
            recipient_email: None,
        }
    }
}

/// Whether a user wants instant emails, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstantPreference {
    pub should_send: bool,
    pub email: Option<String>,
}
