//! Daily digest aggregation.
//!
//! Events from the daily subscription accumulate per user in memory. A flush
//! merges them with the store's unread notifications, sends one grouped
//! digest per user and marks the stored notifications as sent.

use crate::delivery::DeliveryEngine;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{DeliveryOrder, DigestRecipient, NotificationEvent, PendingDigest};
use crate::store::NotificationStore;
use crate::templates::{
    DAILY_TEMPLATE, DailyDigestData, DigestGroup, NotificationView, Renderer, to_template_data,
};
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Result of `DigestAggregator::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended; `pending` is the user's pending count afterwards.
    Queued { pending: usize },
    /// A notification with the same id is already pending.
    Duplicate,
}

/// Summary of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Users whose digest was delivered.
    pub users_processed: usize,
    /// Users whose digest failed; the failure was logged.
    pub users_failed: usize,
    /// Notifications included in delivered digests.
    pub notifications_sent: usize,
}

/// Pending state, for the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub users: usize,
    pub notifications: usize,
}

/// A notification included in a digest, with whether the store knows it.
struct DigestEntry {
    event: NotificationEvent,
    durable: bool,
}

enum UserFlush {
    Nothing,
    Delivered { notifications: usize },
}

pub struct DigestAggregator {
    store: Arc<dyn NotificationStore>,
    renderer: Arc<dyn Renderer>,
    engine: Arc<DeliveryEngine>,
    preferences_base_url: String,
    pending: Mutex<HashMap<Uuid, PendingDigest>>,
    /// Serializes flushes so two overlapping runs cannot double-send.
    flush_lock: Mutex<()>,
}

impl DigestAggregator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        renderer: Arc<dyn Renderer>,
        engine: Arc<DeliveryEngine>,
        preferences_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            renderer,
            engine,
            preferences_base_url: preferences_base_url.into(),
            pending: Mutex::new(HashMap::new()),
            flush_lock: Mutex::new(()),
        }
    }

    /// Queue `notification` in the user's pending digest, creating it if absent.
    pub async fn add(
        &self,
        user_id: Uuid,
        recipient_email: Option<String>,
        notification: NotificationEvent,
    ) -> AddOutcome {
        let notification_id = notification.id;
        let mut pending = self.pending.lock().await;
        let digest = pending
            .entry(user_id)
            .or_insert_with(|| PendingDigest::new(user_id, None, Utc::now()));

        if recipient_email.is_some() && digest.recipient_email.is_none() {
            digest.recipient_email = recipient_email;
        }

        if !digest.push(notification) {
            debug!(user_id = %user_id, notification_id = %notification_id, "Notification already pending");
            return AddOutcome::Duplicate;
        }

        let count = digest.len();
        info!(
            user_id = %user_id,
            notification_count = count,
            "Added notification to daily digest"
        );
        AddOutcome::Queued { pending: count }
    }

    pub async fn pending_summary(&self) -> PendingSummary {
        let pending = self.pending.lock().await;
        PendingSummary {
            users: pending.len(),
            notifications: pending.values().map(PendingDigest::len).sum(),
        }
    }

    /// Send one digest per user with pending or stored unread notifications.
    ///
    /// Per-user failures are logged and counted; only the initial store query
    /// propagates. Overlapping calls wait for each other.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> NotificationResult<FlushReport> {
        let _flush = self.flush_lock.lock().await;

        let recipients = self.store.list_users_with_unread_notifications().await?;
        let snapshot: HashMap<Uuid, PendingDigest> = self.pending.lock().await.clone();

        info!(
            store_users = recipients.len(),
            memory_users = snapshot.len(),
            "Starting daily digest flush"
        );

        // Store users in store order, then memory-only users oldest first.
        let mut seen = HashSet::new();
        let mut plan: Vec<(Uuid, Option<&DigestRecipient>)> = Vec::new();
        for recipient in &recipients {
            if seen.insert(recipient.id) {
                plan.push((recipient.id, Some(recipient)));
            }
        }
        let mut memory_only: Vec<&PendingDigest> = snapshot
            .values()
            .filter(|d| !seen.contains(&d.user_id))
            .collect();
        memory_only.sort_by_key(|d| d.first_added_at);
        plan.extend(memory_only.into_iter().map(|d| (d.user_id, None)));

        let mut report = FlushReport::default();
        for (user_id, recipient) in plan {
            match self
                .flush_user(user_id, recipient, snapshot.get(&user_id))
                .await
            {
                Ok(UserFlush::Nothing) => {}
                Ok(UserFlush::Delivered { notifications }) => {
                    report.users_processed += 1;
                    report.notifications_sent += notifications;
                }
                Err(err) => {
                    report.users_failed += 1;
                    error!(
                        user_id = %user_id,
                        error_class = err.class(),
                        error = %err,
                        "Failed to deliver daily digest"
                    );
                }
            }
        }

        counter!("digest_users_total", "result" => "processed")
            .increment(report.users_processed as u64);
        counter!("digest_users_total", "result" => "failed").increment(report.users_failed as u64);

        info!(
            users_processed = report.users_processed,
            users_failed = report.users_failed,
            notifications_sent = report.notifications_sent,
            "Completed daily digest flush"
        );

        Ok(report)
    }

    async fn flush_user(
        &self,
        user_id: Uuid,
        recipient: Option<&DigestRecipient>,
        memory: Option<&PendingDigest>,
    ) -> NotificationResult<UserFlush> {
        let stored = match recipient {
            Some(_) => self.store.list_unread_notifications(user_id).await?,
            None => Vec::new(),
        };

        // Union, memory first; ids the store knows are durable.
        let stored_ids: HashSet<Uuid> = stored.iter().map(|n| n.id).collect();
        let mut included = HashSet::new();
        let mut entries: Vec<DigestEntry> = Vec::new();
        for event in memory.map(|d| d.notifications.as_slice()).unwrap_or_default() {
            if included.insert(event.id) {
                entries.push(DigestEntry {
                    event: event.clone(),
                    durable: stored_ids.contains(&event.id),
                });
            }
        }
        for notification in stored {
            if included.insert(notification.id) {
                entries.push(DigestEntry {
                    event: notification.into_event(user_id),
                    durable: true,
                });
            }
        }

        if entries.is_empty() {
            return Ok(UserFlush::Nothing);
        }

        let to = self.resolve_address(user_id, recipient, memory).await?;
        let now = Utc::now();
        let date = now.format("%d/%m/%Y").to_string();
        let data = DailyDigestData {
            groups: group_by_label(&entries),
            notification_count: entries.len(),
            date: date.clone(),
            language: recipient.and_then(|r| r.language.clone()),
            preferences_url: format!("{}?userId={}", self.preferences_base_url, user_id),
        };

        let html = self
            .renderer
            .render(DAILY_TEMPLATE, &to_template_data(&data)?)?;
        let order = DeliveryOrder::new(to, format!("Daily Notification Summary - {}", date), html);

        self.engine.send(&order).await?;

        let durable_ids: Vec<Uuid> = entries
            .iter()
            .filter(|e| e.durable)
            .map(|e| e.event.id)
            .collect();
        let marked = self.store.mark_as_sent(&durable_ids).await;

        // Delivered, so the memory entries go regardless of the mark result.
        if let Some(memory) = memory {
            let delivered: HashSet<Uuid> = memory.notifications.iter().map(|n| n.id).collect();
            self.clear_delivered(user_id, &delivered).await;
        }
        marked?;

        info!(
            user_id = %user_id,
            notification_count = entries.len(),
            marked_sent = durable_ids.len(),
            "Daily digest delivered"
        );

        Ok(UserFlush::Delivered {
            notifications: entries.len(),
        })
    }

    async fn resolve_address(
        &self,
        user_id: Uuid,
        recipient: Option<&DigestRecipient>,
        memory: Option<&PendingDigest>,
    ) -> NotificationResult<String> {
        if let Some(email) = memory.and_then(|d| d.recipient_email.clone()) {
            return Ok(email);
        }
        if let Some(recipient) = recipient {
            return Ok(recipient.address().to_string());
        }

        warn!(user_id = %user_id, "No recipient address pending, resolving from store");
        self.store
            .instant_delivery_preference(user_id)
            .await?
            .email
            .ok_or_else(|| {
                NotificationError::Internal(format!("no email address known for user {}", user_id))
            })
    }

    /// Remove delivered notifications; entries added during the flush stay.
    async fn clear_delivered(&self, user_id: Uuid, delivered: &HashSet<Uuid>) {
        let mut pending = self.pending.lock().await;
        if let Some(digest) = pending.get_mut(&user_id) {
            digest.notifications.retain(|n| !delivered.contains(&n.id));
            if digest.is_empty() {
                pending.remove(&user_id);
            }
        }
    }
}

/// Group entries by subscription label, groups in first-seen order.
fn group_by_label(entries: &[DigestEntry]) -> Vec<DigestGroup> {
    let mut groups: Vec<DigestGroup> = Vec::new();
    for entry in entries {
        let event = &entry.event;
        let view = NotificationView {
            title: event.title.clone(),
            content: event.body.clone(),
            source_url: event.source_url.clone(),
            created_at: event.occurred_at,
        };
        match groups
            .iter_mut()
            .find(|g| g.subscription_name == event.subscription_label)
        {
            Some(group) => group.notifications.push(view),
            None => groups.push(DigestGroup {
                subscription_name: event.subscription_label.clone(),
                notifications: vec![view],
            }),
        }
    }
    groups
}
