//! PostgreSQL implementation of [`NotificationStore`] using SeaORM raw statements.

use super::NotificationStore;
use crate::error::NotificationResult;
use crate::models::{DigestRecipient, InstantPreference, StoredNotification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseBackend, DatabaseConnection, FromQueryResult, Statement, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

const USERS_WITH_UNREAD_SQL: &str = r#"
SELECT DISTINCT
    u.id,
    u.email,
    u.notification_settings->>'notificationEmail' AS notification_email,
    u.preferences->>'language' AS language
FROM users u
JOIN notifications n ON n.user_id = u.id
WHERE n.created_at > NOW() - make_interval(hours => $1)
  AND NOT n.read
  AND NOT COALESCE(n.email_sent, false)
  AND COALESCE((u.notification_settings->>'emailNotifications')::boolean, false)
"#;

const UNREAD_NOTIFICATIONS_SQL: &str = r#"
SELECT
    n.id,
    n.title,
    COALESCE(n.content, '') AS content,
    COALESCE(n.source_url, '') AS source_url,
    s.name AS subscription_name,
    n.created_at::timestamptz AS created_at
FROM notifications n
JOIN subscriptions s ON s.id = n.subscription_id
WHERE n.user_id = $1
  AND n.created_at > NOW() - make_interval(hours => $2)
  AND NOT n.read
  AND NOT COALESCE(n.email_sent, false)
ORDER BY n.created_at DESC
"#;

const INSTANT_PREFERENCE_SQL: &str = r#"
SELECT
    u.email,
    u.notification_settings->>'notificationEmail' AS notification_email,
    COALESCE((u.notification_settings->>'emailNotifications')::boolean, false)
      AND COALESCE((u.notification_settings->>'instantNotifications')::boolean, false) AS instant
FROM users u
WHERE u.id = $1
"#;

#[derive(Debug, FromQueryResult)]
struct RecipientRow {
    id: Uuid,
    email: String,
    notification_email: Option<String>,
    language: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct NotificationRow {
    id: Uuid,
    title: String,
    content: String,
    source_url: String,
    subscription_name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromQueryResult)]
struct PreferenceRow {
    email: String,
    notification_email: Option<String>,
    instant: bool,
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    #[allow(dead_code)]
    id: Uuid,
}

/// Store backed by the application's Postgres database.
#[derive(Clone)]
pub struct PgNotificationStore {
    db: DatabaseConnection,
    lookback_hours: i32,
}

impl PgNotificationStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            lookback_hours: 24,
        }
    }

    /// Window, in hours, in which unread notifications are considered.
    pub fn with_lookback_hours(mut self, hours: i32) -> Self {
        self.lookback_hours = hours.max(1);
        self
    }

    fn statement(sql: &str, values: impl IntoIterator<Item = Value>) -> Statement {
        Statement::from_sql_and_values(DatabaseBackend::Postgres, sql, values)
    }
}

fn mark_sent_sql(count: usize) -> String {
    let placeholders = (1..=count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE notifications SET email_sent = true, email_sent_at = NOW() WHERE id IN ({}) RETURNING id",
        placeholders
    )
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self))]
    async fn list_users_with_unread_notifications(&self) -> NotificationResult<Vec<DigestRecipient>> {
        let rows = RecipientRow::find_by_statement(Self::statement(
            USERS_WITH_UNREAD_SQL,
            [Value::from(self.lookback_hours)],
        ))
        .all(&self.db)
        .await?;

        debug!(count = rows.len(), "Users with unread notifications");

        Ok(rows
            .into_iter()
            .map(|r| DigestRecipient {
                id: r.id,
                email: r.email,
                notification_email: r.notification_email,
                language: r.language,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_unread_notifications(&self, user_id: Uuid) -> NotificationResult<Vec<StoredNotification>> {
        let rows = NotificationRow::find_by_statement(Self::statement(
            UNREAD_NOTIFICATIONS_SQL,
            [Value::from(user_id), Value::from(self.lookback_hours)],
        ))
        .all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredNotification {
                id: r.id,
                title: r.title,
                content: r.content,
                source_url: r.source_url,
                subscription_label: r.subscription_name,
                created_at: r.created_at,
            })
            .collect())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn mark_as_sent(&self, ids: &[Uuid]) -> NotificationResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let updated = IdRow::find_by_statement(Self::statement(
            &mark_sent_sql(ids.len()),
            ids.iter().map(|id| Value::from(*id)),
        ))
        .all(&self.db)
        .await?;

        debug!(requested = ids.len(), updated = updated.len(), "Marked notifications as sent");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn instant_delivery_preference(&self, user_id: Uuid) -> NotificationResult<InstantPreference> {
        let row = PreferenceRow::find_by_statement(Self::statement(
            INSTANT_PREFERENCE_SQL,
            [Value::from(user_id)],
        ))
        .one(&self.db)
        .await?;

        Ok(match row {
            Some(row) => {
                let email = row
                    .notification_email
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or(row.email);
                InstantPreference {
                    should_send: row.instant,
                    email: Some(email),
                }
            }
            None => InstantPreference::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::collections::BTreeMap;

    #[test]
    fn test_mark_sent_sql_placeholders() {
        assert_eq!(
            mark_sent_sql(3),
            "UPDATE notifications SET email_sent = true, email_sent_at = NOW() WHERE id IN ($1, $2, $3) RETURNING id"
        );
    }

    #[tokio::test]
    async fn test_list_users_maps_rows() {
        let id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([
                ("id", Value::from(id)),
                ("email", Value::from("ana@example.com".to_string())),
                ("notification_email", Value::from(Some("alerts@example.com".to_string()))),
                ("language", Value::from(None::<String>)),
            ])]])
            .into_connection();

        let users = PgNotificationStore::new(db)
            .list_users_with_unread_notifications()
            .await
            .unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, id);
        assert_eq!(users[0].address(), "alerts@example.com");
        assert_eq!(users[0].language, None);
    }

    #[tokio::test]
    async fn test_list_unread_maps_label() {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([
                ("id", Value::from(Uuid::new_v4())),
                ("title", Value::from("Resolution 42".to_string())),
                ("content", Value::from("Body".to_string())),
                ("source_url", Value::from(String::new())),
                ("subscription_name", Value::from("BOE".to_string())),
                ("created_at", Value::from(created_at)),
            ])]])
            .into_connection();

        let rows = PgNotificationStore::new(db)
            .list_unread_notifications(Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(rows[0].subscription_label, "BOE");
        assert_eq!(rows[0].created_at, created_at);
    }

    #[tokio::test]
    async fn test_mark_as_sent_empty_is_noop() {
        // No query results queued: any query would fail.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        PgNotificationStore::new(db).mark_as_sent(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_instant_preference() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();

        let pref = PgNotificationStore::new(db)
            .instant_delivery_preference(Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(pref, InstantPreference { should_send: false, email: None });
    }

    #[tokio::test]
    async fn test_instant_preference_falls_back_to_account_email() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([
                ("email", Value::from("ana@example.com".to_string())),
                ("notification_email", Value::from(None::<String>)),
                ("instant", Value::from(true)),
            ])]])
            .into_connection();

        let pref = PgNotificationStore::new(db)
            .instant_delivery_preference(Uuid::new_v4())
            .await
            .unwrap();

        assert!(pref.should_send);
        assert_eq!(pref.email.as_deref(), Some("ana@example.com"));
    }
}
