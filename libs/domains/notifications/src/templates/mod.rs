//! Email template rendering engine.
//!
//! Handlebars templates `daily`, `immediate` and `test` are compiled into the
//! binary and registered at startup, together with the date helpers they use.

use crate::error::{NotificationError, NotificationResult};
use chrono::{DateTime, Utc};
use handlebars::{Handlebars, handlebars_helper};
use serde::Serialize;
use tracing::debug;

pub const DAILY_TEMPLATE: &str = "daily";
pub const IMMEDIATE_TEMPLATE: &str = "immediate";
pub const TEST_TEMPLATE: &str = "test";

/// Renders a named template with JSON data. Pure; a missing template is fatal.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, data: &serde_json::Value) -> NotificationResult<String>;
}

// ============================================================================
// Template data
// ============================================================================

/// One notification as shown in an email.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

/// Notifications sharing a subscription label.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestGroup {
    pub subscription_name: String,
    pub notifications: Vec<NotificationView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDigestData {
    /// Groups in first-seen order of their label.
    pub groups: Vec<DigestGroup>,
    pub notification_count: usize,
    pub date: String,
    pub language: Option<String>,
    pub preferences_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateData {
    pub notification: NotificationView,
    pub subscription_name: String,
    pub preferences_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEmailData {
    pub sent_at: DateTime<Utc>,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// `42 minutes ago`, `1 hour ago`, `just now`.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let (value, unit) = match seconds {
        s if s < 60 => return "just now".to_string(),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if value > 1 { "s" } else { "" };
    format!("{} {}{} ago", value, unit, plural)
}

handlebars_helper!(format_date: |date: str| {
    parse_date(date)
        .map(|d| d.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_default()
});

handlebars_helper!(time_ago_helper: |date: str| {
    parse_date(date)
        .map(|d| time_ago(d, Utc::now()))
        .unwrap_or_default()
});

handlebars_helper!(formatted_date: |date: str| {
    parse_date(date)
        .map(|d| d.format("%A, %B %-d, %Y").to_string())
        .unwrap_or_default()
});

// ============================================================================
// Engine
// ============================================================================

/// Template engine for rendering email templates.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        handlebars.register_helper("formatDate", Box::new(format_date));
        handlebars.register_helper("timeAgo", Box::new(time_ago_helper));
        handlebars.register_helper("formattedDate", Box::new(formatted_date));

        for (name, source) in [
            (DAILY_TEMPLATE, DAILY_HTML_TEMPLATE),
            (IMMEDIATE_TEMPLATE, IMMEDIATE_HTML_TEMPLATE),
            (TEST_TEMPLATE, TEST_HTML_TEMPLATE),
        ] {
            handlebars.register_template_string(name, source).map_err(|e| {
                NotificationError::Template(format!("Failed to register {}: {}", name, e))
            })?;
        }

        Ok(Self { handlebars })
    }
}

impl Renderer for TemplateEngine {
    fn render(&self, template: &str, data: &serde_json::Value) -> NotificationResult<String> {
        if !self.handlebars.has_template(template) {
            return Err(NotificationError::Template(format!(
                "Template not found: {}",
                template
            )));
        }
        debug!(template = %template, "Rendering template");
        Ok(self.handlebars.render(template, data)?)
    }
}

/// Serialize typed template data for a [`Renderer`].
pub fn to_template_data<T: Serialize>(data: &T) -> NotificationResult<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|e| NotificationError::Internal(format!("Template data serialization: {}", e)))
}

// ============================================================================
// Email Templates
// ============================================================================

const DAILY_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="{{#if language}}{{language}}{{else}}es{{/if}}">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Daily Notification Summary</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
        <h1 style="color: #18181b; font-size: 24px; font-weight: 600; margin: 0 0 8px 0; text-align: center;">
          Your daily summary
        </h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px; margin: 0 0 32px 0; text-align: center;">
          {{date}} &middot; {{notificationCount}} new notifications
        </p>
        {{#each groups}}
        <h2 style="color: #18181b; font-size: 18px; font-weight: 600; margin: 0 0 12px 0;">
          {{subscriptionName}}
        </h2>
        <table width="100%" cellspacing="0" cellpadding="0" style="margin-bottom: 32px;">
          {{#each notifications}}
          <tr>
            <td style="padding: 12px 0; border-bottom: 1px solid #e4e4e7;">
              {{#if sourceUrl}}
              <a href="{{sourceUrl}}" style="color: #18181b; font-size: 15px; font-weight: 500; text-decoration: none;">{{title}}</a>
              {{else}}
              <span style="color: #18181b; font-size: 15px; font-weight: 500;">{{title}}</span>
              {{/if}}
              <p style="color: #52525b; font-size: 14px; line-height: 20px; margin: 4px 0;">{{content}}</p>
              <p style="color: #a1a1aa; font-size: 12px; margin: 0;">{{timeAgo createdAt}}</p>
            </td>
          </tr>
          {{/each}}
        </table>
        {{/each}}
      </td>
    </tr>
    <tr>
      <td style="padding: 24px 0; text-align: center;">
        <p style="color: #71717a; font-size: 12px; margin: 0;">
          <a href="{{preferencesUrl}}" style="color: #2563eb; text-decoration: none;">Manage notification preferences</a>
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

const IMMEDIATE_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="es">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{notification.title}}</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
        <p style="color: #71717a; font-size: 13px; margin: 0 0 8px 0;">{{subscriptionName}} &middot; {{formatDate notification.createdAt}}</p>
        <h1 style="color: #18181b; font-size: 22px; font-weight: 600; margin: 0 0 16px 0;">
          {{notification.title}}
        </h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px; margin: 0 0 24px 0;">
          {{notification.content}}
        </p>
        {{#if notification.sourceUrl}}
        <a href="{{notification.sourceUrl}}" style="display: inline-block; background-color: #18181b; color: #ffffff; font-size: 15px; font-weight: 500; padding: 12px 28px; text-decoration: none; border-radius: 6px;">
          View source
        </a>
        {{/if}}
      </td>
    </tr>
    <tr>
      <td style="padding: 24px 0; text-align: center;">
        <p style="color: #71717a; font-size: 12px; margin: 0;">
          <a href="{{preferencesUrl}}" style="color: #2563eb; text-decoration: none;">Manage notification preferences</a>
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

const TEST_HTML_TEMPLATE: &str = r#"<h1>Test Email</h1>
<p>This is a test email sent from the Nifya Email Service.</p>
<p>Time sent: {{formattedDate sentAt}} ({{sentAt}})</p>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn view(title: &str, created_at: DateTime<Utc>) -> NotificationView {
        NotificationView {
            title: title.to_string(),
            content: format!("{} body", title),
            source_url: "https://boe.es/doc".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_template_engine_creation() {
        assert!(TemplateEngine::new().is_ok());
    }

    #[test]
    fn test_time_ago() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(time_ago(now - Duration::seconds(30), now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(time_ago(now - Duration::minutes(42), now), "42 minutes ago");
        assert_eq!(time_ago(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(time_ago(now - Duration::days(1), now), "1 day ago");
        assert_eq!(time_ago(now - Duration::days(3), now), "3 days ago");
    }

    #[test]
    fn test_render_daily_groups_in_order() {
        let engine = TemplateEngine::new().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap();
        let data = DailyDigestData {
            groups: vec![
                DigestGroup {
                    subscription_name: "BOE".to_string(),
                    notifications: vec![view("Resolution 42", at)],
                },
                DigestGroup {
                    subscription_name: "DOGA".to_string(),
                    notifications: vec![view("Grant call", at)],
                },
            ],
            notification_count: 2,
            date: "01/03/2026".to_string(),
            language: None,
            preferences_url: "https://app.nifya.com/settings/notifications?userId=1".to_string(),
        };

        let html = engine
            .render(DAILY_TEMPLATE, &to_template_data(&data).unwrap())
            .unwrap();

        let boe = html.find("BOE").unwrap();
        let doga = html.find("DOGA").unwrap();
        assert!(boe < doga);
        assert!(html.contains("Resolution 42"));
        assert!(html.contains("2 new notifications"));
        assert!(html.contains("settings/notifications?userId=1"));
    }

    #[test]
    fn test_render_immediate() {
        let engine = TemplateEngine::new().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap();
        let data = ImmediateData {
            notification: view("Resolution 42", at),
            subscription_name: "BOE".to_string(),
            preferences_url: "https://example.com/prefs".to_string(),
        };

        let html = engine
            .render(IMMEDIATE_TEMPLATE, &to_template_data(&data).unwrap())
            .unwrap();

        assert!(html.contains("Resolution 42"));
        assert!(html.contains("01/03/2026 07:30"));
    }

    #[test]
    fn test_render_test_email() {
        let engine = TemplateEngine::new().unwrap();
        let data = TestEmailData {
            sent_at: Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap(),
        };

        let html = engine
            .render(TEST_TEMPLATE, &to_template_data(&data).unwrap())
            .unwrap();

        assert!(html.contains("Sunday, March 1, 2026"));
    }

    #[test]
    fn test_unknown_template_is_template_error() {
        let engine = TemplateEngine::new().unwrap();
        let err = engine
            .render("weekly", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, NotificationError::Template(_)));
        assert!(!err.is_retryable());
    }
}
