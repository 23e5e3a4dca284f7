//! SendGrid email provider implementation.

use super::{EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::DeliveryOrder;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// SendGrid API configuration.
#[derive(Clone)]
pub struct SendGridConfig {
    /// SendGrid API key.
    pub api_key: String,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SendGrid API base URL (defaults to production).
    pub api_url: String,
}

impl SendGridConfig {
    /// Create a new SendGrid configuration.
    pub fn new(api_key: String, from_email: String, from_name: String) -> Self {
        Self {
            api_key,
            from_email,
            from_name,
            api_url: "https://api.sendgrid.com/v3".to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| NotificationError::Config("SENDGRID_API_KEY not set".to_string()))?;
        let from_email = std::env::var("SENDGRID_FROM_EMAIL")
            .map_err(|_| NotificationError::Config("SENDGRID_FROM_EMAIL not set".to_string()))?;
        let from_name = std::env::var("SENDGRID_FROM_NAME").unwrap_or_else(|_| "Nifya".to_string());

        Ok(Self::new(api_key, from_email, from_name))
    }
}

impl std::fmt::Debug for SendGridConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGridConfig")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

/// SendGrid email provider.
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    /// Create a new SendGrid provider.
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a provider from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        let config = SendGridConfig::from_env()?;
        Ok(Self::new(config))
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

/// Map a non-2xx SendGrid response onto the delivery taxonomy.
///
/// Auth (401/403), timeout (408), throttling (429) and 5xx are retryable;
/// any other 4xx is a permanent rejection.
fn classify_status(status: StatusCode, body: &str) -> NotificationError {
    let detail = serde_json::from_str::<SendGridError>(body)
        .map(|e| {
            e.errors
                .into_iter()
                .map(|d| d.message)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_else(|_| body.to_string());
    let message = format!("SendGrid error ({}): {}", status, detail);

    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        );

    if retryable {
        NotificationError::TransientDelivery(message)
    } else {
        NotificationError::RejectedDelivery(message)
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, order: &DeliveryOrder) -> NotificationResult<SentEmail> {
        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: order.to.clone(),
                    name: None,
                }],
            }],
            from: EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(self.config.from_name.clone()),
            },
            subject: order.subject.clone(),
            content: vec![Content {
                content_type: "text/html".to_string(),
                value: order.html.clone(),
            }],
        };

        debug!(to = %order.to, "Sending email via SendGrid");

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.is_success() {
            info!(
                to = %order.to,
                message_id = ?message_id,
                "Email sent successfully via SendGrid"
            );
            return Ok(SentEmail { message_id });
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, &body);
        warn!(
            to = %order.to,
            status = %status,
            error_class = err.class(),
            "SendGrid rejected the request"
        );
        Err(err)
    }

    fn name(&self) -> &'static str {
        "SendGrid"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        // SendGrid has no health endpoint; validate the key format instead.
        if self.config.api_key.starts_with("SG.") {
            Ok(true)
        } else {
            Err(NotificationError::Config(
                "Invalid SendGrid API key format".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sendgrid_config_new() {
        let config = SendGridConfig::new(
            "SG.test_key".to_string(),
            "test@example.com".to_string(),
            "Test Sender".to_string(),
        );

        assert_eq!(config.from_email, "test@example.com");
        assert_eq!(config.api_url, "https://api.sendgrid.com/v3");
        assert!(!format!("{:?}", config).contains("SG.test_key"));
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_status(status, "").is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_client_errors_are_rejections() {
        let body = r#"{"errors":[{"message":"Does not contain a valid address.","field":"personalizations.0.to.0.email"}]}"#;
        let err = classify_status(StatusCode::BAD_REQUEST, body);

        assert!(matches!(err, NotificationError::RejectedDelivery(_)));
        assert!(err.to_string().contains("Does not contain a valid address."));
    }

    #[tokio::test]
    async fn test_health_check_validates_key_format() {
        let provider = SendGridProvider::new(SendGridConfig::new(
            "not-a-key".to_string(),
            "a@example.com".to_string(),
            "A".to_string(),
        ));
        assert!(provider.health_check().await.is_err());
    }
}
