//! SMTP email provider implementation using lettre.
//!
//! Supports plain credentials (Mailpit/MailHog in development, any relay)
//! and Gmail OAuth2, where a fresh access token is requested from the
//! refresh token on every send.

use super::{EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::DeliveryOrder;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::{Credentials, Mechanism},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// SMTP reply codes for rejected authentication. Retried, since an
/// OAuth2 access token can expire between attempts.
const AUTH_REPLY_CODES: [&str; 3] = ["530", "534", "535"];

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Gmail OAuth2 credentials.
#[derive(Clone)]
pub struct GmailOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: String,
}

impl GmailOAuthConfig {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for GmailOAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailOAuthConfig")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

/// SMTP configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Sender email address (also the OAuth2 user).
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
    /// OAuth2 credentials; takes precedence over username/password.
    pub oauth: Option<GmailOAuthConfig>,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("username", &self.username)
            .field("use_tls", &self.use_tls)
            .field("oauth", &self.oauth)
            .finish_non_exhaustive()
    }
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
            oauth: None,
        }
    }

    /// Gmail over implicit TLS with OAuth2.
    pub fn gmail(user: String, from_name: String, oauth: GmailOAuthConfig) -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 465,
            from_email: user,
            from_name,
            username: None,
            password: None,
            use_tls: true,
            oauth: Some(oauth),
        }
    }

    /// Read configuration from the environment.
    ///
    /// When `GMAIL_CLIENT_ID`, `GMAIL_CLIENT_SECRET` and `GMAIL_REFRESH_TOKEN`
    /// are all set, Gmail OAuth2 is used. Otherwise `SMTP_*` variables
    /// describe a plain relay (defaulting to Mailpit on localhost:1025).
    pub fn from_env() -> NotificationResult<Self> {
        let from_name = env_or("SMTP_FROM_NAME", "Nifya");

        if let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            env_opt("GMAIL_CLIENT_ID"),
            env_opt("GMAIL_CLIENT_SECRET"),
            env_opt("GMAIL_REFRESH_TOKEN"),
        ) {
            let user = env_or("GMAIL_USER", "nifyacorp@gmail.com");
            let oauth = GmailOAuthConfig::new(client_id, client_secret, refresh_token);
            return Ok(Self::gmail(user, from_name, oauth));
        }

        let port = env_or("SMTP_PORT", "1025");
        let port = port.parse().map_err(|e| {
            NotificationError::Config(format!("SMTP_PORT '{}' is not a port: {}", port, e))
        })?;

        Ok(Self {
            host: env_or("SMTP_HOST", "localhost"),
            port,
            from_email: env_or("SMTP_FROM_EMAIL", "noreply@localhost"),
            from_name,
            username: env_opt("SMTP_USERNAME"),
            password: env_opt("SMTP_PASSWORD"),
            use_tls: env_opt("SMTP_USE_TLS").is_some_and(|v| v == "true" || v == "1"),
            oauth: None,
        })
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// SMTP email provider.
pub struct SmtpProvider {
    /// Transport for static credentials; rebuilt per send under OAuth2.
    transport: AsyncSmtpTransport<Tokio1Executor>,
    http: reqwest::Client,
    config: SmtpConfig,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };
        let transport = Self::build_transport(&config, credentials, false)?;

        Ok(Self {
            transport,
            http: reqwest::Client::new(),
            config,
        })
    }

    /// Create a provider from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        Self::new(SmtpConfig::from_env()?)
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(
        config: &SmtpConfig,
        credentials: Option<Credentials>,
        xoauth2: bool,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let transport = if config.use_tls {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    NotificationError::Config(format!("Failed to create SMTP relay: {}", e))
                })?
                .port(config.port);

            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            if xoauth2 {
                builder = builder.authentication(vec![Mechanism::Xoauth2]);
            }

            builder.build()
        } else {
            // Non-TLS transport (for local dev servers like Mailpit)
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                    .port(config.port);

            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            if xoauth2 {
                builder = builder.authentication(vec![Mechanism::Xoauth2]);
            }

            builder.build()
        };

        Ok(transport)
    }

    /// Exchange the refresh token for a short-lived access token.
    async fn refresh_access_token(&self, oauth: &GmailOAuthConfig) -> NotificationResult<String> {
        let response = self
            .http
            .post(&oauth.token_url)
            .form(&[
                ("client_id", oauth.client_id.as_str()),
                ("client_secret", oauth.client_secret.as_str()),
                ("refresh_token", oauth.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::TransientDelivery(format!(
                "OAuth2 token refresh failed with status {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!("Obtained OAuth2 access token");
        Ok(token.access_token)
    }

    /// Build a lettre Message from a delivery order.
    fn build_message(&self, order: &DeliveryOrder) -> NotificationResult<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotificationError::Config(format!("Invalid from address: {}", e)))?;

        let to: Mailbox = order.to.parse().map_err(|e| {
            NotificationError::RejectedDelivery(format!("Invalid recipient address: {}", e))
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&order.subject)
            .header(ContentType::TEXT_HTML)
            .body(order.html.clone())
            .map_err(|e| {
                NotificationError::RejectedDelivery(format!("Failed to build email message: {}", e))
            })
    }
}

/// Map an SMTP failure onto the delivery taxonomy.
fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> NotificationError {
    if let Some(code) = err.status() {
        let code = code.to_string();
        if AUTH_REPLY_CODES.contains(&code.as_str()) {
            return NotificationError::TransientDelivery(format!(
                "SMTP authentication rejected ({}): {}",
                code, err
            ));
        }
    }

    if err.is_permanent() || err.is_client() {
        NotificationError::RejectedDelivery(format!("SMTP send failed: {}", err))
    } else {
        NotificationError::TransientDelivery(format!("SMTP send failed: {}", err))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, order: &DeliveryOrder) -> NotificationResult<SentEmail> {
        debug!(
            to = %order.to,
            host = %self.config.host,
            port = %self.config.port,
            oauth = self.config.oauth.is_some(),
            "Sending email via SMTP"
        );

        let message = self.build_message(order)?;

        let result = match &self.config.oauth {
            Some(oauth) => {
                let access_token = self.refresh_access_token(oauth).await?;
                let credentials = Credentials::new(self.config.from_email.clone(), access_token);
                let transport = Self::build_transport(&self.config, Some(credentials), true)?;
                transport.send(message).await
            }
            None => self.transport.send(message).await,
        };

        let response = result.map_err(|e| {
            let classified = classify_smtp_error(&e);
            warn!(
                to = %order.to,
                error_class = classified.class(),
                error = %e,
                "SMTP send failed"
            );
            classified
        })?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(
            to = %order.to,
            message_id = ?message_id,
            "Email sent successfully via SMTP"
        );

        Ok(SentEmail { message_id })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        if self.config.oauth.is_some() {
            // Connecting needs a fresh token; config presence is checked at startup.
            return Ok(true);
        }
        self.transport
            .test_connection()
            .await
            .map_err(|e| NotificationError::TransientDelivery(format!("SMTP health check failed: {}", e)))
    }
}
