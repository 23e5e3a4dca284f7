//! Service configuration loaded from the environment.

use core_config::server::ServerConfig;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or};
use domain_notifications::{DailyStream, ImmediateStream, RetryPolicy};
use std::time::Duration;
use stream_worker::StreamDef;

pub const DEFAULT_DIGEST_SCHEDULE: &str = "0 0 7 * * *";
pub const DEFAULT_PREFERENCES_BASE_URL: &str = "https://app.nifya.com/settings/notifications";
pub const DEFAULT_TEST_EMAIL: &str = "test@nifya.com";

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub server: ServerConfig,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub send_attempt_timeout_ms: u64,
    /// Six-field cron expression (seconds first).
    pub digest_schedule: String,
    pub digest_lookback_hours: i32,
    pub preferences_base_url: String,
    pub test_email: String,
    pub immediate_stream: String,
    pub daily_stream: String,
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_attempt_timeout(Duration::from_millis(self.send_attempt_timeout_ms))
    }
}

impl FromEnv for DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let digest_lookback_hours = env_parse_or("DIGEST_LOOKBACK_HOURS", 24)?;
        if digest_lookback_hours <= 0 {
            return Err(ConfigError::ParseError {
                key: "DIGEST_LOOKBACK_HOURS".to_string(),
                details: "must be positive".to_string(),
            });
        }

        Ok(Self {
            server: ServerConfig::from_env()?,
            max_retries: env_parse_or("MAX_RETRIES", 3)?,
            retry_base_delay_ms: env_parse_or("RETRY_BASE_DELAY_MS", 1_000)?,
            retry_max_delay_ms: env_parse_or("RETRY_MAX_DELAY_MS", 30_000)?,
            send_attempt_timeout_ms: env_parse_or("SEND_ATTEMPT_TIMEOUT_MS", 30_000)?,
            digest_schedule: env_or_default("DIGEST_SCHEDULE", DEFAULT_DIGEST_SCHEDULE),
            digest_lookback_hours,
            preferences_base_url: env_or_default(
                "PREFERENCES_BASE_URL",
                DEFAULT_PREFERENCES_BASE_URL,
            ),
            test_email: env_or_default("TEST_EMAIL", DEFAULT_TEST_EMAIL),
            immediate_stream: env_or_default("IMMEDIATE_STREAM", ImmediateStream::STREAM_NAME),
            daily_stream: env_or_default("DAILY_STREAM", DailyStream::STREAM_NAME),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 13] = [
        "HOST",
        "PORT",
        "MAX_RETRIES",
        "RETRY_BASE_DELAY_MS",
        "RETRY_MAX_DELAY_MS",
        "SEND_ATTEMPT_TIMEOUT_MS",
        "DIGEST_SCHEDULE",
        "DIGEST_LOOKBACK_HOURS",
        "PREFERENCES_BASE_URL",
        "TEST_EMAIL",
        "IMMEDIATE_STREAM",
        "DAILY_STREAM",
        "APP_ENV",
    ];

    fn unset_all() -> Vec<(&'static str, Option<&'static str>)> {
        VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(unset_all(), || {
            let config = DispatchConfig::from_env().unwrap();

            assert_eq!(config.server.address(), "0.0.0.0:8080");
            assert_eq!(config.digest_schedule, "0 0 7 * * *");
            assert_eq!(config.digest_lookback_hours, 24);
            assert_eq!(config.test_email, "test@nifya.com");
            assert_eq!(config.immediate_stream, "email-notifications:immediate");
            assert_eq!(config.daily_stream, "email-notifications:daily");

            let policy = config.retry_policy();
            assert_eq!(policy.max_retries, 3);
            assert_eq!(policy.base_delay, Duration::from_secs(1));
            assert_eq!(policy.max_delay, Duration::from_secs(30));
            assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
        });
    }

    #[test]
    fn test_overrides() {
        let mut vars = unset_all();
        vars.extend([
            ("MAX_RETRIES", Some("5")),
            ("RETRY_BASE_DELAY_MS", Some("10")),
            ("DIGEST_SCHEDULE", Some("0 30 6 * * *")),
            ("DAILY_STREAM", Some("digest:test")),
        ]);

        temp_env::with_vars(vars, || {
            let config = DispatchConfig::from_env().unwrap();

            assert_eq!(config.max_retries, 5);
            assert_eq!(config.retry_policy().base_delay, Duration::from_millis(10));
            assert_eq!(config.digest_schedule, "0 30 6 * * *");
            assert_eq!(config.daily_stream, "digest:test");
        });
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut vars = unset_all();
        vars.push(("MAX_RETRIES", Some("lots")));
        temp_env::with_vars(vars, || {
            let err = DispatchConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("MAX_RETRIES"));
        });

        let mut vars = unset_all();
        vars.push(("DIGEST_LOOKBACK_HOURS", Some("0")));
        temp_env::with_vars(vars, || {
            let err = DispatchConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("DIGEST_LOOKBACK_HOURS"));
        });
    }
}
