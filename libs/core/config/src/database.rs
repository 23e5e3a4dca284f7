use crate::{env_or_default, env_required, ConfigError, FromEnv};

/// Postgres configuration for the notification store
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }
}

impl FromEnv for DatabaseConfig {
    /// Requires DATABASE_URL; DATABASE_MAX_CONNECTIONS defaults to 10
    fn from_env() -> Result<Self, ConfigError> {
        let max_connections = env_or_default("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "DATABASE_MAX_CONNECTIONS".to_string(),
                details: format!("{}", e),
            })?;

        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_from_env_success() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/notifications")),
                ("DATABASE_MAX_CONNECTIONS", None),
            ],
            || {
                let config = DatabaseConfig::from_env().unwrap();
                assert_eq!(config.url, "postgres://localhost/notifications");
                assert_eq!(config.max_connections, 10);
            },
        );
    }

    #[test]
    fn test_database_config_from_env_missing() {
        temp_env::with_var_unset("DATABASE_URL", || {
            let err = DatabaseConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("DATABASE_URL"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_database_config_invalid_pool_size() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/notifications")),
                ("DATABASE_MAX_CONNECTIONS", Some("lots")),
            ],
            || {
                let err = DatabaseConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("DATABASE_MAX_CONNECTIONS"));
            },
        );
    }
}
