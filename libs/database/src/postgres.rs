//! Postgres connection pool (SeaORM).

use crate::{DatabaseError, DatabaseResult, RetryConfig, retry_with_backoff};
use core_config::database::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::{info, log::LevelFilter};

pub use sea_orm::DbErr;

/// Build pool options from configuration.
pub fn connect_options(config: &DatabaseConfig) -> ConnectOptions {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);
    opt
}

/// Connect once.
pub async fn connect(config: &DatabaseConfig) -> DatabaseResult<DatabaseConnection> {
    let db = Database::connect(connect_options(config)).await?;
    info!(max_connections = config.max_connections, "Connected to PostgreSQL");
    Ok(db)
}

/// Connect with exponential backoff (defaults to [`RetryConfig::default`]).
pub async fn connect_with_retry(
    config: &DatabaseConfig,
    retry: Option<RetryConfig>,
) -> DatabaseResult<DatabaseConnection> {
    let retry = retry.unwrap_or_default();
    retry_with_backoff("postgres", || connect(config), &retry)
        .await
        .map_err(|(attempts, e)| DatabaseError::ConnectionFailed {
            attempts,
            message: e.to_string(),
        })
}

/// Round-trip a trivial query.
pub async fn ping(db: &DatabaseConnection) -> DatabaseResult<()> {
    db.ping().await?;
    Ok(())
}
