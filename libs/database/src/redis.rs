//! Redis `ConnectionManager` for the event bus.

use crate::{DatabaseError, DatabaseResult, RetryConfig, retry_with_backoff};
use core_config::redis::RedisConfig;
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

pub use redis::aio::ConnectionManager as RedisConnection;

/// Connect once and verify the connection with PING.
///
/// The returned manager reconnects on its own after transient failures.
pub async fn connect(config: &RedisConfig) -> DatabaseResult<ConnectionManager> {
    let client = Client::open(config.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Connected to Redis");
    Ok(manager)
}

/// Connect with exponential backoff (defaults to [`RetryConfig::default`]).
pub async fn connect_with_retry(
    config: &RedisConfig,
    retry: Option<RetryConfig>,
) -> DatabaseResult<ConnectionManager> {
    let retry = retry.unwrap_or_default();
    retry_with_backoff("redis", || connect(config), &retry)
        .await
        .map_err(|(attempts, e)| DatabaseError::ConnectionFailed {
            attempts,
            message: e.to_string(),
        })
}
