//! Connection helpers shared by the notifier services.
//!
//! - [`postgres`]: SeaORM connection pool for the notification store
//! - [`redis`]: `ConnectionManager` for the Redis Streams event bus
//!
//! Both connect with exponential backoff so a service that boots before its
//! backing stores are reachable keeps trying instead of crash-looping.
//!
//! ```ignore
//! use core_config::FromEnv;
//! use core_config::database::DatabaseConfig;
//!
//! let db = database::postgres::connect_with_retry(&DatabaseConfig::from_env()?, None).await?;
//! ```

mod error;
pub mod postgres;
pub mod redis;
mod retry;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{RetryConfig, retry_with_backoff};
