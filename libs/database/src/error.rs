/// Errors raised while establishing connections.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sea_orm::DbErr),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection failed after all retries
    #[error("Connection failed after {attempts} attempts: {message}")]
    ConnectionFailed { attempts: u32, message: String },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
