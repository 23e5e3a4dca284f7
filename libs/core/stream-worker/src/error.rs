//! Event-bus error types.

use thiserror::Error;

/// Errors raised by subscriptions and producers
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error while publishing
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reply from the bus did not have the expected shape
    #[error("Unexpected reply: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Consumer group is missing (stream deleted or never created)
    pub fn is_nogroup_error(&self) -> bool {
        matches!(self, StreamError::Redis(e) if e.to_string().contains("NOGROUP"))
    }

    /// Connection-level failure worth backing off for
    pub fn is_connection_error(&self) -> bool {
        match self {
            StreamError::Redis(e) => {
                if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
                    return true;
                }
                let lower = e.to_string().to_lowercase();
                lower.contains("broken pipe")
                    || lower.contains("reset by peer")
                    || lower.contains("connection")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_redis_errors_are_not_connection_errors() {
        let err = StreamError::Protocol("bad reply".to_string());
        assert!(!err.is_connection_error());
        assert!(!err.is_nogroup_error());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StreamError = json_err.into();
        assert!(matches!(err, StreamError::Serialization(_)));
    }
}
