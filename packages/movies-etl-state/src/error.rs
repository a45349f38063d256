//! Error types for movies-etl-state

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Could not reach the backend (refused, reset, pool timeout)
    Connection,
    /// Backend answered with an error
    Backend,
    /// Stored value could not be encoded/decoded
    Serialization,
    /// Invalid store configuration (bad URL, etc.)
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Backend => "backend",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Whether a retry of the same call can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Connection | ErrorKind::Backend)
    }
}

#[cfg(feature = "redis")]
impl From<bb8_redis::redis::RedisError> for StorageError {
    fn from(err: bb8_redis::redis::RedisError) -> Self {
        use bb8_redis::redis::ErrorKind as RedisKind;

        let kind = if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
            || err.is_io_error()
        {
            ErrorKind::Connection
        } else {
            match err.kind() {
                RedisKind::TypeError => ErrorKind::Serialization,
                RedisKind::InvalidClientConfig => ErrorKind::Config,
                _ => ErrorKind::Backend,
            }
        };

        StorageError::new(kind, format!("Redis error: {}", err)).with_source(err)
    }
}

#[cfg(feature = "redis")]
impl From<bb8_redis::bb8::RunError<bb8_redis::redis::RedisError>> for StorageError {
    fn from(err: bb8_redis::bb8::RunError<bb8_redis::redis::RedisError>) -> Self {
        match err {
            bb8_redis::bb8::RunError::User(inner) => inner.into(),
            bb8_redis::bb8::RunError::TimedOut => {
                StorageError::connection("Timed out waiting for a Redis connection")
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
