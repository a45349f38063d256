use movies_etl_state::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("State store error: {0}")]
    State(#[from] StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search index error (status {status:?}): {message}")]
    Index { status: Option<u16>, message: String },

    #[error("Bulk upsert rejected {failed} of {total} documents, first failure: {first_reason}")]
    PartialWrite {
        failed: usize,
        total: usize,
        first_reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown table: {0}")]
    InvalidTable(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<SyncError>,
    },
}

impl SyncError {
    pub fn index<E: std::fmt::Display>(status: Option<u16>, e: E) -> Self {
        Self::Index {
            status,
            message: e.to_string(),
        }
    }

    /// Classify for retry logic
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Database(e) => classify_sqlx(e),
            SyncError::State(e) if e.is_transient() => ErrorCategory::Transient,
            SyncError::State(_) => ErrorCategory::Permanent,
            SyncError::Http(e) if e.is_builder() || e.is_decode() => ErrorCategory::Permanent,
            SyncError::Http(_) => ErrorCategory::Transient,
            SyncError::Index { status, .. } => match status {
                None => ErrorCategory::Transient,
                Some(code) if *code == 429 || *code >= 500 => ErrorCategory::Transient,
                Some(_) => ErrorCategory::Permanent,
            },
            SyncError::PartialWrite { .. } => ErrorCategory::Transient,
            SyncError::Serialization(_)
            | SyncError::Config(_)
            | SyncError::InvalidTable(_)
            | SyncError::RetriesExhausted { .. } => ErrorCategory::Permanent,
        }
    }
}

fn classify_sqlx(e: &sqlx::Error) -> ErrorCategory {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorCategory::Transient,
        sqlx::Error::Database(db) => {
            // SQLSTATE classes: 08 connection, 40 rollback, 53 resources, 57 operator intervention
            let code = db.code();
            match code.as_deref().map(|c| c.get(..2).unwrap_or(c)) {
                Some("08") | Some("40") | Some("53") | Some("57") => ErrorCategory::Transient,
                _ => ErrorCategory::Permanent,
            }
        }
        _ => ErrorCategory::Permanent,
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., bad SQL, invalid config)
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            _ => Err(SyncError::Config(ConfigError::invalid(
                "retry.retry_on",
                format!("Invalid error category: {}", s),
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
