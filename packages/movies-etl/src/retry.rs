//! Bounded retry with exponential backoff
//!
//! Every call that leaves the process (state store, relational source,
//! search index) goes through [`RetryPolicy::run`]. Errors whose
//! [`ErrorCategory`] is not listed in `retry_on` are returned immediately;
//! the rest are retried until `max_attempts` is reached, after which
//! [`SyncError::RetriesExhausted`] is returned and the tick fails.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::error::{ErrorCategory, Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    #[serde(alias = "factor")]
    pub backoff_factor: f64,
    pub max_backoff_ms: u64,
    pub retry_on: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 100,
            backoff_factor: 2.0,
            max_backoff_ms: 10_000,
            retry_on: vec![ErrorCategory::Transient],
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_factor",
                format!("must be a finite number >= 1.0, got {}", self.backoff_factor),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.max_backoff_ms",
                "must not be smaller than initial_backoff_ms",
            ));
        }
        Ok(())
    }

    pub fn should_retry(&self, err: &SyncError) -> bool {
        self.retry_on.contains(&err.category())
    }

    /// Sleep before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<SyncError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e.into(),
            };

            if !self.should_retry(&err) {
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    "{} failed after {} attempts, giving up: {}",
                    operation, attempt, err
                );
                return Err(SyncError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "{} failed (attempt {}/{}), retrying in {:?}: {}",
                operation, attempt, max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_factor: 2.0,
            max_backoff_ms: 4,
            retry_on: vec![ErrorCategory::Transient],
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            backoff_factor: 2.0,
            max_backoff_ms: 1000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(100), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { backoff_factor: 0.5, ..RetryPolicy::default() }.validate().is_err());
    }

    #[test]
    fn test_yaml_accepts_factor_alias() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_attempts: 3\nfactor: 1.5\n").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_factor, 1.5);
        assert_eq!(policy.retry_on, vec![ErrorCategory::Transient]);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(SyncError::index(Some(503), "unavailable"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(5)
            .run("bad request", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::index(Some(400), "mapper_parsing_exception"))
            })
            .await;

        assert!(matches!(result, Err(SyncError::Index { status: Some(400), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(3)
            .run("bulk upsert", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::index(None, "connection reset"))
            })
            .await;

        match result {
            Err(SyncError::RetriesExhausted { operation, attempts, last }) => {
                assert_eq!(operation, "bulk upsert");
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SyncError::Index { status: None, .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_permanent_only() {
        let policy = RetryPolicy {
            retry_on: vec![ErrorCategory::Permanent],
            ..fast(4)
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("transient skipped", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::index(Some(503), "unavailable"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accepts_foreign_error_types() {
        let calls = AtomicU32::new(0);
        let result = fast(2)
            .run("state read", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(movies_etl_state::StorageError::connection("refused"))
                } else {
                    Ok("value")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "value");
    }
}
