//! Domain layer for the sync state store
//!
//! The synchronizer persists two small pieces of progress between runs:
//! which entity table it is scanning and how far along that table's
//! `modified` timeline it got. Both are opaque strings here; callers own
//! the typed interpretation.
//!
//! # Port Trait
//!
//! - `StateStore`: key → string value, last write wins
//!
//! # Examples
//!
//! ```rust,ignore
//! use movies_etl_state::{InMemoryStateStore, StateStore};
//!
//! let store = InMemoryStateStore::new();
//! assert_eq!(store.get("queue_index").await?, None);
//!
//! store.set("queue_index", "1").await?;
//! assert_eq!(store.get_or("queue_index", "0").await?, "1");
//! ```

use async_trait::async_trait;

use crate::Result;

/// Key under which the round-robin table position is stored
pub const QUEUE_INDEX_KEY: &str = "queue_index";

/// Key under which the shared `modified` watermark is stored
pub const LAST_MODIFIED_KEY: &str = "last_modified";

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: StateStore
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted key → string value store
///
/// No transactional guarantee: `set` is last-write-wins and a single
/// synchronizer process is assumed to be the only writer.
///
/// # Implementations
///
/// - `InMemoryStateStore`: process-local map (tests, dry runs)
/// - `RedisStateStore`: Redis `GET`/`SET` through a pooled connection
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value, `None` when the key was never written
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value, falling back to `default` when the key is absent
    async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }
}
