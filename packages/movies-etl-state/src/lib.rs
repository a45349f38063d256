//! movies-etl-state - persisted progress for the index synchronizer
//!
//! ## Core Principles
//!
//! 1. **Opaque values**: the store only moves strings; parsing `queue_index`
//!    and `last_modified` is the synchronizer's job
//! 2. **Last write wins**: no transactions, a single writer is assumed
//! 3. **Fallible I/O**: every call may fail transiently; callers decide how
//!    to retry (`StorageError::is_transient`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use movies_etl_state::{RedisStateStore, StateStore};
//!
//! let store = RedisStateStore::connect("redis://127.0.0.1:6379/0").await?;
//! let index = store.get_or("queue_index", "0").await?;
//! store.set("queue_index", "1").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{StateStore, LAST_MODIFIED_KEY, QUEUE_INDEX_KEY};
pub use infrastructure::InMemoryStateStore;

#[cfg(feature = "redis")]
pub use infrastructure::RedisStateStore;
