//! In-memory StateStore
//!
//! Process-local, lost on exit. Supports failure injection so callers can
//! exercise their retry paths without a real backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::StateStore;
use crate::{Result, StorageError};

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    /// Number of upcoming calls that fail with a connection error
    pending_failures: u32,
    writes: u64,
}

/// HashMap-backed state store
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given pairs
    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for (k, v) in values {
                inner.values.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Make the next `count` calls (get or set) fail with a connection error
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().pending_failures = count;
    }

    /// Snapshot of all stored pairs
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().values.clone()
    }

    /// Number of successful `set` calls so far
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    fn take_failure(inner: &mut Inner) -> Result<()> {
        if inner.pending_failures > 0 {
            inner.pending_failures -= 1;
            return Err(StorageError::connection("injected state store failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        Ok(inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner.values.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }
}
