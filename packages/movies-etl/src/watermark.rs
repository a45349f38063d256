//! Typed view over the persisted sync progress
//!
//! Two keys live in the state store: `queue_index` (decimal position in the
//! table sequence) and `last_modified` (ISO-8601 timestamp). Both are
//! interpreted leniently: a value that does not parse is logged and treated
//! as absent, which restarts the scan from the beginning instead of failing.
//!
//! Only the timestamp is persisted, not the last row id. Within a tick the
//! pagers resume after `(modified, id)`, so rows sharing a timestamp are
//! neither skipped nor repeated. Across runs the scan restarts from
//! `modified > watermark`: if a process stops between two pages that split
//! rows with the same `modified`, the unsynced rows of that timestamp are
//! skipped until they change again.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use movies_etl_state::{StateStore, LAST_MODIFIED_KEY, QUEUE_INDEX_KEY};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// How watermarks are keyed in the state store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkScope {
    /// One `last_modified` key shared by every table
    #[default]
    Shared,
    /// `last_modified:<table>`, one resume point per table
    PerTable,
}

impl std::str::FromStr for WatermarkScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(WatermarkScope::Shared),
            "per_table" | "per-table" => Ok(WatermarkScope::PerTable),
            other => Err(ConfigError::invalid(
                "sync.watermark_scope",
                format!("expected 'shared' or 'per_table', got '{}'", other),
            )),
        }
    }
}

/// Position of the synchronizer: which table, and from which timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    pub table_index: usize,
    pub watermark: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339, a space instead of `T`, and offset-less values (read
/// as UTC)
pub fn parse_watermark(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_watermark(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub struct WatermarkTracker {
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    tables: Vec<String>,
    scope: WatermarkScope,
}

impl WatermarkTracker {
    pub fn new(
        store: Arc<dyn StateStore>,
        retry: RetryPolicy,
        tables: Vec<String>,
        scope: WatermarkScope,
    ) -> Self {
        Self {
            store,
            retry,
            tables,
            scope,
        }
    }

    /// State key holding the watermark for table `table_index`
    pub fn watermark_key(&self, table_index: usize) -> String {
        match (self.scope, self.tables.get(table_index)) {
            (WatermarkScope::PerTable, Some(table)) => format!("{}:{}", LAST_MODIFIED_KEY, table),
            _ => LAST_MODIFIED_KEY.to_string(),
        }
    }

    pub async fn read_cursor(&self) -> Result<SyncCursor> {
        let count = self.tables.len();
        if count == 0 {
            return Err(SyncError::Config(ConfigError::invalid(
                "sync.tables",
                "at least one table is required",
            )));
        }

        let store = &self.store;
        let raw_index = self
            .retry
            .run(&format!("state get {}", QUEUE_INDEX_KEY), || {
                store.get_or(QUEUE_INDEX_KEY, "0")
            })
            .await?;
        let table_index = match raw_index.trim().parse::<i64>() {
            Ok(i) => i.rem_euclid(count as i64) as usize,
            Err(e) => {
                warn!(
                    "Ignoring malformed {} value {:?} ({}), starting from table 0",
                    QUEUE_INDEX_KEY, raw_index, e
                );
                0
            }
        };

        let watermark = self.read_watermark(table_index).await?;
        Ok(SyncCursor {
            table_index,
            watermark,
        })
    }

    async fn read_watermark(&self, table_index: usize) -> Result<Option<DateTime<Utc>>> {
        let key = self.watermark_key(table_index);
        let raw = match self.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let parsed = parse_watermark(&raw);
        if parsed.is_none() {
            warn!(
                "Ignoring malformed {} value {:?}, rescanning from the beginning",
                key, raw
            );
        }
        Ok(parsed)
    }

    /// Persist `ts` as the new watermark if it is later than the current one
    ///
    /// Returns whether anything was written.
    pub async fn advance_watermark(
        &self,
        cursor: &mut SyncCursor,
        ts: DateTime<Utc>,
    ) -> Result<bool> {
        if cursor.watermark.is_some_and(|current| ts <= current) {
            debug!(
                "Watermark {} not later than {:?}, keeping it",
                format_watermark(ts),
                cursor.watermark
            );
            return Ok(false);
        }

        let key = self.watermark_key(cursor.table_index);
        let value = format_watermark(ts);
        self.set(&key, &value).await?;
        cursor.watermark = Some(ts);
        debug!("Persisted {} = {}", key, value);
        Ok(true)
    }

    /// Move to the next table and persist the new position
    ///
    /// With a shared watermark the cursor keeps its timestamp; per-table
    /// watermarks are reloaded for the new table.
    pub async fn advance_table(&self, cursor: &mut SyncCursor) -> Result<()> {
        let next = (cursor.table_index + 1) % self.tables.len().max(1);
        self.set(QUEUE_INDEX_KEY, &next.to_string()).await?;
        cursor.table_index = next;

        if self.scope == WatermarkScope::PerTable {
            cursor.watermark = self.read_watermark(next).await?;
        }
        info!(
            "Queue advanced to {} ({})",
            next,
            self.tables.get(next).map(String::as_str).unwrap_or("?")
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let store = &self.store;
        self.retry
            .run(&format!("state get {}", key), || store.get(key))
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let store = &self.store;
        self.retry
            .run(&format!("state set {}", key), || store.set(key, value))
            .await
    }
}
