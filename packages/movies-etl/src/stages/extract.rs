//! Watermark-filtered, keyset-paginated id scan over one table

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{ChangeBatch, RelationalSource, ScanBound};
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Pull-driven pager over `SELECT id, modified FROM table WHERE modified > watermark`
///
/// Each page resumes strictly after the last `(modified, id)` of the
/// previous one, so rows sharing a timestamp are neither skipped nor
/// repeated. A short page ends the scan without another round trip.
pub struct ChangeIdExtractor {
    source: Arc<dyn RelationalSource>,
    retry: RetryPolicy,
    table: String,
    limit: usize,
    bound: ScanBound,
    exhausted: bool,
}

impl ChangeIdExtractor {
    pub fn new(
        source: Arc<dyn RelationalSource>,
        retry: RetryPolicy,
        table: impl Into<String>,
        watermark: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Self {
        Self {
            source,
            retry,
            table: table.into(),
            limit: limit.max(1),
            bound: ScanBound::from_watermark(watermark),
            exhausted: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<ChangeBatch>> {
        if self.exhausted {
            return Ok(None);
        }

        let source = &self.source;
        let (table, bound, limit) = (self.table.as_str(), &self.bound, self.limit);
        let rows = self
            .retry
            .run(&format!("scan {}", table), || {
                source.changed_ids(table, bound, limit)
            })
            .await?;

        if rows.len() < self.limit {
            self.exhausted = true;
        }

        let batch = match ChangeBatch::new(rows) {
            Some(batch) => batch,
            None => {
                self.exhausted = true;
                return Ok(None);
            }
        };
        self.bound = ScanBound::AfterRow(batch.last());
        debug!(
            "Fetched {} changed ids from {} (last modified {})",
            batch.len(),
            self.table,
            batch.last_modified()
        );
        Ok(Some(batch))
    }
}
