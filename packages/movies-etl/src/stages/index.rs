//! Bulk upsert with batch-level failure reporting

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{FilmWork, SearchIndex};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    retry: RetryPolicy,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SearchIndex>, retry: RetryPolicy) -> Self {
        Self { index, retry }
    }

    /// Upsert `docs`, retrying the whole batch while any document is rejected
    ///
    /// Returns the number of documents written.
    pub async fn write(&self, docs: &[FilmWork]) -> Result<usize> {
        if docs.is_empty() {
            debug!("Nothing to index");
            return Ok(0);
        }

        let index = &self.index;
        let written = self
            .retry
            .run("bulk upsert", || async move {
                let report = index.bulk_upsert(docs).await?;
                match report.failures.first() {
                    None => Ok(report.indexed),
                    Some(first) => Err(SyncError::PartialWrite {
                        failed: report.failures.len(),
                        total: docs.len(),
                        first_reason: format!("{} ({}): {}", first.id, first.status, first.reason),
                    }),
                }
            })
            .await?;

        info!("Indexed {} documents", written);
        Ok(written)
    }
}
