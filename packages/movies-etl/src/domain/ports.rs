//! Port traits for the relational source and the search index

use async_trait::async_trait;
use uuid::Uuid;

use super::{ChangedRow, FilmWork, JoinSpec, ScanBound};
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: RelationalSource
// ═══════════════════════════════════════════════════════════════════════════

/// Read side of the synchronizer
///
/// # Implementations
///
/// - `PostgresSource`: sqlx pool against the `content` schema
/// - `InMemorySource`: fixture tables for tests
#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Rows of `table` admitted by `bound`, ascending by `(modified, id)`,
    /// at most `limit`
    async fn changed_ids(
        &self,
        table: &str,
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>>;

    /// Distinct root rows linked through `join` to any of `ids`, ascending
    /// by `(modified, id)`, at most `limit`
    ///
    /// The root's own `modified` is what `bound` filters on.
    async fn resolve_root_ids(
        &self,
        join: &JoinSpec,
        ids: &[Uuid],
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>>;

    /// One aggregated document per id that still exists
    ///
    /// Ids that vanished are silently absent from the result.
    async fn load_film_works(&self, ids: &[Uuid]) -> Result<Vec<FilmWork>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: SearchIndex
// ═══════════════════════════════════════════════════════════════════════════

/// One document the index refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of a bulk upsert that reached the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub indexed: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write side of the synchronizer
///
/// Documents are keyed by their `id`; writing the same document twice
/// leaves one copy.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk_upsert(&self, docs: &[FilmWork]) -> Result<BulkReport>;
}
