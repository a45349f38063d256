//! Round-robin sync scheduler
//!
//! One tick visits one table:
//!
//! ```text
//! read cursor ─► scan changed ids ─┬─ root ──────────────► hydrate ─► write ─► advance watermark
//!                                  └─ secondary ─► resolve ─► hydrate ─► write ─► advance watermark
//!            ─► scan exhausted ─► advance table
//! ```
//!
//! The watermark only moves after the page it covers has been written, so
//! a crash replays at most one page and never skips one.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use movies_etl_state::StateStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ConfigError, SyncSettings};
use crate::domain::{EntityTableSpec, JoinSpec, RelationalSource, SearchIndex};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::stages::{AggregateLoader, ChangeIdExtractor, IndexWriter, RootResolver};
use crate::watermark::{format_watermark, SyncCursor, WatermarkTracker};

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub table: String,
    pub table_index: usize,
    /// Pages of changed ids read from `table`
    pub pages: usize,
    /// Root ids hydrated (after resolution for secondary tables)
    pub roots: usize,
    /// Documents written to the index
    pub documents: usize,
    /// Watermark after the tick
    pub watermark: Option<DateTime<Utc>>,
}

pub struct SyncScheduler {
    tables: Vec<EntityTableSpec>,
    chunk_size: usize,
    tick_interval: Duration,
    retry: RetryPolicy,
    tracker: WatermarkTracker,
    source: Arc<dyn RelationalSource>,
    loader: AggregateLoader,
    writer: IndexWriter,
}

impl SyncScheduler {
    pub fn new(
        settings: &SyncSettings,
        retry: RetryPolicy,
        store: Arc<dyn StateStore>,
        source: Arc<dyn RelationalSource>,
        index: Arc<dyn SearchIndex>,
    ) -> Result<Self> {
        if settings.tables.is_empty() {
            return Err(SyncError::Config(ConfigError::invalid(
                "sync.tables",
                "at least one table is required",
            )));
        }

        let names = settings.tables.iter().map(|t| t.name.clone()).collect();
        let tracker = WatermarkTracker::new(store, retry.clone(), names, settings.watermark_scope);
        let loader = AggregateLoader::new(source.clone(), retry.clone(), settings.chunk_size);
        let writer = IndexWriter::new(index, retry.clone());

        Ok(Self {
            tables: settings.tables.clone(),
            chunk_size: settings.chunk_size,
            tick_interval: settings.tick_interval(),
            retry,
            tracker,
            source,
            loader,
            writer,
        })
    }

    pub fn tables(&self) -> &[EntityTableSpec] {
        &self.tables
    }

    /// Sync every pending change of the current table, then move to the next
    pub async fn tick(&self) -> Result<TickReport> {
        let started = Instant::now();
        let mut cursor = self.tracker.read_cursor().await?;
        let spec = &self.tables[cursor.table_index];

        info!(
            "Tick started: queue index {}, table {}, watermark {}",
            cursor.table_index,
            spec.name,
            cursor
                .watermark
                .map(format_watermark)
                .unwrap_or_else(|| "none".to_string())
        );

        let mut report = TickReport {
            table: spec.name.clone(),
            table_index: cursor.table_index,
            pages: 0,
            roots: 0,
            documents: 0,
            watermark: cursor.watermark,
        };

        match &spec.join {
            None => self.sync_root(spec, &mut cursor, &mut report).await?,
            Some(join) => self.sync_secondary(spec, join, &mut cursor, &mut report).await?,
        }

        report.watermark = cursor.watermark;
        self.tracker.advance_table(&mut cursor).await?;

        info!(
            "Tick finished for {}: {} pages, {} roots, {} documents in {:?}",
            report.table,
            report.pages,
            report.roots,
            report.documents,
            started.elapsed()
        );
        Ok(report)
    }

    async fn sync_root(
        &self,
        spec: &EntityTableSpec,
        cursor: &mut SyncCursor,
        report: &mut TickReport,
    ) -> Result<()> {
        let mut extractor = self.extractor(spec, cursor);

        while let Some(batch) = extractor.next_page().await? {
            report.pages += 1;
            let ids = batch.ids();
            self.write_roots(&ids, report).await?;
            self.tracker
                .advance_watermark(cursor, batch.last_modified())
                .await?;
        }
        Ok(())
    }

    async fn sync_secondary(
        &self,
        spec: &EntityTableSpec,
        join: &JoinSpec,
        cursor: &mut SyncCursor,
        report: &mut TickReport,
    ) -> Result<()> {
        let mut extractor = self.extractor(spec, cursor);

        while let Some(batch) = extractor.next_page().await? {
            report.pages += 1;
            let mut resolver = RootResolver::new(
                self.source.clone(),
                self.retry.clone(),
                join.clone(),
                batch.ids(),
                self.chunk_size,
            );

            while let Some(roots) = resolver.next_page().await? {
                let ids = roots.ids();
                self.write_roots(&ids, report).await?;
            }

            // The secondary row's own timestamp, not the roots'
            self.tracker
                .advance_watermark(cursor, batch.last_modified())
                .await?;
        }
        Ok(())
    }

    fn extractor(&self, spec: &EntityTableSpec, cursor: &SyncCursor) -> ChangeIdExtractor {
        ChangeIdExtractor::new(
            self.source.clone(),
            self.retry.clone(),
            spec.name.clone(),
            cursor.watermark,
            self.chunk_size,
        )
    }

    async fn write_roots(&self, ids: &[Uuid], report: &mut TickReport) -> Result<()> {
        report.roots += ids.len();
        let mut pages = self.loader.pages(ids);
        while let Some(docs) = pages.next_page().await? {
            report.documents += self.writer.write(&docs).await?;
        }
        debug!("Synced {} root ids", ids.len());
        Ok(())
    }

    /// Tick, sleep, repeat until `shutdown` resolves or a tick fails
    ///
    /// A tick in progress always completes; `shutdown` is observed between
    /// ticks and during the sleep.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            self.tick().await?;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping after completed tick");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::infrastructure::{FilmRow, InMemoryIndex, InMemorySource};
    use chrono::TimeZone;
    use movies_etl_state::{InMemoryStateStore, QUEUE_INDEX_KEY};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            ..RetryPolicy::default()
        }
    }

    fn scheduler(
        store: &InMemoryStateStore,
        source: &InMemorySource,
        index: &InMemoryIndex,
        chunk_size: usize,
    ) -> SyncScheduler {
        let settings = SyncSettings {
            chunk_size,
            tick_interval_ms: 1,
            ..SyncSettings::default()
        };
        SyncScheduler::new(
            &settings,
            fast_retry(),
            Arc::new(store.clone()),
            Arc::new(source.clone()),
            Arc::new(index.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_root_tick_indexes_and_advances() {
        let store = InMemoryStateStore::new();
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();
        for i in 1..=5u128 {
            source.insert_film(FilmRow::new(Uuid::from_u128(i), format!("Film {}", i), ts(i as i64)));
        }

        let report = scheduler(&store, &source, &index, 2).tick().await.unwrap();

        assert_eq!(report.table, "film_work");
        assert_eq!(report.pages, 3);
        assert_eq!(report.documents, 5);
        assert_eq!(report.watermark, Some(ts(5)));
        assert_eq!(index.len(), 5);
        assert_eq!(store.snapshot().get(QUEUE_INDEX_KEY).map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_empty_table_still_advances_queue() {
        let store = InMemoryStateStore::new();
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();

        let report = scheduler(&store, &source, &index, 10).tick().await.unwrap();

        assert_eq!(report.pages, 0);
        assert_eq!(report.watermark, None);
        assert_eq!(index.bulk_calls(), 0);
        assert_eq!(store.snapshot().get(QUEUE_INDEX_KEY).map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_secondary_tick_reindexes_linked_roots() {
        let store = InMemoryStateStore::with_values([(QUEUE_INDEX_KEY, "2")]);
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();
        let film = Uuid::from_u128(1);
        let genre = Uuid::from_u128(2);
        source.insert_film(FilmRow::new(film, "Film", ts(1)));
        source.insert_genre(genre, "Drama", ts(50));
        source.link_genre(film, genre);
        source.insert_person(Uuid::from_u128(3), "Ann", ts(60));
        source.link_person(film, Uuid::from_u128(3), Role::Writer);

        let report = scheduler(&store, &source, &index, 10).tick().await.unwrap();

        assert_eq!(report.table, "genre");
        assert_eq!(report.roots, 1);
        assert_eq!(report.watermark, Some(ts(50)));
        let doc = index.get(film).unwrap().unwrap();
        assert_eq!(doc.genre, vec!["Drama"]);
        assert_eq!(doc.writers_names, vec!["Ann"]);
        assert_eq!(store.snapshot().get(QUEUE_INDEX_KEY).map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn test_fatal_source_error_keeps_queue_position() {
        let store = InMemoryStateStore::new();
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();
        source.insert_film(FilmRow::new(Uuid::from_u128(1), "Film", ts(1)));
        source.fail_next(10);

        let result = scheduler(&store, &source, &index, 10).tick().await;

        assert!(matches!(result, Err(SyncError::RetriesExhausted { .. })));
        assert!(store.snapshot().get(QUEUE_INDEX_KEY).is_none());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_run_until_stops_between_ticks() {
        let store = InMemoryStateStore::new();
        let source = InMemorySource::new();
        let index = InMemoryIndex::new();

        scheduler(&store, &source, &index, 10)
            .run_until(std::future::ready(()))
            .await
            .unwrap();

        // Exactly one tick ran before the ready shutdown was observed
        assert_eq!(source.calls().changed_ids, 1);
        assert_eq!(store.snapshot().get(QUEUE_INDEX_KEY).map(String::as_str), Some("1"));
    }

    #[test]
    fn test_rejects_empty_table_list() {
        let settings = SyncSettings {
            tables: vec![],
            ..SyncSettings::default()
        };
        let result = SyncScheduler::new(
            &settings,
            fast_retry(),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemorySource::new()),
            Arc::new(InMemoryIndex::new()),
        );
        assert!(result.is_err());
    }
}
