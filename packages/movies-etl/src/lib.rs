/*
 * movies-etl - incremental PostgreSQL → Elasticsearch synchronizer
 *
 * Keeps the `movies` search index in step with the `content` schema by
 * polling for rows whose `modified` moved past a persisted watermark.
 *
 * Architecture:
 * - Round-robin over entity tables (film_work, person, genre)
 * - Secondary changes resolved to film works through link tables
 * - Keyset-paginated scans, one page per stage in memory
 * - Idempotent bulk upserts, watermark advanced after each written page
 * - Progress persisted in a key-value state store (Redis)
 */

// Public modules
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod retry;
pub mod scheduler;
pub mod stages;
pub mod watermark;

// Re-exports
pub use config::{ConfigError, EtlConfig, SyncSettings};
pub use domain::{
    ChangeBatch, ChangedRow, EntityTableSpec, FilmWork, JoinSpec, Person, RelationalSource, Role,
    ScanBound, SearchIndex,
};
pub use error::{ErrorCategory, Result, SyncError};
pub use infrastructure::{ElasticsearchIndex, InMemoryIndex, InMemorySource, PostgresSource};
pub use retry::RetryPolicy;
pub use scheduler::{SyncScheduler, TickReport};
pub use stages::{AggregateLoader, ChangeIdExtractor, IndexWriter, RootResolver};
pub use watermark::{SyncCursor, WatermarkScope, WatermarkTracker};
