//! Infrastructure adapters for the source and index ports

pub mod elasticsearch;
pub mod memory;
pub mod postgres;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::{FilmRow, InMemoryIndex, InMemorySource, SourceCalls};
pub use postgres::PostgresSource;
