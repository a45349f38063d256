//! Root ids → denormalized documents

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{FilmWork, RelationalSource};
use crate::error::Result;
use crate::retry::RetryPolicy;

pub struct AggregateLoader {
    source: Arc<dyn RelationalSource>,
    retry: RetryPolicy,
    limit: usize,
}

impl AggregateLoader {
    pub fn new(source: Arc<dyn RelationalSource>, retry: RetryPolicy, limit: usize) -> Self {
        Self {
            source,
            retry,
            limit: limit.max(1),
        }
    }

    /// Pages of at most `limit` documents, one aggregation query each
    pub fn pages<'a>(&'a self, ids: &'a [Uuid]) -> DocumentPages<'a> {
        DocumentPages {
            loader: self,
            chunks: ids.chunks(self.limit),
        }
    }

    async fn load(&self, ids: &[Uuid]) -> Result<Vec<FilmWork>> {
        let source = &self.source;
        let docs = self
            .retry
            .run("hydrate film works", || source.load_film_works(ids))
            .await?;

        if docs.len() < ids.len() {
            debug!(
                "{} of {} film works vanished before hydration",
                ids.len() - docs.len(),
                ids.len()
            );
        }
        Ok(docs.into_iter().map(FilmWork::normalized).collect())
    }
}

pub struct DocumentPages<'a> {
    loader: &'a AggregateLoader,
    chunks: std::slice::Chunks<'a, Uuid>,
}

impl DocumentPages<'_> {
    /// `Some(vec![])` is possible when every id of a chunk vanished
    pub async fn next_page(&mut self) -> Result<Option<Vec<FilmWork>>> {
        match self.chunks.next() {
            Some(ids) => self.loader.load(ids).await.map(Some),
            None => Ok(None),
        }
    }
}
