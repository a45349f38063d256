//! Secondary-table ids → distinct aggregate-root ids

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{ChangeBatch, JoinSpec, RelationalSource, ScanBound};
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Pager over the roots linked to one page of secondary ids
///
/// Roots come back ordered by their own `modified`; every root appears at
/// most once across all pages of one resolution.
pub struct RootResolver {
    source: Arc<dyn RelationalSource>,
    retry: RetryPolicy,
    join: JoinSpec,
    ids: Vec<Uuid>,
    limit: usize,
    bound: ScanBound,
    exhausted: bool,
}

impl RootResolver {
    pub fn new(
        source: Arc<dyn RelationalSource>,
        retry: RetryPolicy,
        join: JoinSpec,
        ids: Vec<Uuid>,
        limit: usize,
    ) -> Self {
        let exhausted = ids.is_empty();
        Self {
            source,
            retry,
            join,
            ids,
            limit: limit.max(1),
            bound: ScanBound::Unbounded,
            exhausted,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<ChangeBatch>> {
        if self.exhausted {
            return Ok(None);
        }

        let source = &self.source;
        let (join, ids, bound, limit) = (&self.join, self.ids.as_slice(), &self.bound, self.limit);
        let mut rows = self
            .retry
            .run(&format!("resolve via {}", join.table), || {
                source.resolve_root_ids(join, ids, bound, limit)
            })
            .await?;

        if rows.len() < self.limit {
            self.exhausted = true;
        }
        // Ordered by (modified, id), so repeats are adjacent
        rows.dedup_by_key(|row| row.id);

        let batch = match ChangeBatch::new(rows) {
            Some(batch) => batch,
            None => {
                self.exhausted = true;
                return Ok(None);
            }
        };
        self.bound = ScanBound::AfterRow(batch.last());
        debug!(
            "Resolved {} root ids through {}.{}",
            batch.len(),
            self.join.table,
            self.join.column
        );
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FilmWork, Role, PERSON_FILM_WORK_TABLE};
    use crate::infrastructure::{FilmRow, InMemorySource};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_650_000_000 + secs, 0).unwrap()
    }

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn person_join() -> JoinSpec {
        JoinSpec {
            table: PERSON_FILM_WORK_TABLE.to_string(),
            column: "person_id".to_string(),
        }
    }

    /// One person in five films; films 2/3 and 4/5 share a timestamp
    fn prolific_person() -> InMemorySource {
        let source = InMemorySource::new();
        let person = id(100);
        source.insert_person(person, "Prolific", ts(50));
        for (film, secs) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)] {
            source.insert_film(FilmRow::new(id(film), format!("Film {}", film), ts(secs)));
            source.link_person(id(film), person, Role::Actor);
        }
        source
    }

    async fn drain(resolver: &mut RootResolver) -> Vec<Vec<Uuid>> {
        let mut pages = Vec::new();
        while let Some(batch) = resolver.next_page().await.unwrap() {
            pages.push(batch.ids());
        }
        pages
    }

    #[tokio::test]
    async fn test_pages_continue_past_tied_timestamps() {
        let source = prolific_person();
        let mut resolver = RootResolver::new(
            Arc::new(source.clone()),
            RetryPolicy::none(),
            person_join(),
            vec![id(100)],
            2,
        );

        let pages = drain(&mut resolver).await;

        assert_eq!(
            pages,
            vec![vec![id(1), id(2)], vec![id(3), id(4)], vec![id(5)]]
        );
        // The short third page ends the scan
        assert_eq!(source.calls().resolve_root_ids, 3);
    }

    #[tokio::test]
    async fn test_empty_ids_never_query() {
        let source = prolific_person();
        let mut resolver =
            RootResolver::new(Arc::new(source.clone()), RetryPolicy::none(), person_join(), vec![], 2);

        assert!(resolver.next_page().await.unwrap().is_none());
        assert_eq!(source.calls().resolve_root_ids, 0);
    }

    /// Returns every resolved row twice, as a join without DISTINCT would
    struct DuplicatingSource(InMemorySource);

    #[async_trait]
    impl RelationalSource for DuplicatingSource {
        async fn changed_ids(
            &self,
            table: &str,
            bound: &ScanBound,
            limit: usize,
        ) -> Result<Vec<crate::domain::ChangedRow>> {
            self.0.changed_ids(table, bound, limit).await
        }

        async fn resolve_root_ids(
            &self,
            join: &JoinSpec,
            ids: &[Uuid],
            bound: &ScanBound,
            limit: usize,
        ) -> Result<Vec<crate::domain::ChangedRow>> {
            let rows = self.0.resolve_root_ids(join, ids, bound, limit).await?;
            Ok(rows.into_iter().flat_map(|row| [row, row]).collect())
        }

        async fn load_film_works(&self, ids: &[Uuid]) -> Result<Vec<FilmWork>> {
            self.0.load_film_works(ids).await
        }
    }

    #[tokio::test]
    async fn test_adjacent_repeats_are_collapsed() {
        let source = DuplicatingSource(prolific_person());
        let mut resolver =
            RootResolver::new(Arc::new(source), RetryPolicy::none(), person_join(), vec![id(100)], 2);

        let pages = drain(&mut resolver).await;

        let mut seen = HashSet::new();
        for page in &pages {
            let distinct: HashSet<_> = page.iter().collect();
            assert_eq!(distinct.len(), page.len(), "repeat within {:?}", page);
            for root in page {
                assert!(seen.insert(*root), "{} resolved twice", root);
            }
        }
        assert_eq!(seen.len(), 5);
    }
}
