//! In-memory adapters
//!
//! `InMemorySource` models the `content` schema (film works, persons,
//! genres and the two link tables) closely enough to drive the scheduler
//! end to end. `InMemoryIndex` keeps each document as its serialized JSON so
//! repeated writes can be compared byte for byte.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::{
    BulkFailure, BulkReport, ChangedRow, FilmWork, JoinSpec, Person, RelationalSource, Role,
    ScanBound, SearchIndex, FILM_WORK_TABLE, GENRE_FILM_WORK_TABLE, GENRE_TABLE,
    PERSON_FILM_WORK_TABLE, PERSON_TABLE,
};
use crate::error::{Result, SyncError};

// ═══════════════════════════════════════════════════════════════════════════
// Source rows
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct FilmRow {
    pub id: Uuid,
    pub modified: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub rating: Option<f64>,
}

impl FilmRow {
    pub fn new(id: Uuid, title: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            id,
            modified,
            title: title.into(),
            description: None,
            rating: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub id: Uuid,
    pub full_name: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreRow {
    pub id: Uuid,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Number of port calls served, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCalls {
    pub changed_ids: usize,
    pub resolve_root_ids: usize,
    pub load_film_works: usize,
}

#[derive(Default)]
struct SourceData {
    films: HashMap<Uuid, FilmRow>,
    persons: HashMap<Uuid, PersonRow>,
    genres: HashMap<Uuid, GenreRow>,
    person_links: Vec<(Uuid, Uuid, Role)>,
    genre_links: Vec<(Uuid, Uuid)>,
    calls: SourceCalls,
    pending_failures: u32,
}

impl SourceData {
    fn take_failure(&mut self) -> Result<()> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(SyncError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn table_rows(&self, table: &str) -> Result<Vec<ChangedRow>> {
        let rows = match table {
            FILM_WORK_TABLE => self
                .films
                .values()
                .map(|r| ChangedRow::new(r.id, r.modified))
                .collect(),
            PERSON_TABLE => self
                .persons
                .values()
                .map(|r| ChangedRow::new(r.id, r.modified))
                .collect(),
            GENRE_TABLE => self
                .genres
                .values()
                .map(|r| ChangedRow::new(r.id, r.modified))
                .collect(),
            other => return Err(SyncError::InvalidTable(other.to_string())),
        };
        Ok(rows)
    }

    /// `(film_work_id, linked id)` pairs of a join table
    fn links(&self, join: &JoinSpec) -> Result<Vec<(Uuid, Uuid)>> {
        match (join.table.as_str(), join.column.as_str()) {
            (PERSON_FILM_WORK_TABLE, "person_id") => Ok(self
                .person_links
                .iter()
                .map(|(film, person, _)| (*film, *person))
                .collect()),
            (GENRE_FILM_WORK_TABLE, "genre_id") => Ok(self.genre_links.clone()),
            (table, column) => Err(SyncError::InvalidTable(format!("{}.{}", table, column))),
        }
    }

    fn film_work(&self, row: &FilmRow) -> FilmWork {
        let mut doc = FilmWork::new(row.id, row.modified);
        doc.title = Some(row.title.clone());
        doc.description = row.description.clone();
        doc.imdb_rating = row.rating;

        for (film, person_id, role) in &self.person_links {
            if *film != row.id {
                continue;
            }
            let Some(person) = self.persons.get(person_id) else {
                continue;
            };
            let name = person.full_name.clone();
            match role {
                Role::Actor => {
                    doc.actors_names.push(name.clone());
                    doc.actors.push(Person::new(person.id, name));
                }
                Role::Writer => {
                    doc.writers_names.push(name.clone());
                    doc.writers.push(Person::new(person.id, name));
                }
                Role::Director => doc.director.push(name),
            }
        }
        for (film, genre_id) in &self.genre_links {
            if *film == row.id {
                if let Some(genre) = self.genres.get(genre_id) {
                    doc.genre.push(genre.name.clone());
                }
            }
        }
        doc
    }
}

fn page(mut rows: Vec<ChangedRow>, bound: &ScanBound, limit: usize) -> Vec<ChangedRow> {
    rows.retain(|row| bound.admits(row));
    rows.sort();
    rows.truncate(limit);
    rows
}

// ═══════════════════════════════════════════════════════════════════════════
// InMemorySource
// ═══════════════════════════════════════════════════════════════════════════

/// Fixture relational source; clones share the same tables
#[derive(Clone, Default)]
pub struct InMemorySource {
    inner: Arc<Mutex<SourceData>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_film(&self, row: FilmRow) {
        self.inner.lock().films.insert(row.id, row);
    }

    pub fn insert_person(&self, id: Uuid, full_name: impl Into<String>, modified: DateTime<Utc>) {
        self.inner.lock().persons.insert(
            id,
            PersonRow {
                id,
                full_name: full_name.into(),
                modified,
            },
        );
    }

    pub fn insert_genre(&self, id: Uuid, name: impl Into<String>, modified: DateTime<Utc>) {
        self.inner.lock().genres.insert(
            id,
            GenreRow {
                id,
                name: name.into(),
                modified,
            },
        );
    }

    pub fn link_person(&self, film_work_id: Uuid, person_id: Uuid, role: Role) {
        self.inner
            .lock()
            .person_links
            .push((film_work_id, person_id, role));
    }

    pub fn link_genre(&self, film_work_id: Uuid, genre_id: Uuid) {
        self.inner.lock().genre_links.push((film_work_id, genre_id));
    }

    /// Delete a film work and, like `ON DELETE CASCADE`, its links
    pub fn remove_film(&self, id: Uuid) {
        let mut data = self.inner.lock();
        data.films.remove(&id);
        data.person_links.retain(|(film, _, _)| *film != id);
        data.genre_links.retain(|(film, _)| *film != id);
    }

    /// Rename a person and bump its `modified`
    pub fn update_person(&self, id: Uuid, full_name: impl Into<String>, modified: DateTime<Utc>) {
        if let Some(person) = self.inner.lock().persons.get_mut(&id) {
            person.full_name = full_name.into();
            person.modified = modified;
        }
    }

    /// Make the next `count` calls fail with a pool timeout
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().pending_failures = count;
    }

    pub fn calls(&self) -> SourceCalls {
        self.inner.lock().calls
    }
}

#[async_trait]
impl RelationalSource for InMemorySource {
    async fn changed_ids(
        &self,
        table: &str,
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>> {
        let mut data = self.inner.lock();
        data.calls.changed_ids += 1;
        data.take_failure()?;
        let rows = data.table_rows(table)?;
        Ok(page(rows, bound, limit))
    }

    async fn resolve_root_ids(
        &self,
        join: &JoinSpec,
        ids: &[Uuid],
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>> {
        let mut data = self.inner.lock();
        data.calls.resolve_root_ids += 1;
        data.take_failure()?;

        let mut roots: BTreeMap<Uuid, ChangedRow> = BTreeMap::new();
        for (film_id, linked) in data.links(join)? {
            if !ids.contains(&linked) {
                continue;
            }
            if let Some(film) = data.films.get(&film_id) {
                roots.insert(film.id, ChangedRow::new(film.id, film.modified));
            }
        }
        Ok(page(roots.into_values().collect(), bound, limit))
    }

    async fn load_film_works(&self, ids: &[Uuid]) -> Result<Vec<FilmWork>> {
        let mut data = self.inner.lock();
        data.calls.load_film_works += 1;
        data.take_failure()?;

        let mut docs: Vec<FilmWork> = ids
            .iter()
            .filter_map(|id| data.films.get(id))
            .map(|row| data.film_work(row))
            .collect();
        docs.sort_by_key(|doc| doc.changed_row());
        docs.dedup_by_key(|doc| doc.id);
        Ok(docs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// InMemoryIndex
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct IndexData {
    docs: BTreeMap<Uuid, String>,
    bulk_calls: usize,
    pending_rejections: u32,
}

/// Fixture search index; clones share the same documents
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    inner: Arc<Mutex<IndexData>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// In the next `count` bulk calls, reject the first document with 429
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().pending_rejections = count;
    }

    /// Stored JSON of one document
    pub fn raw(&self, id: Uuid) -> Option<String> {
        self.inner.lock().docs.get(&id).cloned()
    }

    pub fn get(&self, id: Uuid) -> Result<Option<FilmWork>> {
        match self.raw(id) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Every stored document's JSON, keyed by id
    pub fn snapshot(&self) -> BTreeMap<Uuid, String> {
        self.inner.lock().docs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().docs.is_empty()
    }

    pub fn bulk_calls(&self) -> usize {
        self.inner.lock().bulk_calls
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn bulk_upsert(&self, docs: &[FilmWork]) -> Result<BulkReport> {
        let encoded = docs
            .iter()
            .map(|doc| Ok((doc.id, serde_json::to_string(doc)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut data = self.inner.lock();
        data.bulk_calls += 1;

        let reject_first = data.pending_rejections > 0;
        if reject_first {
            data.pending_rejections -= 1;
        }

        let mut report = BulkReport::default();
        for (i, (id, json)) in encoded.into_iter().enumerate() {
            if reject_first && i == 0 {
                report.failures.push(BulkFailure {
                    id: id.to_string(),
                    status: 429,
                    reason: "es_rejected_execution_exception".to_string(),
                });
                continue;
            }
            data.docs.insert(id, json);
            report.indexed += 1;
        }
        Ok(report)
    }
}
