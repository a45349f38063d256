//! Domain layer for the synchronizer
//!
//! # Domain Models
//!
//! - `EntityTableSpec`: one table the scheduler visits, optionally linked to
//!   the root through a join table
//! - `ChangedRow` / `ChangeBatch`: a page of ids ordered by `modified`
//! - `ScanBound`: lower bound of a keyset-paginated scan
//! - `FilmWork` / `Person`: the denormalized index document
//!
//! # Port Traits
//!
//! - `RelationalSource`: id scans, join resolution and hydration
//! - `SearchIndex`: bulk upsert

pub mod ports;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use ports::{BulkFailure, BulkReport, RelationalSource, SearchIndex};

pub const FILM_WORK_TABLE: &str = "film_work";
pub const PERSON_TABLE: &str = "person";
pub const GENRE_TABLE: &str = "genre";
pub const PERSON_FILM_WORK_TABLE: &str = "person_film_work";
pub const GENRE_FILM_WORK_TABLE: &str = "genre_film_work";

/// Column every join table uses to point at the root row
pub const ROOT_FOREIGN_KEY: &str = "film_work_id";

// ═══════════════════════════════════════════════════════════════════════════
// Table specs
// ═══════════════════════════════════════════════════════════════════════════

/// Join table linking a secondary table to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSpec {
    /// Join table name, e.g. `person_film_work`
    pub table: String,
    /// Column referencing the secondary table, e.g. `person_id`
    pub column: String,
}

/// One table visited by the round-robin scheduler
///
/// The root table has no `join`; every other table reaches the root through
/// exactly one join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityTableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
}

impl EntityTableSpec {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join: None,
        }
    }

    pub fn secondary(
        name: impl Into<String>,
        join_table: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            join: Some(JoinSpec {
                table: join_table.into(),
                column: join_column.into(),
            }),
        }
    }

    pub fn is_root(&self) -> bool {
        self.join.is_none()
    }
}

/// film_work, then person and genre through their join tables
pub fn default_tables() -> Vec<EntityTableSpec> {
    vec![
        EntityTableSpec::root(FILM_WORK_TABLE),
        EntityTableSpec::secondary(PERSON_TABLE, PERSON_FILM_WORK_TABLE, "person_id"),
        EntityTableSpec::secondary(GENRE_TABLE, GENRE_FILM_WORK_TABLE, "genre_id"),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
// Change pages
// ═══════════════════════════════════════════════════════════════════════════

/// Id of a changed row plus the timestamp it is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangedRow {
    pub modified: DateTime<Utc>,
    pub id: Uuid,
}

impl ChangedRow {
    pub fn new(id: Uuid, modified: DateTime<Utc>) -> Self {
        Self { modified, id }
    }
}

/// Lower bound of an ordered `(modified, id)` scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanBound {
    /// No filter: first run or reset watermark
    Unbounded,
    /// `modified > watermark`
    After(DateTime<Utc>),
    /// `(modified, id) > (row.modified, row.id)`, continuing a scan
    AfterRow(ChangedRow),
}

impl ScanBound {
    pub fn from_watermark(watermark: Option<DateTime<Utc>>) -> Self {
        watermark.map_or(ScanBound::Unbounded, ScanBound::After)
    }

    pub fn admits(&self, row: &ChangedRow) -> bool {
        match self {
            ScanBound::Unbounded => true,
            ScanBound::After(ts) => row.modified > *ts,
            ScanBound::AfterRow(last) => row > last,
        }
    }
}

/// Non-empty page of ids ascending by `modified`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    rows: Vec<ChangedRow>,
}

impl ChangeBatch {
    /// `None` for an empty page
    pub fn new(rows: Vec<ChangedRow>) -> Option<Self> {
        if rows.is_empty() {
            None
        } else {
            Some(Self { rows })
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn last(&self) -> ChangedRow {
        // Non-empty by construction
        self.rows[self.rows.len() - 1]
    }

    /// Every row not seen yet has a timestamp at or after this one
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last().modified
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Index document
// ═══════════════════════════════════════════════════════════════════════════

/// Role of a person in a film work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Actor,
    Writer,
    Director,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Actor => "actor",
            Role::Writer => "writer",
            Role::Director => "director",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Person reference nested in a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
}

impl Person {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Denormalized film work as stored in the search index
///
/// List fields are always present (empty when there is no association).
/// `modified` drives watermark bookkeeping and is not part of the indexed
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmWork {
    pub id: Uuid,
    #[serde(skip)]
    pub modified: DateTime<Utc>,
    pub imdb_rating: Option<f64>,
    #[serde(default)]
    pub genre: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub director: Vec<String>,
    #[serde(default)]
    pub actors_names: Vec<String>,
    #[serde(default)]
    pub writers_names: Vec<String>,
    #[serde(default)]
    pub actors: Vec<Person>,
    #[serde(default)]
    pub writers: Vec<Person>,
}

impl FilmWork {
    /// Document with scalar fields only, no associations
    pub fn new(id: Uuid, modified: DateTime<Utc>) -> Self {
        Self {
            id,
            modified,
            imdb_rating: None,
            genre: Vec::new(),
            title: None,
            description: None,
            director: Vec::new(),
            actors_names: Vec::new(),
            writers_names: Vec::new(),
            actors: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Sort every list and drop duplicates
    ///
    /// Persons are deduplicated by id. Applying this to every hydrated
    /// document makes repeated syncs of an unchanged row produce the same
    /// bytes.
    pub fn normalized(mut self) -> Self {
        for names in [
            &mut self.genre,
            &mut self.director,
            &mut self.actors_names,
            &mut self.writers_names,
        ] {
            names.sort();
            names.dedup();
        }
        for persons in [&mut self.actors, &mut self.writers] {
            persons.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
            persons.dedup_by_key(|p| p.id);
        }
        self
    }

    pub fn changed_row(&self) -> ChangedRow {
        ChangedRow::new(self.id, self.modified)
    }
}
