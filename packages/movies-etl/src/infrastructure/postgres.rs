//! PostgreSQL relational source
//!
//! Table and column names come from validated configuration and are spliced
//! into the SQL text; every value (timestamps, ids, limits) is bound.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::config::PostgresConfig;
use crate::domain::{
    ChangedRow, FilmWork, JoinSpec, Person, RelationalSource, ScanBound, GENRE_FILM_WORK_TABLE,
    GENRE_TABLE, PERSON_FILM_WORK_TABLE, PERSON_TABLE, ROOT_FOREIGN_KEY,
};
use crate::error::Result;

pub struct PostgresSource {
    pool: PgPool,
    schema: String,
    root_table: String,
}

impl PostgresSource {
    /// Connect a pool sized by `max_connections` (one is enough for the
    /// sequential scheduler)
    pub async fn connect(config: &PostgresConfig, root_table: &str) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.dbname)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        info!(
            "Connected to PostgreSQL {}:{}/{} (schema {})",
            config.host, config.port, config.dbname, config.schema
        );
        Ok(Self::from_pool(pool, &config.schema, root_table))
    }

    pub fn from_pool(pool: PgPool, schema: &str, root_table: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            root_table: root_table.to_string(),
        }
    }

    fn row_to_changed(row: &PgRow) -> Result<ChangedRow> {
        Ok(ChangedRow::new(row.try_get("id")?, row.try_get("modified")?))
    }

    fn row_to_film_work(row: &PgRow) -> Result<FilmWork> {
        let Json(actors): Json<Vec<Person>> = row.try_get("actors")?;
        let Json(writers): Json<Vec<Person>> = row.try_get("writers")?;

        Ok(FilmWork {
            id: row.try_get("id")?,
            modified: row.try_get::<DateTime<Utc>, _>("modified")?,
            imdb_rating: row.try_get("imdb_rating")?,
            genre: row.try_get("genre")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            director: row.try_get("director")?,
            actors_names: row.try_get("actors_names")?,
            writers_names: row.try_get("writers_names")?,
            actors,
            writers,
        })
    }
}

/// `WHERE`-clause fragment for `bound`, numbering placeholders from `first`
///
/// Returns the fragment and the next free placeholder number.
fn bound_clause(bound: &ScanBound, modified: &str, id: &str, first: usize) -> (String, usize) {
    match bound {
        ScanBound::Unbounded => (String::new(), first),
        ScanBound::After(_) => (format!("{} > ${}", modified, first), first + 1),
        ScanBound::AfterRow(_) => (
            format!("({}, {}) > (${}, ${})", modified, id, first, first + 1),
            first + 2,
        ),
    }
}

pub(crate) fn changed_ids_sql(schema: &str, table: &str, bound: &ScanBound) -> String {
    let (clause, next) = bound_clause(bound, "modified", "id", 1);
    let filter = if clause.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clause)
    };
    format!(
        "SELECT id, modified FROM {schema}.{table}{filter} ORDER BY modified, id LIMIT ${next}"
    )
}

pub(crate) fn resolve_sql(schema: &str, root: &str, join: &JoinSpec, bound: &ScanBound) -> String {
    let (clause, next) = bound_clause(bound, "fw.modified", "fw.id", 2);
    let filter = if clause.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clause)
    };
    format!(
        "SELECT DISTINCT fw.id, fw.modified \
         FROM {schema}.{root} fw \
         JOIN {schema}.{join_table} j ON j.{fk} = fw.id \
         WHERE j.{column} = ANY($1){filter} \
         ORDER BY fw.modified, fw.id \
         LIMIT ${next}",
        join_table = join.table,
        fk = ROOT_FOREIGN_KEY,
        column = join.column,
    )
}

pub(crate) fn film_works_sql(schema: &str, root: &str) -> String {
    let names = |role: &str| {
        format!(
            "COALESCE(array_agg(DISTINCT p.full_name) \
             FILTER (WHERE pfw.role::text = '{role}' AND p.full_name IS NOT NULL), ARRAY[]::text[])"
        )
    };
    let persons = |role: &str| {
        format!(
            "COALESCE(jsonb_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name)) \
             FILTER (WHERE p.id IS NOT NULL AND pfw.role::text = '{role}'), '[]'::jsonb)"
        )
    };

    format!(
        "SELECT \
             fw.id, \
             fw.modified, \
             fw.rating::float8 AS imdb_rating, \
             fw.title, \
             fw.description, \
             {actors_names} AS actors_names, \
             {writers_names} AS writers_names, \
             {director} AS director, \
             COALESCE(array_agg(DISTINCT g.name) FILTER (WHERE g.name IS NOT NULL), ARRAY[]::text[]) AS genre, \
             {actors} AS actors, \
             {writers} AS writers \
         FROM {schema}.{root} fw \
         LEFT JOIN {schema}.{pfw} pfw ON pfw.{fk} = fw.id \
         LEFT JOIN {schema}.{person} p ON p.id = pfw.person_id \
         LEFT JOIN {schema}.{gfw} gfw ON gfw.{fk} = fw.id \
         LEFT JOIN {schema}.{genre} g ON g.id = gfw.genre_id \
         WHERE fw.id = ANY($1) \
         GROUP BY fw.id \
         ORDER BY fw.modified, fw.id",
        actors_names = names("actor"),
        writers_names = names("writer"),
        director = names("director"),
        actors = persons("actor"),
        writers = persons("writer"),
        pfw = PERSON_FILM_WORK_TABLE,
        person = PERSON_TABLE,
        gfw = GENRE_FILM_WORK_TABLE,
        genre = GENRE_TABLE,
        fk = ROOT_FOREIGN_KEY,
    )
}

fn bind_bound<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    bound: &ScanBound,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match *bound {
        ScanBound::Unbounded => query,
        ScanBound::After(ts) => query.bind(ts),
        ScanBound::AfterRow(row) => query.bind(row.modified).bind(row.id),
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl RelationalSource for PostgresSource {
    async fn changed_ids(
        &self,
        table: &str,
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>> {
        let sql = changed_ids_sql(&self.schema, table, bound);
        let rows = bind_bound(sqlx::query(&sql), bound)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_changed).collect()
    }

    async fn resolve_root_ids(
        &self,
        join: &JoinSpec,
        ids: &[Uuid],
        bound: &ScanBound,
        limit: usize,
    ) -> Result<Vec<ChangedRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = resolve_sql(&self.schema, &self.root_table, join, bound);
        let query = sqlx::query(&sql).bind(ids);
        let rows = bind_bound(query, bound)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_changed).collect()
    }

    async fn load_film_works(&self, ids: &[Uuid]) -> Result<Vec<FilmWork>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = film_works_sql(&self.schema, &self.root_table);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_film_work).collect()
    }
}
