//! Runtime configuration
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults
//! 2. YAML file (`--config`, must declare `version: 1`)
//! 3. Environment variables (`DB_*`, `REDIS_*`, `ES_*`, `SYNC_INTERVAL_MS`,
//!    `WATERMARK_SCOPE`), including those loaded from `.env`
//!
//! ```yaml
//! version: 1
//! postgres:
//!   dbname: movies_database
//!   user: app
//! sync:
//!   chunk_size: 100
//!   watermark_scope: per_table
//! retry:
//!   max_attempts: 5
//! ```

mod error;

pub use error::{ConfigError, ConfigResult};

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use movies_etl_state::RedisStateStore;
use serde::{Deserialize, Serialize};

use crate::domain::{default_tables, EntityTableSpec};
use crate::retry::RetryPolicy;
use crate::watermark::WatermarkScope;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

pub const MAX_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtlConfig {
    /// Required in YAML files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub sync: SyncSettings,
    pub retry: RetryPolicy,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            version: Some(1),
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            elasticsearch: ElasticsearchConfig::default(),
            sync: SyncSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Schema qualifying every table name
    pub schema: String,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            schema: "content".to_string(),
            max_connections: 1,
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        RedisStateStore::url(&self.host, self.port, self.db)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub port: u16,
    pub index: String,
    /// Create the index with bundled settings when it is missing
    pub create_index: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9200,
            index: "movies".to_string(),
            create_index: true,
        }
    }
}

impl ElasticsearchConfig {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Page size for every stage
    pub chunk_size: usize,
    /// Pause between ticks
    pub tick_interval_ms: u64,
    pub watermark_scope: WatermarkScope,
    /// Visiting order; the root table comes first
    pub tables: Vec<EntityTableSpec>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            tick_interval_ms: 2_000,
            watermark_scope: WatermarkScope::Shared,
            tables: default_tables(),
        }
    }
}

impl SyncSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn root_table(&self) -> Option<&EntityTableSpec> {
        self.tables.iter().find(|t| t.is_root())
    }
}

impl EtlConfig {
    /// Parse a YAML document; `version` is mandatory
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: EtlConfig = serde_yaml::from_str(content)?;
        let version = config.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Defaults or YAML file, then process environment, then validation
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from variables returned by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DB_HOST") {
            self.postgres.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.postgres.port = parse_env("DB_PORT", &v)?;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.postgres.dbname = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.postgres.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.postgres.password = v;
        }
        if let Some(v) = lookup("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Some(v) = lookup("REDIS_PORT") {
            self.redis.port = parse_env("REDIS_PORT", &v)?;
        }
        if let Some(v) = lookup("ES_HOST") {
            self.elasticsearch.host = v;
        }
        if let Some(v) = lookup("ES_PORT") {
            self.elasticsearch.port = parse_env("ES_PORT", &v)?;
        }
        if let Some(v) = lookup("ES_INDEX") {
            self.elasticsearch.index = v;
        }
        if let Some(v) = lookup("SYNC_INTERVAL_MS") {
            self.sync.tick_interval_ms = parse_env("SYNC_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("WATERMARK_SCOPE") {
            self.sync.watermark_scope = v.parse().map_err(|e: ConfigError| {
                ConfigError::InvalidEnv {
                    key: "WATERMARK_SCOPE".to_string(),
                    value: v.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_identifier("postgres.schema", &self.postgres.schema)?;
        if self.postgres.max_connections == 0 {
            return Err(ConfigError::invalid(
                "postgres.max_connections",
                "must be at least 1",
            ));
        }

        let index = &self.elasticsearch.index;
        if index.is_empty() || index.chars().any(|c| c.is_ascii_uppercase() || c.is_whitespace()) {
            return Err(ConfigError::invalid(
                "elasticsearch.index",
                format!("'{}' is not a valid index name", index),
            ));
        }

        let sync = &self.sync;
        if !(1..=MAX_CHUNK_SIZE).contains(&sync.chunk_size) {
            return Err(ConfigError::invalid(
                "sync.chunk_size",
                format!("must be between 1 and {}, got {}", MAX_CHUNK_SIZE, sync.chunk_size),
            ));
        }

        let first = sync
            .tables
            .first()
            .ok_or_else(|| ConfigError::invalid("sync.tables", "at least one table is required"))?;
        if !first.is_root() {
            return Err(ConfigError::invalid(
                "sync.tables",
                format!("first table '{}' must be the root (no join)", first.name),
            ));
        }
        let roots = sync.tables.iter().filter(|t| t.is_root()).count();
        if roots != 1 {
            return Err(ConfigError::invalid(
                "sync.tables",
                format!("exactly one root table expected, found {}", roots),
            ));
        }

        for (i, table) in sync.tables.iter().enumerate() {
            check_identifier(&format!("sync.tables[{}].name", i), &table.name)?;
            if let Some(join) = &table.join {
                check_identifier(&format!("sync.tables[{}].join.table", i), &join.table)?;
                check_identifier(&format!("sync.tables[{}].join.column", i), &join.column)?;
            }
        }
        if let Some(dup) = sync
            .tables
            .iter()
            .enumerate()
            .find(|(i, t)| sync.tables[..*i].iter().any(|o| o.name == t.name))
        {
            return Err(ConfigError::invalid(
                "sync.tables",
                format!("table '{}' listed twice", dup.1.name),
            ));
        }

        self.retry.validate()
    }
}

fn parse_env<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Names are spliced into SQL, so only plain identifiers are accepted
fn check_identifier(field: &str, value: &str) -> ConfigResult<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("'{}' is not a plain SQL identifier", value),
        ))
    }
}
