//! Redis adapter for StateStore
//!
//! Plain `GET`/`SET` on string keys through a small bb8 pool. Values are
//! stored as-is so the keys stay readable with `redis-cli`.

use async_trait::async_trait;
use bb8_redis::bb8::Pool;
use bb8_redis::redis::AsyncCommands;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::info;

use crate::domain::StateStore;
use crate::{Result, StorageError};

/// Redis-backed state store
#[derive(Clone)]
pub struct RedisStateStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStateStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `url` - Redis URL, e.g. `redis://127.0.0.1:6379/0`
    pub async fn connect(url: &str) -> Result<Self> {
        let manager = RedisConnectionManager::new(url)
            .map_err(|e| StorageError::config(format!("Invalid Redis URL {}: {}", url, e)))?;

        let pool = Pool::builder()
            .max_size(2)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .await?;

        info!("Connected to Redis state store at {}", url);

        Ok(Self { pool })
    }

    /// Build the conventional URL from host, port and database number
    pub fn url(host: &str, port: u16, db: u32) -> String {
        format!("redis://{}:{}/{}", host, port, db)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        assert_eq!(
            RedisStateStore::url("127.0.0.1", 6379, 0),
            "redis://127.0.0.1:6379/0"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = match RedisStateStore::connect("not a url").await {
            Ok(_) => panic!("expected invalid URL to be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind, crate::ErrorKind::Config);
    }
}
