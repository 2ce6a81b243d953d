use anyhow::{Context, Result};
use redis::{aio::MultiplexedConnection, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::CacheSettings;

/// Key/TTL cache backed by redis.
///
/// Holds robots rules (tier two of the politeness cache) and serialized
/// search responses. Values are stored as JSON with a per-key expiry.
pub struct TtlCache {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl TtlCache {
    pub async fn connect(config: &CacheSettings) -> Result<Self> {
        let client = Client::open(config.redis_url.clone())
            .context(format!("Failed to open redis client at {}", config.redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get redis connection")?;

        debug!("Connected to redis cache");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fetch and deserialize a cached value; `None` on miss or expiry
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.lock().await;

        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .context("Failed to read cache key")?;

        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .context(format!("Failed to deserialize cached value for {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and store a value under `key` with a TTL in seconds
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value).context("Failed to serialize cache value")?;

        let mut conn = self.conn.lock().await;

        redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to write cache key")?;

        debug!("Cached {} for {}s", key, ttl_secs);

        Ok(())
    }
}
