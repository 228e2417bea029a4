//! Redis-backed category store
//!
//! Bins are sorted sets scored by insertion time, payloads are `SETEX` keys.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;

use super::CategoryStore;
use crate::config::StoreConfig;
use crate::error::Result;

/// Redis connection pool wrapper
pub struct RedisCategoryStore {
    pool: Pool,
    url: String,
}

impl RedisCategoryStore {
    /// Build the pool and verify the server answers `PING`
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        let mut conn = pool.get().await.context("Failed to get Redis connection")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl CategoryStore for RedisCategoryStore {
    async fn add_to_bin(&self, bin: &str, priority: f64, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let added: usize = conn.zadd(bin, member, priority).await?;
        Ok(added > 0)
    }

    async fn range_bin(&self, bin: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrange(bin, 0, limit as isize - 1).await?;
        Ok(members)
    }

    async fn remove_from_bin(&self, bin: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.zrem(bin, member).await?;
        Ok(removed > 0)
    }

    async fn remove_from_bins(&self, bins: &[String], member: &str) -> Result<usize> {
        if bins.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for bin in bins {
            pipe.zrem(bin, member);
        }
        let removed: Vec<usize> = pipe.query_async(&mut *conn).await?;
        Ok(removed.into_iter().filter(|&n| n > 0).count())
    }

    async fn contains(&self, bin: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let score: Option<f64> = conn.zscore(bin, member).await?;
        Ok(score.is_some())
    }

    async fn bin_size(&self, bin: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let size: usize = conn.zcard(bin).await?;
        Ok(size)
    }

    async fn trim_oldest(&self, bin: &str, keep: usize) -> Result<usize> {
        let mut conn = self.conn().await?;
        // Ranks 0..=-(keep+1) are everything but the newest `keep`
        let stop = -(keep as isize) - 1;
        let removed: usize = conn.zremrangebyrank(bin, 0, stop).await?;
        Ok(removed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, payload, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }
}

impl std::fmt::Debug for RedisCategoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCategoryStore")
            .field("url", &self.url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> StoreConfig {
        StoreConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            pool_size: 2,
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_bin_round_trip() {
        let store = RedisCategoryStore::connect(&local_config()).await.unwrap();
        let bin = "TEST:SET_0";

        store.add_to_bin(bin, 2.0, "TEST:2").await.unwrap();
        store.add_to_bin(bin, 1.0, "TEST:1").await.unwrap();
        assert_eq!(store.range_bin(bin, 10).await.unwrap(), vec!["TEST:1", "TEST:2"]);
        assert_eq!(store.trim_oldest(bin, 1).await.unwrap(), 1);
        assert!(store.remove_from_bin(bin, "TEST:2").await.unwrap());
        assert_eq!(store.bin_size(bin).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_payload_ttl() {
        let store = RedisCategoryStore::connect(&local_config()).await.unwrap();
        store
            .set_with_ttl("TESTO:1", "{}", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get("TESTO:1").await.unwrap().as_deref(), Some("{}"));
        assert!(store.delete("TESTO:1").await.unwrap());
        assert!(store.health_check().await.unwrap());
    }
}
