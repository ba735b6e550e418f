use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{FAILURE_COUNTER_TTL_SECS, StateResult, StateStore, StateStoreError};

/// Production `StateStore` backed by Redis, via a `ConnectionManager` that
/// transparently reconnects on transport drops.
pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str) -> StateResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| StateStoreError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StateStoreError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    fn blacklist_key(provider: &str) -> String {
        format!("blacklist:{provider}")
    }

    fn failures_key(provider: &str) -> String {
        format!("failures:{provider}")
    }

    fn ratelimit_key(identifier: &str) -> String {
        format!("ratelimit:{identifier}")
    }

    fn concurrency_key(resource: &str) -> String {
        format!("concurrency:{resource}")
    }
}

fn backend_err(e: redis::RedisError) -> StateStoreError {
    StateStoreError::Backend(e.to_string())
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn is_blacklisted(&self, provider: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::blacklist_key(provider)).await.map_err(backend_err)?;
        Ok(exists)
    }

    async fn blacklist(&self, provider: &str, ttl_seconds: u64) -> StateResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::blacklist_key(provider), "1", ttl_seconds.max(1))
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn increment_failure(&self, provider: &str) -> StateResult<u64> {
        let mut conn = self.conn.clone();
        let key = Self::failures_key(provider);
        let count: u64 = conn.incr(&key, 1).await.map_err(backend_err)?;
        let _: () = conn
            .expire(&key, FAILURE_COUNTER_TTL_SECS as i64)
            .await
            .map_err(backend_err)?;
        Ok(count)
    }

    async fn reset_failure(&self, provider: &str) -> StateResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::failures_key(provider)).await.map_err(backend_err)?;
        Ok(())
    }

    async fn check_rate_limit(&self, identifier: &str, max: u64, window_seconds: u64) -> StateResult<(bool, u64)> {
        let mut conn = self.conn.clone();
        let key = Self::ratelimit_key(identifier);

        let current: Option<u64> = conn.get(&key).await.map_err(backend_err)?;
        match current {
            None => {
                let _: () = conn.set_ex(&key, 1u64, window_seconds.max(1)).await.map_err(backend_err)?;
                Ok((true, max.saturating_sub(1)))
            }
            Some(count) if count >= max => Ok((false, 0)),
            Some(count) => {
                let new_count: u64 = conn.incr(&key, 1).await.map_err(backend_err)?;
                Ok((true, max.saturating_sub(new_count.max(count + 1))))
            }
        }
    }

    async fn acquire_slot(&self, resource: &str, max_slots: u64, ttl_seconds: u64) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        let key = Self::concurrency_key(resource);

        let current: Option<u64> = conn.get(&key).await.map_err(backend_err)?;
        let current = current.unwrap_or(0);
        if current >= max_slots {
            return Ok(false);
        }
        let _: u64 = conn.incr(&key, 1).await.map_err(backend_err)?;
        let _: () = conn.expire(&key, ttl_seconds as i64).await.map_err(backend_err)?;
        Ok(true)
    }

    async fn release_slot(&self, resource: &str) -> StateResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::concurrency_key(resource);
        let current: Option<i64> = conn.get(&key).await.map_err(backend_err)?;
        if let Some(current) = current
            && current > 0
        {
            let _: () = conn.decr(&key, 1).await.map_err(backend_err)?;
        }
        Ok(())
    }
}
