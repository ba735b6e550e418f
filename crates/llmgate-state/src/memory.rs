use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{FAILURE_COUNTER_TTL_SECS, StateResult, StateStore};

struct Entry {
    value: u64,
    expires_at: Instant,
}

/// In-process `StateStore` for tests: identical TTL/fixed-window semantics
/// to `RedisStateStore`, without a live Redis instance. Expiry is lazy
/// (checked on read), matching how Redis itself only evicts on access or its
/// own background sweep.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_live(&self, key: &str) -> Option<u64> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: u64, ttl_seconds: u64) {
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + tokio::time::Duration::from_secs(ttl_seconds.max(1)),
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
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

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn is_blacklisted(&self, provider: &str) -> StateResult<bool> {
        Ok(self.get_live(&blacklist_key(provider)).await.is_some())
    }

    async fn blacklist(&self, provider: &str, ttl_seconds: u64) -> StateResult<()> {
        self.set(&blacklist_key(provider), 1, ttl_seconds).await;
        Ok(())
    }

    async fn increment_failure(&self, provider: &str) -> StateResult<u64> {
        let key = failures_key(provider);
        let next = self.get_live(&key).await.unwrap_or(0) + 1;
        self.set(&key, next, FAILURE_COUNTER_TTL_SECS).await;
        Ok(next)
    }

    async fn reset_failure(&self, provider: &str) -> StateResult<()> {
        self.remove(&failures_key(provider)).await;
        Ok(())
    }

    async fn check_rate_limit(&self, identifier: &str, max: u64, window_seconds: u64) -> StateResult<(bool, u64)> {
        let key = ratelimit_key(identifier);
        match self.get_live(&key).await {
            None => {
                self.set(&key, 1, window_seconds).await;
                Ok((true, max.saturating_sub(1)))
            }
            Some(count) if count >= max => Ok((false, 0)),
            Some(count) => {
                // Preserve remaining TTL by re-reading expiry rather than resetting the window.
                let remaining_ttl = {
                    let guard = self.entries.lock().await;
                    guard
                        .get(&key)
                        .map(|e| (e.expires_at - Instant::now()).as_secs().max(1))
                        .unwrap_or(window_seconds)
                };
                self.set(&key, count + 1, remaining_ttl).await;
                Ok((true, max.saturating_sub(count + 1)))
            }
        }
    }

    async fn acquire_slot(&self, resource: &str, max_slots: u64, ttl_seconds: u64) -> StateResult<bool> {
        let key = concurrency_key(resource);
        let current = self.get_live(&key).await.unwrap_or(0);
        if current >= max_slots {
            return Ok(false);
        }
        self.set(&key, current + 1, ttl_seconds).await;
        Ok(true)
    }

    async fn release_slot(&self, resource: &str) -> StateResult<()> {
        let key = concurrency_key(resource);
        if let Some(current) = self.get_live(&key).await
            && current > 0
        {
            // Slot release keeps whatever TTL remains; only the counter moves.
            let remaining_ttl = {
                let guard = self.entries.lock().await;
                guard.get(&key).map(|e| (e.expires_at - Instant::now()).as_secs().max(1)).unwrap_or(1)
            };
            self.set(&key, current - 1, remaining_ttl).await;
        }
        Ok(())
    }
}
