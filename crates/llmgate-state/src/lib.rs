//! Shared, cross-process state store (spec.md §4.1): blacklist, consecutive
//! failure counters, fixed-window rate limits and an optional concurrency
//! semaphore, all TTL-bounded.
//!
//! All operations are idempotent under retry except `acquire_slot` /
//! `release_slot`, which are paired. The store gives no retry of its own —
//! callers surface `StateStoreError` on transient unavailability.

mod memory;
mod redis_store;

use async_trait::async_trait;

pub use memory::InMemoryStateStore;
pub use redis_store::RedisStateStore;

/// 300s inactivity TTL on the consecutive-failure counter (spec.md §3).
pub const FAILURE_COUNTER_TTL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("state store backend error: {0}")]
    Backend(String),
}

pub type StateResult<T> = Result<T, StateStoreError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// True iff `blacklist:{provider}` is present. Read-only.
    async fn is_blacklisted(&self, provider: &str) -> StateResult<bool>;

    /// Overwrites any existing `blacklist:{provider}` value with a fresh TTL.
    async fn blacklist(&self, provider: &str, ttl_seconds: u64) -> StateResult<()>;

    /// Atomically increments `failures:{provider}`, refreshing its 300s
    /// inactivity TTL, and returns the new count.
    async fn increment_failure(&self, provider: &str) -> StateResult<u64>;

    /// Deletes `failures:{provider}`.
    async fn reset_failure(&self, provider: &str) -> StateResult<()>;

    /// Fixed-window rate check/increment keyed by an opaque identifier
    /// (e.g. `"provider:<name>"` or `"user:<id>"` — see
    /// `check_provider_rate_limit` for the provider-scoped namespace).
    ///
    /// If the key is absent, creates it with value 1 and TTL = window and
    /// allows. If present and `>= max`, rejects without mutation. Otherwise
    /// increments and allows. This is a soft cap: concurrent callers against
    /// an empty key may both observe "absent" and both pass (spec.md §5).
    async fn check_rate_limit(
        &self,
        identifier: &str,
        max: u64,
        window_seconds: u64,
    ) -> StateResult<(bool, u64)>;

    /// Non-blocking semaphore: succeeds iff the current count for `resource`
    /// is below `max_slots`, in which case it increments and (re)sets a
    /// safety TTL so a crashed acquirer cannot leak the slot forever.
    async fn acquire_slot(&self, resource: &str, max_slots: u64, ttl_seconds: u64) -> StateResult<bool>;

    /// Decrements the slot counter for `resource`, floored at zero.
    async fn release_slot(&self, resource: &str) -> StateResult<()>;
}

/// Namespaces a provider-scoped rate-limit identifier so it cannot collide
/// with user-scoped identifiers sharing the same `ratelimit:` prefix
/// (spec.md §9 open question). `request_id` is advisory only, used for
/// logging by callers — the effective key is per-provider.
pub fn provider_rate_limit_identifier(provider: &str) -> String {
    format!("provider:{provider}")
}

/// Convenience wrapper matching spec.md's `check_provider_rate_limit` name;
/// thin enough to stay a free function rather than a trait method so the
/// trait itself only needs the one generic rate-limit primitive.
pub async fn check_provider_rate_limit(
    store: &dyn StateStore,
    provider: &str,
    max: u64,
    window_seconds: u64,
) -> StateResult<(bool, u64)> {
    store
        .check_rate_limit(&provider_rate_limit_identifier(provider), max, window_seconds)
        .await
}
