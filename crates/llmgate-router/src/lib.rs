//! The dispatcher (spec.md §4.3): candidate iteration over provider
//! priority, health/rate-limit gates, the first-chunk commit protocol with
//! mid-request failover, and the failure/blacklist bookkeeping that backs it.

mod backoff;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use llmgate_domain::{ChatRequest, ChatResponse, ErrorCode, ProviderError};
use llmgate_provider::{ChunkStream, UpstreamProvider};
use llmgate_state::{StateStore, check_provider_rate_limit};
use metrics::counter;
use tokio::sync::mpsc;

pub use backoff::backoff_ttl_seconds;

const RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// Dispatch attempts per provider (counter, labels: provider).
pub const PROVIDER_ATTEMPTS_TOTAL: &str = "llmgate_provider_attempts_total";
/// Failures counted toward a provider's failure budget (counter, labels: provider).
pub const PROVIDER_FAILURES_TOTAL: &str = "llmgate_provider_failures_total";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub first_chunk_timeout: Duration,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub default_rate_limit_per_minute: u64,
    pub provider_rate_limits: HashMap<String, u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            first_chunk_timeout: Duration::from_secs(3),
            backoff_base_seconds: 5,
            backoff_max_seconds: 300,
            default_rate_limit_per_minute: 60,
            provider_rate_limits: HashMap::new(),
        }
    }
}

pub struct Router {
    providers: Vec<Arc<dyn UpstreamProvider>>,
    state: Arc<dyn StateStore>,
    config: RouterConfig,
}

impl Router {
    pub fn new(providers: Vec<Arc<dyn UpstreamProvider>>, state: Arc<dyn StateStore>, config: RouterConfig) -> Self {
        Self { providers, state, config }
    }

    fn rate_limit_for(&self, provider: &str) -> u64 {
        self.config
            .provider_rate_limits
            .get(provider)
            .copied()
            .unwrap_or(self.config.default_rate_limit_per_minute)
    }

    async fn mark_failed(&self, provider: &str) {
        mark_failed_on(self.state.as_ref(), provider, self.config.backoff_base_seconds, self.config.backoff_max_seconds).await;
    }

    /// Resolves the ordered candidate list for one request. A pinned
    /// provider (spec.md §4.3) disables failover entirely: unknown name is
    /// an immediate `INVALID_PROVIDER`, a blacklisted pinned provider is an
    /// immediate `PROVIDER_UNAVAILABLE` with no fallback.
    async fn resolve_candidates(&self, request: &ChatRequest) -> Result<Vec<Arc<dyn UpstreamProvider>>, ProviderError> {
        match request.pinned_provider() {
            Some(name) => {
                let provider = self
                    .providers
                    .iter()
                    .find(|p| p.name() == name)
                    .ok_or_else(|| ProviderError::new("router", ErrorCode::InvalidProvider, format!("unknown provider: {name}"), false))?;

                let blacklisted = self.state.is_blacklisted(name).await.unwrap_or(false);
                if blacklisted {
                    return Err(ProviderError::new(name, ErrorCode::ProviderUnavailable, "provider is blacklisted", false));
                }
                Ok(vec![provider.clone()])
            }
            None => Ok(self.providers.clone()),
        }
    }

    /// Gate checks shared by both call shapes: blacklist presence, then the
    /// provider's fixed-window rate limit. Returns `Ok(true)` to proceed,
    /// `Ok(false)` to skip (with `last_error` already updated by the
    /// caller), or an error only in the rate-limit case (remembered, not
    /// raised, per spec.md §4.3 step 2).
    async fn gate(&self, provider: &str) -> GateOutcome {
        if self.state.is_blacklisted(provider).await.unwrap_or(false) {
            return GateOutcome::Skip(None);
        }

        let max = self.rate_limit_for(provider);
        match check_provider_rate_limit(self.state.as_ref(), provider, max, RATE_LIMIT_WINDOW_SECONDS).await {
            Ok((true, _remaining)) => GateOutcome::Proceed,
            Ok((false, _)) => GateOutcome::Skip(Some(ProviderError::new(
                provider,
                ErrorCode::RateLimit,
                format!("rate limit of {max} req/min exceeded"),
                true,
            ))),
            Err(_) => GateOutcome::Proceed,
        }
    }

    /// Unary dispatch (spec.md §4.3).
    pub async fn choose_and_generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let candidates = self.resolve_candidates(request).await?;
        let mut last_error: Option<ProviderError> = None;

        for provider in candidates {
            let name = provider.name().to_string();

            match self.gate(&name).await {
                GateOutcome::Skip(err) => {
                    if let Some(err) = err {
                        last_error = Some(err);
                    }
                    continue;
                }
                GateOutcome::Proceed => {}
            }

            counter!(PROVIDER_ATTEMPTS_TOTAL, "provider" => name.clone()).increment(1);
            match provider.generate(request).await {
                Ok(response) => {
                    let _ = self.state.reset_failure(&name).await;
                    return Ok(response);
                }
                Err(err) => {
                    if err.retriable {
                        self.mark_failed(&name).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(all_providers_failed(last_error))
    }

    /// Streaming dispatch with the first-chunk commit protocol (spec.md
    /// §4.3). Once a provider's first chunk has been read within
    /// `first_chunk_timeout`, that provider is committed: everything after
    /// is forwarded verbatim and no other candidate is ever tried for this
    /// request (P4).
    pub async fn choose_and_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ProviderError> {
        let candidates = self.resolve_candidates(request).await?;
        let mut last_error: Option<ProviderError> = None;

        for provider in candidates {
            let name = provider.name().to_string();

            match self.gate(&name).await {
                GateOutcome::Skip(err) => {
                    if let Some(err) = err {
                        last_error = Some(err);
                    }
                    continue;
                }
                GateOutcome::Proceed => {}
            }

            counter!(PROVIDER_ATTEMPTS_TOTAL, "provider" => name.clone()).increment(1);
            let mut upstream = match provider.stream(request).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    if err.retriable {
                        self.mark_failed(&name).await;
                    }
                    last_error = Some(err);
                    continue;
                }
            };

            match tokio::time::timeout(self.config.first_chunk_timeout, upstream.recv()).await {
                Ok(Some(Ok(first_chunk))) => {
                    return Ok(self.commit(name, first_chunk, upstream));
                }
                Ok(Some(Err(err))) => {
                    // Failed before first chunk: recoverable, try next candidate.
                    if err.retriable {
                        self.mark_failed(&name).await;
                    }
                    last_error = Some(err);
                }
                Ok(None) => {
                    // Upstream ended with zero elements: same handling as a timeout.
                    tracing::warn!(provider = %name, "stream ended with no chunks before first-chunk timeout");
                    self.mark_failed(&name).await;
                    last_error = Some(ProviderError::new(&name, ErrorCode::Timeout, "stream produced no chunks", true));
                }
                Err(_elapsed) => {
                    tracing::warn!(provider = %name, timeout = ?self.config.first_chunk_timeout, "first-chunk timeout");
                    self.mark_failed(&name).await;
                    last_error = Some(ProviderError::new(&name, ErrorCode::Timeout, "first-chunk timeout", true));
                    // Dropping `upstream` here closes the adapter's send side.
                }
            }
        }

        Err(all_providers_failed(last_error))
    }

    /// Binds the request to `provider` for the rest of its lifetime: spawns
    /// a forwarding task that relays every subsequent chunk, then resolves
    /// the failure/success bookkeeping once the upstream sequence ends.
    fn commit(&self, provider: String, first_chunk: String, mut upstream: ChunkStream) -> ChunkStream {
        let (tx, rx) = mpsc::channel(32);
        let state = self.state.clone();
        let backoff_base = self.config.backoff_base_seconds;
        let backoff_max = self.config.backoff_max_seconds;

        tokio::spawn(async move {
            if tx.send(Ok(first_chunk)).await.is_err() {
                return;
            }

            let mut outcome = StreamOutcome::NormalEnd;
            loop {
                match upstream.recv().await {
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        outcome = if err.retriable { StreamOutcome::RetriableFailure } else { StreamOutcome::NonRetriableFailure };
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                    None => break,
                }
            }

            // Only a clean drain resets the failure counter (spec.md §4.3
            // invariant 2); a non-retriable post-commit error leaves it
            // untouched, matching the original `router.py`'s
            // `_mark_provider_success` only firing after a normal drain.
            match outcome {
                StreamOutcome::NormalEnd => {
                    let _ = state.reset_failure(&provider).await;
                }
                StreamOutcome::RetriableFailure => {
                    mark_failed_on(state.as_ref(), &provider, backoff_base, backoff_max).await;
                }
                StreamOutcome::NonRetriableFailure => {}
            }
        });

        rx
    }
}

enum GateOutcome {
    Proceed,
    Skip(Option<ProviderError>),
}

enum StreamOutcome {
    NormalEnd,
    RetriableFailure,
    NonRetriableFailure,
}

fn all_providers_failed(last_error: Option<ProviderError>) -> ProviderError {
    let message = match last_error {
        Some(err) => format!("all providers failed. last error: {err}"),
        None => "all providers failed".to_string(),
    };
    ProviderError::new("router", ErrorCode::AllProvidersFailed, message, false)
}

async fn mark_failed_on(state: &dyn StateStore, provider: &str, backoff_base: u64, backoff_max: u64) {
    counter!(PROVIDER_FAILURES_TOTAL, "provider" => provider.to_string()).increment(1);
    let Ok(count) = state.increment_failure(provider).await else {
        tracing::warn!(provider, "failed to increment failure counter");
        return;
    };
    let ttl = backoff_ttl_seconds(count, backoff_base, backoff_max);
    if state.blacklist(provider, ttl).await.is_err() {
        tracing::warn!(provider, "failed to set blacklist key");
    } else {
        tracing::warn!(provider, failures = count, blacklist_ttl_seconds = ttl, "provider marked failed");
    }
}

#[cfg(test)]
mod tests;
