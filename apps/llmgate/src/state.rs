//! Wires the four core crates into one `AppState` shared by every handler:
//! the provider registry, the Orchestrator, and the `StateStore` used
//! directly by `/health` (spec.md §6).

use std::collections::HashMap;
use std::sync::Arc;

use llmgate_core::Orchestrator;
use llmgate_providers::{GroqProvider, OllamaProvider, OpenRouterProvider, defaults};
use llmgate_router::{Router, RouterConfig};
use llmgate_state::{InMemoryStateStore, RedisStateStore, StateStore};

use crate::config::Config;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub state_store: Arc<dyn StateStore>,
    pub provider_names: Vec<String>,
    pub max_concurrent_streams: u64,
}

pub async fn build(config: &Config) -> anyhow::Result<AppState> {
    let state_store: Arc<dyn StateStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("connecting to redis state store");
            Arc::new(RedisStateStore::connect(url).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using in-memory state store (not shared across processes)");
            Arc::new(InMemoryStateStore::new())
        }
    };

    let providers = build_providers(config);
    let provider_names = providers.iter().map(|p| p.name().to_string()).collect();

    let router_config = RouterConfig {
        first_chunk_timeout: config.first_chunk_timeout(),
        backoff_base_seconds: config.backoff_base_seconds,
        backoff_max_seconds: config.backoff_max_seconds,
        default_rate_limit_per_minute: config.rate_limit_requests_per_minute,
        provider_rate_limits: config.provider_rate_limits(),
    };
    let router = Router::new(providers, state_store.clone(), router_config);
    let orchestrator = Orchestrator::new(router, config.max_operation_timeout());

    Ok(AppState {
        orchestrator,
        state_store,
        provider_names,
        max_concurrent_streams: config.max_concurrent_streams,
    })
}

fn build_providers(config: &Config) -> Vec<Arc<dyn llmgate_provider::UpstreamProvider>> {
    let client = reqwest::Client::new();
    let timeout = config.provider_timeout();
    let mut providers: Vec<Arc<dyn llmgate_provider::UpstreamProvider>> = Vec::new();

    if let Some(api_key) = config.groq_api_key.clone() {
        providers.push(Arc::new(GroqProvider::new(
            client.clone(),
            api_key,
            config.groq_base_url.clone().unwrap_or_else(|| defaults::GROQ_BASE_URL.to_string()),
            None,
            timeout,
        )));
    } else {
        tracing::warn!("GROQ_API_KEY not set; groq provider disabled");
    }

    if let Some(api_key) = config.openrouter_api_key.clone() {
        providers.push(Arc::new(OpenRouterProvider::new(
            client.clone(),
            api_key,
            config.openrouter_base_url.clone().unwrap_or_else(|| defaults::OPENROUTER_BASE_URL.to_string()),
            None,
            timeout,
        )));
    } else {
        tracing::warn!("OPENROUTER_API_KEY not set; openrouter provider disabled");
    }

    // Ollama is local-first and needs no key by default (spec.md §4.2).
    providers.push(Arc::new(OllamaProvider::new(
        client,
        config.ollama_api_key.clone(),
        config.ollama_base_url.clone().unwrap_or_else(|| defaults::OLLAMA_BASE_URL.to_string()),
        None,
        timeout,
    )));

    providers
}

/// `GET /health` providers map: every registered name to its current
/// blacklist status (spec.md §6), read straight from the state store.
pub async fn provider_health(state: &AppState) -> HashMap<String, &'static str> {
    let mut out = HashMap::new();
    for name in &state.provider_names {
        let blacklisted = state.state_store.is_blacklisted(name).await.unwrap_or(false);
        out.insert(name.clone(), if blacklisted { "blacklisted" } else { "available" });
    }
    out
}
