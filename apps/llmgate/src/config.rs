//! Configuration (spec.md §6): every field loaded once at startup via
//! `clap::Parser` with `env = "..."` attributes, into an immutable `Config`
//! consumed by `main` — no ambient singletons in the core (spec.md §9).

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

const PROVIDER_NAMES: [&str; 3] = ["groq", "openrouter", "ollama"];

#[derive(Debug, Clone, Parser)]
#[command(name = "llmgate", version, about = "LLM chat-completion gateway with failover and rate limiting")]
pub struct Config {
    /// "development", "production", ...; only affects log formatting defaults.
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// When absent, the in-memory state store is used instead of Redis
    /// (handy for local/dev runs; spec.md's ambient addition, §4.1).
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Shared bearer secret for `/chat` and `/stream`. Auth is skipped
    /// entirely when unset (spec.md §6).
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "PROVIDER_TIMEOUT", default_value_t = 30)]
    pub provider_timeout_seconds: u64,

    #[arg(long, env = "FIRST_CHUNK_TIMEOUT", default_value_t = 3)]
    pub first_chunk_timeout_seconds: u64,

    #[arg(long, env = "MAX_OPERATION_TIMEOUT", default_value_t = 120)]
    pub max_operation_timeout_seconds: u64,

    /// Reserved: unused by the core dispatcher (spec.md §6), kept for
    /// parity with the original configuration surface.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "BACKOFF_BASE_SECONDS", default_value_t = 5)]
    pub backoff_base_seconds: u64,

    #[arg(long, env = "BACKOFF_MAX_SECONDS", default_value_t = 300)]
    pub backoff_max_seconds: u64,

    #[arg(long, env = "RATE_LIMIT_REQUESTS_PER_MINUTE", default_value_t = 60)]
    pub rate_limit_requests_per_minute: u64,

    #[arg(long, env = "MAX_CONCURRENT_STREAMS", default_value_t = 10)]
    pub max_concurrent_streams: u64,

    #[arg(long, env = "GROQ_API_KEY")]
    pub groq_api_key: Option<String>,
    #[arg(long, env = "GROQ_BASE_URL")]
    pub groq_base_url: Option<String>,
    #[arg(long, env = "GROQ_RATE_LIMIT", default_value_t = 30)]
    pub groq_rate_limit: u64,

    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub openrouter_api_key: Option<String>,
    #[arg(long, env = "OPENROUTER_BASE_URL")]
    pub openrouter_base_url: Option<String>,
    #[arg(long, env = "OPENROUTER_RATE_LIMIT", default_value_t = 20)]
    pub openrouter_rate_limit: u64,

    #[arg(long, env = "OLLAMA_API_KEY")]
    pub ollama_api_key: Option<String>,
    #[arg(long, env = "OLLAMA_BASE_URL")]
    pub ollama_base_url: Option<String>,
    #[arg(long, env = "OLLAMA_RATE_LIMIT", default_value_t = 100)]
    pub ollama_rate_limit: u64,
}

impl Config {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn first_chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.first_chunk_timeout_seconds)
    }

    pub fn max_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.max_operation_timeout_seconds)
    }

    pub fn provider_rate_limits(&self) -> HashMap<String, u64> {
        HashMap::from([
            ("groq".to_string(), self.groq_rate_limit),
            ("openrouter".to_string(), self.openrouter_rate_limit),
            ("ollama".to_string(), self.ollama_rate_limit),
        ])
    }

    /// Known provider names, in priority order — the order the Router
    /// iterates candidates when no request pins a single provider.
    pub fn provider_names() -> &'static [&'static str] {
        &PROVIDER_NAMES
    }

    /// Parses CLI args/env, then blanks any optional string field set to the
    /// empty string — PaaS platforms routinely inject `FOO=` for an unset
    /// secret, and clap's `env` attribute treats that as `Some("")` rather
    /// than absent.
    pub fn load() -> Self {
        let mut config = Self::parse();
        for field in [
            &mut config.redis_url,
            &mut config.api_key,
            &mut config.groq_api_key,
            &mut config.groq_base_url,
            &mut config.openrouter_api_key,
            &mut config.openrouter_base_url,
            &mut config.ollama_api_key,
            &mut config.ollama_base_url,
        ] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        config
    }
}
