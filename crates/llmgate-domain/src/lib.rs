//! Normalized request/response/error types for the chat-completion gateway,
//! plus the ingress validation performed once before a request reaches the
//! dispatcher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const MIN_MAX_TOKENS: u32 = 1;
pub const MAX_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ChatRequest {
    /// A pinned provider disables failover (spec.md §4.3): `provider` forces
    /// candidate iteration down to a single named adapter.
    pub fn pinned_provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }
}

/// Open bag of provider-specific metadata (token counts, timings, ...).
/// Consumers must treat unknown keys as opaque.
pub type ProviderMeta = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub provider_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub provider_meta: ProviderMeta,
}

/// Closed set of provider error codes (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimit,
    ServerError,
    Timeout,
    Unauthorized,
    Forbidden,
    BadRequest,
    InvalidResponse,
    InvalidProvider,
    ProviderUnavailable,
    AllProvidersFailed,
    GlobalTimeout,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InvalidResponse => "INVALID_RESPONSE",
            ErrorCode::InvalidProvider => "INVALID_PROVIDER",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::AllProvidersFailed => "ALL_PROVIDERS_FAILED",
            ErrorCode::GlobalTimeout => "GLOBAL_TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// HTTP status mapping from spec.md §6.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::RateLimit => 429,
            ErrorCode::Unauthorized | ErrorCode::Forbidden => 403,
            ErrorCode::InvalidProvider => 400,
            ErrorCode::AllProvidersFailed | ErrorCode::ProviderUnavailable => 503,
            ErrorCode::GlobalTimeout => 504,
            _ => 500,
        }
    }
}

/// A tagged provider failure. `retriable` is authoritative for router
/// behavior: it alone decides whether the router bumps failure counters.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{provider}] {code}: {message}", code = self.code.as_str())]
pub struct ProviderError {
    pub provider: String,
    pub code: ErrorCode,
    pub message: String,
    pub retriable: bool,
    pub cause: Option<String>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, code: ErrorCode, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            provider: provider.into(),
            code,
            message: message.into(),
            retriable,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Validation failure at request ingress. Not a `ProviderError` (spec.md
/// §4.5): surfaces as a 400-class client error outside the core.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("messages must not be empty")]
    EmptyMessages,
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("max_tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS}")]
    MaxTokensOutOfRange,
    #[error("temperature must be between {MIN_TEMPERATURE} and {MAX_TEMPERATURE}")]
    TemperatureOutOfRange,
}

/// Validates a `ChatRequest` at ingress, once, before it reaches the
/// dispatcher (spec.md §4.5). Role is a closed enum at the type level, so
/// there is nothing left to validate there beyond non-empty content.
pub fn validate_request(request: &ChatRequest) -> Result<(), ValidationError> {
    if request.messages.is_empty() {
        return Err(ValidationError::EmptyMessages);
    }
    if request.messages.iter().any(|m| m.content.is_empty()) {
        return Err(ValidationError::EmptyContent);
    }
    if request.max_tokens < MIN_MAX_TOKENS || request.max_tokens > MAX_MAX_TOKENS {
        return Err(ValidationError::MaxTokensOutOfRange);
    }
    if request.temperature < MIN_TEMPERATURE || request.temperature > MAX_TEMPERATURE {
        return Err(ValidationError::TemperatureOutOfRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message { role, content: content.to_string() }
    }

    fn base_request() -> ChatRequest {
        ChatRequest {
            messages: vec![msg(Role::User, "hi")],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
            model: None,
            provider: None,
            metadata: None,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate_request(&base_request()).is_ok());
    }

    #[test]
    fn rejects_empty_messages() {
        let mut req = base_request();
        req.messages.clear();
        assert_eq!(validate_request(&req), Err(ValidationError::EmptyMessages));
    }

    #[test]
    fn rejects_empty_content() {
        let mut req = base_request();
        req.messages.push(msg(Role::Assistant, ""));
        assert_eq!(validate_request(&req), Err(ValidationError::EmptyContent));
    }

    #[test]
    fn rejects_max_tokens_out_of_range() {
        let mut req = base_request();
        req.max_tokens = 0;
        assert_eq!(validate_request(&req), Err(ValidationError::MaxTokensOutOfRange));
        req.max_tokens = 4097;
        assert_eq!(validate_request(&req), Err(ValidationError::MaxTokensOutOfRange));
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        let mut req = base_request();
        req.temperature = -0.1;
        assert_eq!(validate_request(&req), Err(ValidationError::TemperatureOutOfRange));
        req.temperature = 2.1;
        assert_eq!(validate_request(&req), Err(ValidationError::TemperatureOutOfRange));
    }

    #[test]
    fn error_code_http_status_mapping() {
        assert_eq!(ErrorCode::RateLimit.http_status(), 429);
        assert_eq!(ErrorCode::Unauthorized.http_status(), 403);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::InvalidProvider.http_status(), 400);
        assert_eq!(ErrorCode::AllProvidersFailed.http_status(), 503);
        assert_eq!(ErrorCode::ProviderUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::GlobalTimeout.http_status(), 504);
        assert_eq!(ErrorCode::UnknownError.http_status(), 500);
    }
}
