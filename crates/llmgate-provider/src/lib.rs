//! The provider adapter contract (spec.md §4.2): a capability with two
//! operations, `generate` and `stream`, plus the shared HTTP-status /
//! transport-fault mapping policy every adapter uses to build
//! `ProviderError`s. Adapters must not consult the state store and must not
//! retry on their own — that policy lives entirely in the router.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use llmgate_domain::{ChatRequest, ChatResponse, ErrorCode, ProviderError};

/// One element of the unified chunk sequence: a decoded text fragment, or a
/// terminal provider fault. The channel closing without a trailing `Err`
/// is normal end-of-stream.
pub type ChunkResult = Result<String, ProviderError>;

/// Finite, non-restartable producer/consumer channel of decoded text
/// fragments, backpressured by the bounded `mpsc` channel capacity.
pub type ChunkStream = mpsc::Receiver<ChunkResult>;

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Stable provider identifier used in state-store keys and responses.
    fn name(&self) -> &str;

    /// Unary call: awaits a full response.
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Streaming call: returns a lazy, finite sequence of text fragments in
    /// emission order. Fails with a `ProviderError` before any element is
    /// produced if the upstream call cannot even be started.
    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ProviderError>;
}

/// Maps an upstream HTTP status code to a `ProviderError`, per the shared
/// policy in spec.md §4.2 item 4 (all three adapters funnel through this
/// instead of repeating the mapping, unlike the Python original where each
/// adapter inherited `_handle_http_error` from the same base class).
pub fn classify_http_status(provider: &str, status: u16, message: impl Into<String>) -> ProviderError {
    let message = message.into();
    match status {
        429 => ProviderError::new(provider, ErrorCode::RateLimit, message, true),
        500..=599 => ProviderError::new(provider, ErrorCode::ServerError, message, true),
        408 => ProviderError::new(provider, ErrorCode::Timeout, message, true),
        401 => ProviderError::new(provider, ErrorCode::Unauthorized, message, false),
        403 => ProviderError::new(provider, ErrorCode::Forbidden, message, false),
        400 => ProviderError::new(provider, ErrorCode::BadRequest, message, false),
        _ => ProviderError::new(provider, ErrorCode::UnknownError, message, false),
    }
}

/// Maps a transport-level fault (connect/read timeout, DNS, ...) to the
/// retriable `TIMEOUT` code; any other transport fault is `UNKNOWN_ERROR`
/// and non-retriable, per spec.md §4.2.
pub fn classify_transport_error(provider: &str, is_timeout: bool, message: impl Into<String>) -> ProviderError {
    let message = message.into();
    if is_timeout {
        ProviderError::new(provider, ErrorCode::Timeout, message, true)
    } else {
        ProviderError::new(provider, ErrorCode::UnknownError, message, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_spec() {
        assert_eq!(classify_http_status("groq", 429, "x").code, ErrorCode::RateLimit);
        assert!(classify_http_status("groq", 429, "x").retriable);
        assert_eq!(classify_http_status("groq", 503, "x").code, ErrorCode::ServerError);
        assert_eq!(classify_http_status("groq", 408, "x").code, ErrorCode::Timeout);
        assert_eq!(classify_http_status("groq", 401, "x").code, ErrorCode::Unauthorized);
        assert!(!classify_http_status("groq", 401, "x").retriable);
        assert_eq!(classify_http_status("groq", 403, "x").code, ErrorCode::Forbidden);
        assert_eq!(classify_http_status("groq", 400, "x").code, ErrorCode::BadRequest);
        assert_eq!(classify_http_status("groq", 418, "x").code, ErrorCode::UnknownError);
    }

    #[test]
    fn transport_timeout_is_retriable_unknown_is_not() {
        let timeout = classify_transport_error("groq", true, "connect timed out");
        assert_eq!(timeout.code, ErrorCode::Timeout);
        assert!(timeout.retriable);

        let other = classify_transport_error("groq", false, "connection reset");
        assert_eq!(other.code, ErrorCode::UnknownError);
        assert!(!other.retriable);
    }
}
