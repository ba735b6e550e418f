//! Small shared primitives used across the gateway crates.

/// Keys whose values must never be written verbatim into logs or traces.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["api_key", "authorization", "password", "token", "secret"];

/// True if `key` looks like it carries a credential (case-insensitive substring match).
///
/// Mirrors the original gateway's `sanitize_log_data`: callers use this to decide
/// whether a value is safe to attach to a `tracing` field.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Redacts `value` if `key` is sensitive, otherwise returns it unchanged.
pub fn redact_if_sensitive<'a>(key: &str, value: &'a str) -> &'a str {
    if is_sensitive_key(key) { "***REDACTED***" } else { value }
}
