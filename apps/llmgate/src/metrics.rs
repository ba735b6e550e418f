//! Prometheus metrics recorder and `GET /metrics` rendering (spec.md §6,
//! SPEC_FULL.md §9 ambient addition).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global metrics recorder. Must run once at startup before any
/// `metrics::counter!`/`histogram!` call.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("failed to install prometheus recorder")
}

/// Requests received by route (counter, labels: route).
pub const REQUESTS_TOTAL: &str = "llmgate_requests_total";
/// Terminal errors surfaced to callers (counter, labels: error_code).
pub const ERRORS_TOTAL: &str = "llmgate_errors_total";
/// Request handling latency (histogram, labels: route).
pub const REQUEST_DURATION_SECONDS: &str = "llmgate_request_duration_seconds";

// Per-provider dispatch attempt/failure counters are recorded inside
// `llmgate-router` (`PROVIDER_ATTEMPTS_TOTAL`/`PROVIDER_FAILURES_TOTAL`) since
// that's where the candidate loop and `_mark_failed` actually live.
