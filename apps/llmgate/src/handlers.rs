//! `POST /chat`, `POST /stream`, `GET /health` (spec.md §6). Axum types never
//! cross into `llmgate-router`/`llmgate-core` — this module is the only place
//! that speaks HTTP.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use llmgate_domain::{ChatRequest, ErrorCode, ProviderError, validate_request};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::metrics as metric_names;
use crate::state::AppState;

const STREAMS_RESOURCE: &str = "streams";
const STREAM_SLOT_TTL_SECONDS: u64 = 300;

#[derive(Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    message: String,
    request_id: String,
}

fn error_response(err: &ProviderError, request_id: &str) -> Response {
    let status = axum::http::StatusCode::from_u16(err.code.http_status()).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = ErrorEnvelope { error: err.code.as_str(), message: err.message.clone(), request_id: request_id.to_string() };
    (status, Json(envelope)).into_response()
}

fn validation_error_response(err: llmgate_domain::ValidationError, request_id: &str) -> Response {
    let envelope = ErrorEnvelope { error: "BAD_REQUEST", message: err.to_string(), request_id: request_id.to_string() };
    (axum::http::StatusCode::BAD_REQUEST, Json(envelope)).into_response()
}

/// Logs inbound headers at debug level with credential-bearing values
/// redacted — `Authorization` above all, since the gateway's own bearer
/// secret passes through this same header.
fn log_request_headers(request_id: &str, headers: &HeaderMap) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let redacted: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), llmgate_common::redact_if_sensitive(name.as_str(), value).to_string()))
        })
        .collect();
    tracing::debug!(request_id = %request_id, headers = ?redacted, "inbound request headers");
}

/// `POST /chat` — unary completion. 200 with `ChatResponse` JSON, or the
/// `{error, message, request_id}` envelope per the status mapping in
/// spec.md §6.
pub async fn chat(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(request): Json<ChatRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    counter!(metric_names::REQUESTS_TOTAL, "route" => "chat").increment(1);
    log_request_headers(&request_id, &headers);

    if let Err(err) = validate_request(&request) {
        return validation_error_response(err, &request_id);
    }

    tracing::info!(request_id = %request_id, provider = ?request.provider, "dispatching chat request");

    let result = state.orchestrator.generate(&request).await;
    histogram!(metric_names::REQUEST_DURATION_SECONDS, "route" => "chat").record(started.elapsed().as_secs_f64());

    match result {
        Ok(response) => {
            tracing::info!(request_id = %request_id, provider = %response.provider_name, "chat request committed");
            Json(response).into_response()
        }
        Err(err) => {
            counter!(metric_names::ERRORS_TOTAL, "error_code" => err.code.as_str()).increment(1);
            tracing::warn!(request_id = %request_id, code = err.code.as_str(), message = %err.message, "chat request failed");
            error_response(&err, &request_id)
        }
    }
}

/// `POST /stream` — `text/event-stream` response. Each event is
/// `data: <chunk>\n\n`; the terminator is `data: [DONE]\n\n`; a mid-stream
/// failure is a trailing `data: {"error": ..., "message": ..., "request_id":
/// ...}\n\n` event rather than an abnormal HTTP termination (spec.md §6, §7).
pub async fn stream(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(request): Json<ChatRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    counter!(metric_names::REQUESTS_TOTAL, "route" => "stream").increment(1);
    log_request_headers(&request_id, &headers);

    if let Err(err) = validate_request(&request) {
        return validation_error_response(err, &request_id);
    }

    let slot_acquired = state
        .state_store
        .acquire_slot(STREAMS_RESOURCE, state.max_concurrent_streams, STREAM_SLOT_TTL_SECONDS)
        .await
        .unwrap_or(true);
    if !slot_acquired {
        let err = ProviderError::new("orchestrator", ErrorCode::ProviderUnavailable, "max concurrent streams reached", false);
        return error_response(&err, &request_id);
    }

    tracing::info!(request_id = %request_id, provider = ?request.provider, "dispatching stream request");

    let mut inner = match state.orchestrator.stream(&request).await {
        Ok(inner) => inner,
        Err(err) => {
            release_slot(state.clone());
            counter!(metric_names::ERRORS_TOTAL, "error_code" => err.code.as_str()).increment(1);
            return error_response(&err, &request_id);
        }
    };

    // Forward chunks on a detached task so the slot is released exactly
    // once the upstream sequence ends, however it ends (normal completion,
    // terminal error, or the client dropping the SSE receiver) — the
    // guaranteed-cleanup block spec.md §5 calls for.
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);
    tokio::spawn(async move {
        loop {
            match inner.recv().await {
                Some(Ok(text)) => {
                    if tx.send(Ok(Event::default().data(text))).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    counter!(metric_names::ERRORS_TOTAL, "error_code" => err.code.as_str()).increment(1);
                    tracing::warn!(request_id = %request_id, code = err.code.as_str(), "terminal stream error");
                    let event = Event::default()
                        .json_data(json!({"error": err.code.as_str(), "message": err.message, "request_id": request_id}))
                        .expect("error envelope serializes");
                    let _ = tx.send(Ok(event)).await;
                    break;
                }
                None => {
                    let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
                    break;
                }
            }
        }
        release_slot(state);
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /health` — `{status, version, providers: {name -> "available"|
/// "blacklisted"}}` (spec.md §6). Never touches any upstream.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let providers = crate::state::provider_health(&state).await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers,
    }))
    .into_response()
}

/// `GET /metrics` — Prometheus exposition.
pub async fn metrics_endpoint(State(handle): State<metrics_exporter_prometheus::PrometheusHandle>) -> String {
    handle.render()
}

fn release_slot(state: Arc<AppState>) {
    tokio::spawn(async move {
        let _ = state.state_store.release_slot(STREAMS_RESOURCE).await;
    });
}
