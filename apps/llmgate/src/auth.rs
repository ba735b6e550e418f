//! Bearer-token auth middleware (spec.md §6): a single shared secret from
//! config. Skipped entirely when unset; otherwise every request must carry
//! `Authorization: Bearer <secret>`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use serde_json::json;

#[derive(Clone)]
pub struct AuthConfig {
    pub api_key: Option<Arc<String>>,
}

pub async fn require_bearer_token(
    State(auth): State<AuthConfig>,
    headers: HeaderMap,
    request: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = auth.api_key.as_deref() else {
        return next.run(request).await;
    };

    match extract_bearer(&headers) {
        Ok(token) if token == expected.as_str() => next.run(request).await,
        Ok(_) => unauthorized("invalid"),
        Err(reason) => unauthorized(reason),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, &'static str> {
    let raw = headers.get(axum::http::header::AUTHORIZATION).ok_or("missing")?;
    let raw = raw.to_str().map_err(|_| "bad format")?;
    raw.strip_prefix("Bearer ").ok_or("bad format")
}

fn unauthorized(message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "UNAUTHORIZED", "message": message}))).into_response()
}
