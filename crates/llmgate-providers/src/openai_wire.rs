//! Wire-level helpers shared by the OpenAI-compatible adapters (Groq,
//! OpenRouter): payload construction, SSE framing, and the unary response
//! shape. Each adapter supplies only its base URL, headers, and default
//! model.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use llmgate_domain::{ChatResponse, ErrorCode, ProviderError};
use llmgate_provider::{ChunkStream, classify_http_status, classify_transport_error};
use reqwest::{Client, header::HeaderMap};
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::line_buffer::LineBuffer;

pub fn build_payload(
    messages: &[llmgate_domain::Message],
    model: &str,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
) -> Json {
    let messages: Vec<Json> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": serde_json::to_value(m.role).unwrap(),
                "content": m.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "stream": stream,
    })
}

/// A single SSE `data: ` payload, already stripped of framing.
enum SseEvent {
    Content(String),
    Done,
    Ignored,
}

fn parse_sse_line(provider: &str, line: &str) -> SseEvent {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Ignored;
    }
    let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return SseEvent::Ignored;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<Json>(payload) {
        Ok(data) => {
            let content = data
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(Json::as_str)
                .unwrap_or("");
            if content.is_empty() {
                SseEvent::Ignored
            } else {
                SseEvent::Content(content.to_string())
            }
        }
        Err(err) => {
            tracing::warn!(provider, payload, error = %err, "could not parse SSE chunk, skipping");
            SseEvent::Ignored
        }
    }
}

pub async fn generate(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    payload: Json,
    timeout: Duration,
    provider: &str,
    fallback_model: &str,
) -> Result<ChatResponse, ProviderError> {
    let response = client
        .post(url)
        .headers(headers)
        .json(&payload)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_reqwest_error(provider, &e))?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_http_status(provider, status, body));
    }

    let data: Json = response
        .json()
        .await
        .map_err(|e| ProviderError::new(provider, ErrorCode::InvalidResponse, e.to_string(), false))?;

    let text = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Json::as_str);

    let Some(text) = text else {
        return Err(ProviderError::new(
            provider,
            ErrorCode::InvalidResponse,
            "response did not contain choices[0].message.content",
            false,
        ));
    };

    let model_used = data.get("model").and_then(Json::as_str).unwrap_or(fallback_model).to_string();

    let usage = data.get("usage").cloned().unwrap_or_else(|| serde_json::json!({}));
    let mut provider_meta = std::collections::HashMap::new();
    provider_meta.insert("model".to_string(), Json::String(model_used.clone()));
    provider_meta.insert(
        "tokens_prompt".to_string(),
        usage.get("prompt_tokens").cloned().unwrap_or(Json::from(0)),
    );
    provider_meta.insert(
        "tokens_completion".to_string(),
        usage.get("completion_tokens").cloned().unwrap_or(Json::from(0)),
    );
    provider_meta.insert(
        "tokens_total".to_string(),
        usage.get("total_tokens").cloned().unwrap_or(Json::from(0)),
    );
    if let Some(v) = usage.get("native_tokens_prompt") {
        provider_meta.insert("native_tokens_prompt".to_string(), v.clone());
    }
    if let Some(v) = usage.get("native_tokens_completion") {
        provider_meta.insert("native_tokens_completion".to_string(), v.clone());
    }

    Ok(ChatResponse {
        text: text.to_string(),
        provider_name: provider.to_string(),
        model: Some(model_used),
        provider_meta,
    })
}

pub async fn stream(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    payload: Json,
    timeout: Duration,
    provider: &str,
) -> Result<ChunkStream, ProviderError> {
    let response = client
        .post(url)
        .headers(headers)
        .json(&payload)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_reqwest_error(provider, &e))?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_http_status(provider, status, body));
    }

    let (tx, rx) = mpsc::channel(32);
    let provider_owned = provider.to_string();

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::new();

        loop {
            let next = body.next().await;
            match next {
                Some(Ok(bytes)) => {
                    if !feed_lines(&provider_owned, &tx, &mut buffer, &bytes).await {
                        return;
                    }
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(map_reqwest_error(&provider_owned, &err))).await;
                    return;
                }
                None => return,
            }
        }
    });

    Ok(rx)
}

/// Feeds one network chunk into the line buffer and forwards decoded
/// content. Returns `false` if the stream should stop (DONE marker seen, or
/// the receiver was dropped).
async fn feed_lines(
    provider: &str,
    tx: &mpsc::Sender<Result<String, ProviderError>>,
    buffer: &mut LineBuffer,
    bytes: &Bytes,
) -> bool {
    for line in buffer.feed(bytes) {
        match parse_sse_line(provider, &line) {
            SseEvent::Content(text) => {
                if tx.send(Ok(text)).await.is_err() {
                    return false;
                }
            }
            SseEvent::Done => return false,
            SseEvent::Ignored => {}
        }
    }
    true
}

fn map_reqwest_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    classify_transport_error(provider, err.is_timeout(), err.to_string())
}
