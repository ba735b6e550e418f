use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use llmgate_domain::{ChatRequest, ChatResponse, ErrorCode, Message, ProviderError, Role};
use llmgate_provider::{ChunkStream, UpstreamProvider, classify_http_status, classify_transport_error};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::line_buffer::LineBuffer;

pub const DEFAULT_MODEL: &str = "llama3.2:1b";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: String, default_model: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            base_url,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout,
        }
    }

    /// Ollama local instances do not require auth by default; only attach
    /// one if the operator configured an `ollama_api_key` (spec.md §6).
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers
    }

    fn messages_to_prompt(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_payload(&self, request: &ChatRequest, model: &str, stream: bool) -> Json {
        serde_json::json!({
            "model": model,
            "prompt": Self::messages_to_prompt(&request.messages),
            "stream": stream,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": request.temperature,
            },
        })
    }
}

#[async_trait]
impl UpstreamProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = self.build_payload(request, model, false);
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(self.name(), &e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.name(), status, body));
        }

        let data: Json = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ErrorCode::InvalidResponse, e.to_string(), false))?;

        let Some(text) = data.get("response").and_then(Json::as_str) else {
            return Err(ProviderError::new(
                self.name(),
                ErrorCode::InvalidResponse,
                "response did not contain 'response'",
                false,
            ));
        };

        let model_used = data.get("model").and_then(Json::as_str).unwrap_or(&self.default_model).to_string();

        let mut provider_meta = std::collections::HashMap::new();
        provider_meta.insert("model".to_string(), Json::String(model_used.clone()));
        for key in ["total_duration", "load_duration", "prompt_eval_count", "eval_count", "done"] {
            if let Some(v) = data.get(key) {
                provider_meta.insert(key.to_string(), v.clone());
            }
        }

        Ok(ChatResponse {
            text: text.to_string(),
            provider_name: self.name().to_string(),
            model: Some(model_used),
            provider_meta,
        })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = self.build_payload(request, model, true);
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(self.name(), &e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.name(), status, body));
        }

        let (tx, rx) = mpsc::channel(32);
        let provider = self.name().to_string();

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = LineBuffer::new();

            loop {
                match body.next().await {
                    Some(Ok(bytes)) => {
                        if !feed_lines(&provider, &tx, &mut buffer, &bytes).await {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = tx.send(Err(map_reqwest_error(&provider, &err))).await;
                        return;
                    }
                    None => return,
                }
            }
        });

        Ok(rx)
    }
}

/// Feeds one network chunk into the JSONL line buffer. Each complete line is
/// a standalone JSON object (spec.md §4.2 item 3): emit `response` when
/// non-empty, stop when `done: true`.
async fn feed_lines(
    provider: &str,
    tx: &mpsc::Sender<Result<String, ProviderError>>,
    buffer: &mut LineBuffer,
    bytes: &Bytes,
) -> bool {
    for line in buffer.feed(bytes) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Json>(line) {
            Ok(data) => {
                let content = data.get("response").and_then(Json::as_str).unwrap_or("");
                if !content.is_empty() && tx.send(Ok(content.to_string())).await.is_err() {
                    return false;
                }
                if data.get("done").and_then(Json::as_bool).unwrap_or(false) {
                    return false;
                }
            }
            Err(err) => {
                tracing::warn!(provider, line, error = %err, "could not parse Ollama JSONL chunk, skipping");
            }
        }
    }
    true
}

fn map_reqwest_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    classify_transport_error(provider, err.is_timeout(), err.to_string())
}
