use std::time::Duration;

use async_trait::async_trait;
use llmgate_domain::{ChatRequest, ChatResponse, ProviderError};
use llmgate_provider::{ChunkStream, UpstreamProvider};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::openai_wire;

pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(client: Client, api_key: String, base_url: String, default_model: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            base_url,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout,
        }
    }

    /// OpenRouter requires `HTTP-Referer` and recommends `X-Title` on top of
    /// the common bearer-auth headers (spec.md §4.2 item 2).
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).expect("api key is valid header value"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("HTTP-Referer", HeaderValue::from_static("https://github.com/llmgate"));
        headers.insert("X-Title", HeaderValue::from_static("llmgate"));
        headers
    }
}

#[async_trait]
impl UpstreamProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = openai_wire::build_payload(&request.messages, model, request.max_tokens, request.temperature, false);
        let url = format!("{}/chat/completions", self.base_url);
        openai_wire::generate(&self.client, &url, self.headers(), payload, self.timeout, self.name(), &self.default_model).await
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = openai_wire::build_payload(&request.messages, model, request.max_tokens, request.temperature, true);
        let url = format!("{}/chat/completions", self.base_url);
        openai_wire::stream(&self.client, &url, self.headers(), payload, self.timeout, self.name()).await
    }
}
