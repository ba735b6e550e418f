use std::time::Duration;

use async_trait::async_trait;
use llmgate_domain::{ChatRequest, ChatResponse, ProviderError};
use llmgate_provider::{ChunkStream, UpstreamProvider};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::openai_wire;

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl GroqProvider {
    pub fn new(client: Client, api_key: String, base_url: String, default_model: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            base_url,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout,
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).expect("api key is valid header value"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait]
impl UpstreamProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
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
