use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use llmgate_domain::{ChatRequest, ChatResponse, ErrorCode, Message, ProviderError, Role};
use llmgate_provider::{ChunkResult, ChunkStream, UpstreamProvider};
use llmgate_state::InMemoryStateStore;
use tokio::sync::mpsc;

use super::*;

enum StreamScript {
    ErrImmediate(ProviderError),
    Chunks { delay_before_first: Duration, chunks: Vec<ChunkResult> },
}

struct FakeProvider {
    provider_name: &'static str,
    generate_script: StdMutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    stream_script: StdMutex<VecDeque<StreamScript>>,
    generate_calls: std::sync::atomic::AtomicUsize,
    stream_calls: std::sync::atomic::AtomicUsize,
}

impl FakeProvider {
    fn new(name: &'static str) -> Self {
        Self {
            provider_name: name,
            generate_script: StdMutex::new(VecDeque::new()),
            stream_script: StdMutex::new(VecDeque::new()),
            generate_calls: std::sync::atomic::AtomicUsize::new(0),
            stream_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn with_generate(self, result: Result<ChatResponse, ProviderError>) -> Self {
        self.generate_script.lock().unwrap().push_back(result);
        self
    }

    fn with_stream(self, script: StreamScript) -> Self {
        self.stream_script.lock().unwrap().push_back(script);
        self
    }

    fn calls(&self) -> usize {
        self.generate_calls.load(std::sync::atomic::Ordering::SeqCst) + self.stream_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamProvider for FakeProvider {
    fn name(&self) -> &str {
        self.provider_name
    }

    async fn generate(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.generate_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.generate_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new(self.provider_name, ErrorCode::UnknownError, "no script", false)))
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<ChunkStream, ProviderError> {
        self.stream_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let script = self
            .stream_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamScript::ErrImmediate(ProviderError::new(self.provider_name, ErrorCode::UnknownError, "no script", false)));

        match script {
            StreamScript::ErrImmediate(err) => Err(err),
            StreamScript::Chunks { delay_before_first, chunks } => {
                let (tx, rx) = mpsc::channel(32);
                tokio::spawn(async move {
                    tokio::time::sleep(delay_before_first).await;
                    for chunk in chunks {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(rx)
            }
        }
    }
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![Message { role: Role::User, content: "hi".to_string() }],
        max_tokens: 256,
        temperature: 0.0,
        stream: false,
        model: None,
        provider: None,
        metadata: None,
    }
}

fn pinned_request(provider: &str) -> ChatRequest {
    let mut req = request();
    req.provider = Some(provider.to_string());
    req
}

fn response(provider: &str, text: &str) -> ChatResponse {
    ChatResponse { text: text.to_string(), provider_name: provider.to_string(), model: None, provider_meta: Default::default() }
}

fn fast_config() -> RouterConfig {
    RouterConfig {
        first_chunk_timeout: Duration::from_millis(50),
        backoff_base_seconds: 5,
        backoff_max_seconds: 300,
        default_rate_limit_per_minute: 60,
        provider_rate_limits: HashMap::new(),
    }
}

#[tokio::test]
async fn happy_path_first_candidate_succeeds() {
    let groq = Arc::new(FakeProvider::new("groq").with_generate(Ok(response("groq", "hello"))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq.clone()], state, fast_config());

    let result = router.choose_and_generate(&request()).await.unwrap();
    assert_eq!(result.text, "hello");
    assert_eq!(groq.calls(), 1);
}

#[tokio::test]
async fn failover_to_next_candidate_on_retriable_error() {
    let groq = Arc::new(FakeProvider::new("groq").with_generate(Err(ProviderError::new("groq", ErrorCode::ServerError, "boom", true))));
    let openrouter = Arc::new(FakeProvider::new("openrouter").with_generate(Ok(response("openrouter", "fallback"))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq.clone(), openrouter.clone()], state.clone(), fast_config());

    let result = router.choose_and_generate(&request()).await.unwrap();
    assert_eq!(result.provider_name, "openrouter");
    assert!(state.is_blacklisted("groq").await.unwrap(), "retriable failure must blacklist the provider");
}

#[tokio::test]
async fn non_retriable_error_does_not_blacklist_but_still_fails_over() {
    let groq = Arc::new(FakeProvider::new("groq").with_generate(Err(ProviderError::new("groq", ErrorCode::Unauthorized, "bad key", false))));
    let openrouter = Arc::new(FakeProvider::new("openrouter").with_generate(Ok(response("openrouter", "fallback"))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq.clone(), openrouter.clone()], state.clone(), fast_config());

    let result = router.choose_and_generate(&request()).await.unwrap();
    assert_eq!(result.provider_name, "openrouter");
    assert!(!state.is_blacklisted("groq").await.unwrap(), "non-retriable failure must not blacklist");
}

#[tokio::test]
async fn all_providers_failed_when_every_candidate_is_exhausted() {
    let groq = Arc::new(FakeProvider::new("groq").with_generate(Err(ProviderError::new("groq", ErrorCode::ServerError, "boom", true))));
    let ollama = Arc::new(FakeProvider::new("ollama").with_generate(Err(ProviderError::new("ollama", ErrorCode::ServerError, "boom", true))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq, ollama], state, fast_config());

    let err = router.choose_and_generate(&request()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AllProvidersFailed);
}

#[tokio::test]
async fn pinned_provider_not_registered_is_invalid_provider() {
    let groq = Arc::new(FakeProvider::new("groq"));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq.clone()], state, fast_config());

    let err = router.choose_and_generate(&pinned_request("nonexistent")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidProvider);
    assert_eq!(groq.calls(), 0, "an invalid pin must never reach any adapter");
}

#[tokio::test]
async fn pinned_provider_blacklisted_fails_without_fallback() {
    let groq = Arc::new(FakeProvider::new("groq"));
    let openrouter = Arc::new(FakeProvider::new("openrouter").with_generate(Ok(response("openrouter", "should not be used"))));
    let state = Arc::new(InMemoryStateStore::new());
    state.blacklist("groq", 60).await.unwrap();
    let router = Router::new(vec![groq.clone(), openrouter.clone()], state, fast_config());

    let err = router.choose_and_generate(&pinned_request("groq")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderUnavailable);
    assert_eq!(openrouter.calls(), 0, "pinning must not fall back even when another candidate is healthy");
}

#[tokio::test]
async fn rate_limited_candidate_is_skipped_and_remembered() {
    let groq = Arc::new(FakeProvider::new("groq"));
    let openrouter = Arc::new(FakeProvider::new("openrouter").with_generate(Ok(response("openrouter", "fallback"))));
    let state = Arc::new(InMemoryStateStore::new());
    // Exhaust groq's budget of 1 request/min before the router ever sees it.
    state.check_rate_limit("provider:groq", 1, 60).await.unwrap();
    let mut config = fast_config();
    config.provider_rate_limits.insert("groq".to_string(), 1);
    let router = Router::new(vec![groq.clone(), openrouter.clone()], state, config);

    let result = router.choose_and_generate(&request()).await.unwrap();
    assert_eq!(result.provider_name, "openrouter");
    assert_eq!(groq.calls(), 0, "a rate-limited candidate must never reach the adapter");
}

#[tokio::test]
async fn streaming_commits_to_first_candidate_and_forwards_every_chunk() {
    let groq = Arc::new(FakeProvider::new("groq").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(0),
        chunks: vec![Ok("hel".to_string()), Ok("lo".to_string())],
    }));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq], state, fast_config());

    let mut stream = router.choose_and_stream(&request()).await.unwrap();
    let mut text = String::new();
    while let Some(chunk) = stream.recv().await {
        text.push_str(&chunk.unwrap());
    }
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn streaming_fails_over_on_first_chunk_timeout() {
    let groq = Arc::new(FakeProvider::new("groq").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(500),
        chunks: vec![Ok("too-late".to_string())],
    }));
    let ollama = Arc::new(FakeProvider::new("ollama").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(0),
        chunks: vec![Ok("fast".to_string())],
    }));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq.clone(), ollama], state.clone(), fast_config());

    let mut stream = router.choose_and_stream(&request()).await.unwrap();
    let first = stream.recv().await.unwrap().unwrap();
    assert_eq!(first, "fast");
    assert!(state.is_blacklisted("groq").await.unwrap());
}

#[tokio::test]
async fn streaming_post_commit_error_is_terminal_with_no_failover() {
    let groq = Arc::new(FakeProvider::new("groq").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(0),
        chunks: vec![Ok("first".to_string()), Err(ProviderError::new("groq", ErrorCode::ServerError, "dropped connection", true))],
    }));
    let ollama = Arc::new(FakeProvider::new("ollama").with_generate(Ok(response("ollama", "should not be used"))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq, ollama.clone()], state.clone(), fast_config());

    let mut stream = router.choose_and_stream(&request()).await.unwrap();
    let first = stream.recv().await.unwrap().unwrap();
    assert_eq!(first, "first");
    let second = stream.recv().await.unwrap();
    assert!(second.is_err(), "post-commit upstream failure propagates as a terminal error");
    assert!(stream.recv().await.is_none(), "no more elements after the terminal error");
    assert_eq!(ollama.calls(), 0, "a committed stream must never fail over");

    // The bookkeeping task may still be draining; give it a moment before asserting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(state.is_blacklisted("groq").await.unwrap(), "retriable post-commit failure still records a failure");
}

#[tokio::test]
async fn streaming_non_retriable_post_commit_error_leaves_failure_counter_untouched() {
    let groq = Arc::new(FakeProvider::new("groq").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(0),
        chunks: vec![Ok("first".to_string()), Err(ProviderError::new("groq", ErrorCode::InvalidProvider, "bad request echoed back", false))],
    }));
    let ollama = Arc::new(FakeProvider::new("ollama").with_generate(Ok(response("ollama", "should not be used"))));
    let state = Arc::new(InMemoryStateStore::new());
    let router = Router::new(vec![groq, ollama.clone()], state.clone(), fast_config());

    let mut stream = router.choose_and_stream(&request()).await.unwrap();
    let first = stream.recv().await.unwrap().unwrap();
    assert_eq!(first, "first");
    let second = stream.recv().await.unwrap();
    assert!(second.is_err(), "post-commit upstream failure propagates as a terminal error");
    assert!(stream.recv().await.is_none(), "no more elements after the terminal error");
    assert_eq!(ollama.calls(), 0, "a committed stream must never fail over");

    // The bookkeeping task may still be draining; give it a moment before asserting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!state.is_blacklisted("groq").await.unwrap(), "non-retriable post-commit failure must not blacklist");

    // Neither mark_failed nor reset_failure should have run: the counter starts fresh at 1.
    let count = state.increment_failure("groq").await.unwrap();
    assert_eq!(count, 1, "non-retriable post-commit failure must leave the failure counter untouched");
}

#[tokio::test]
async fn streaming_resets_failure_counter_on_clean_completion() {
    let groq = Arc::new(FakeProvider::new("groq").with_stream(StreamScript::Chunks {
        delay_before_first: Duration::from_millis(0),
        chunks: vec![Ok("a".to_string()), Ok("b".to_string())],
    }));
    let state = Arc::new(InMemoryStateStore::new());
    state.increment_failure("groq").await.unwrap();
    let router = Router::new(vec![groq], state.clone(), fast_config());

    let mut stream = router.choose_and_stream(&request()).await.unwrap();
    while stream.recv().await.is_some() {}
    tokio::time::sleep(Duration::from_millis(20)).await;

    // reset_failure deletes the counter; a fresh increment should start back at 1.
    let count = state.increment_failure("groq").await.unwrap();
    assert_eq!(count, 1);
}
