use crate::config::LlmConfig;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Bounded buffer between the upstream provider and the consumer. Filling it
/// pauses upstream consumption; a dropped consumer cancels generation.
const STREAM_BUFFER_TOKENS: usize = 256;

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Provider-level failure classification; drives failover.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    fn fails_over(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited)
    }
}

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;

    async fn stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// One parsed server-sent event from a completion stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.strip_prefix("data: ") else {
        return SseEvent::Skip;
    };

    if payload.trim() == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => match chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.clone())
        {
            Some(content) if !content.is_empty() => SseEvent::Token(content),
            _ => SseEvent::Skip,
        },
        Err(_) => SseEvent::Skip,
    }
}

/// OpenAI-compatible `/v1/chat/completions` provider.
pub struct OpenAiCompatProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: String,
        base_url: String,
        model: String,
        api_key: Option<String>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            name,
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            model,
            api_key,
        }
    }

    async fn send(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request);

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Other(format!("status {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let response = self.send(prompt, options, false).await?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("bad completion response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Other("empty choices".to_string()))
    }

    async fn stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, ProviderError> {
        let response = self.send(prompt, options, true).await?;
        let mut bytes = response.bytes_stream();

        // SSE events can split across network reads; keep a line buffer.
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(next) = bytes.next().await {
                match next {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim_end_matches('\r').to_string();
                            buffer.drain(..=pos);
                            match parse_sse_line(&line) {
                                SseEvent::Token(token) => yield Ok(token),
                                SseEvent::Done => return,
                                SseEvent::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ApiError::LlmUnavailable(format!("stream error: {}", e)));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// LLM adapter (C10's answer source): tries providers in preference order and
/// falls through on outages and rate limits.
pub struct LlmService {
    providers: Vec<Arc<dyn LlmProvider>>,
    defaults: GenerationOptions,
    limiters: Arc<Limiters>,
}

impl LlmService {
    pub fn new(config: &LlmConfig, limiters: Arc<Limiters>) -> Self {
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

        let ordered_names: Vec<&String> = if config.provider_preference.is_empty() {
            config.providers.iter().map(|p| &p.name).collect()
        } else {
            config.provider_preference.iter().collect()
        };

        for name in ordered_names {
            let Some(provider_cfg) = config.providers.iter().find(|p| &p.name == name) else {
                warn!("Provider preference '{}' has no configuration, skipping", name);
                continue;
            };
            providers.push(Arc::new(OpenAiCompatProvider::new(
                provider_cfg.name.clone(),
                provider_cfg.base_url.clone(),
                provider_cfg.model.clone(),
                provider_cfg.api_key.clone(),
                config.timeout_seconds,
            )));
        }

        Self {
            providers,
            defaults: GenerationOptions {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
            limiters,
        }
    }

    /// Test/bench constructor with explicit providers.
    pub fn with_providers(
        providers: Vec<Arc<dyn LlmProvider>>,
        defaults: GenerationOptions,
        limiters: Arc<Limiters>,
    ) -> Self {
        Self {
            providers,
            defaults,
            limiters,
        }
    }

    pub fn options(&self) -> GenerationOptions {
        self.defaults.clone()
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        let (_permit, _) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await
        .map_err(|e| ApiError::LlmUnavailable(e.to_string()))?;

        let mut last: Option<ProviderError> = None;
        for provider in &self.providers {
            match provider.generate(prompt, &self.defaults).await {
                Ok(answer) => {
                    debug!("Provider {} answered ({} chars)", provider.name(), answer.len());
                    return Ok(answer);
                }
                Err(e) if e.fails_over() => {
                    warn!("Provider {} failed over: {}", provider.name(), e);
                    last = Some(e);
                }
                Err(e) => {
                    warn!("Provider {} hard-failed: {}", provider.name(), e);
                    return Err(ApiError::LlmUnavailable(e.to_string()));
                }
            }
        }

        Err(ApiError::LlmUnavailable(
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        ))
    }

    /// Open a token stream with failover on connection. Tokens flow through a
    /// bounded channel: a slow consumer blocks the forwarding task, which in
    /// turn stops polling the provider; dropping the stream aborts upstream.
    pub async fn stream(&self, prompt: &str) -> Result<TokenStream, ApiError> {
        let (permit, _) = Limiters::acquire_timed(
            self.limiters.llm_stream.clone(),
            self.limiters.acquire_timeout,
            "llm_stream",
        )
        .await
        .map_err(|e| ApiError::LlmUnavailable(e.to_string()))?;

        let mut last: Option<ProviderError> = None;
        for provider in &self.providers {
            match provider.stream(prompt, &self.defaults).await {
                Ok(mut upstream) => {
                    debug!("Provider {} streaming", provider.name());
                    let (tx, rx) =
                        tokio::sync::mpsc::channel::<Result<String, ApiError>>(STREAM_BUFFER_TOKENS);

                    tokio::spawn(async move {
                        // permit held for the lifetime of the stream
                        let _permit = permit;
                        while let Some(item) = upstream.next().await {
                            if tx.send(item).await.is_err() {
                                debug!("Stream consumer gone, cancelling generation");
                                break;
                            }
                        }
                    });

                    let stream = async_stream::stream! {
                        let mut rx = rx;
                        while let Some(item) = rx.recv().await {
                            yield item;
                        }
                    };
                    return Ok(Box::pin(stream));
                }
                Err(e) if e.fails_over() => {
                    warn!("Provider {} failed over: {}", provider.name(), e);
                    last = Some(e);
                }
                Err(e) => {
                    warn!("Provider {} hard-failed: {}", provider.name(), e);
                    return Err(ApiError::LlmUnavailable(e.to_string()));
                }
            }
        }

        Err(ApiError::LlmUnavailable(
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        ))
    }
}
