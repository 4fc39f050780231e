use crate::config::EmbeddingConfig;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use crate::utils::similarity::l2_normalize;
use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RETRY_INITIAL: Duration = Duration::from_millis(200);
const RETRY_CAP: Duration = Duration::from_secs(4);
const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Text → vector mapping. Implementations must be total and deterministic
/// for a fixed model identity.
#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-format `/v1/embeddings` client.
pub struct HttpEmbeddingBackend {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

impl HttpEmbeddingBackend {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut request_builder = self.client.post(&url).json(&EmbeddingRequest {
            input: texts,
            model: &self.model,
        });

        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = request_builder
            .send()
            .await
            .context("failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding API error ({}): {}", status, body);
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if body.data.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                body.data.len()
            );
        }

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic in-process backend: word and character-trigram hashing into
/// a fixed-dimension vector. Lexical overlap, not semantics; the default when
/// no embedding server is configured, and what the tests run on.
pub struct HashEmbeddingBackend {
    dimension: usize,
}

impl HashEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_str(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let h = Self::hash_str(word);
            let idx = (h as usize) % self.dimension;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((h >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let h = Self::hash_str(&trigram);
            let idx = (h as usize) % self.dimension;
            let sign = if (h >> 32) & 1 == 0 { 0.5 } else { -0.5 };
            embedding[idx] += sign;
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for HashEmbeddingBackend {
    fn model_id(&self) -> &str {
        "hash-local"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }
}

struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: Instant,
}

/// Embedding provider (C1): caches by content digest, retries the backend
/// with exponential backoff, and guarantees L2-normalized output of the
/// configured dimension.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    cache_ttl: Duration,
    limiters: Arc<Limiters>,
}

impl EmbeddingService {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        config: &EmbeddingConfig,
        limiters: Arc<Limiters>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Mutex::new(LruCache::new(capacity)),
            cache_ttl: Duration::from_secs(config.cache_ttl_seconds),
            limiters,
        }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    fn cache_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let texts = [text.to_string()];
        let mut result = self.embed(&texts).await?;
        result
            .pop()
            .ok_or_else(|| ApiError::Internal("empty embedding batch result".to_string()))
    }

    /// Embed a batch, serving repeats from the cache. The cache is purely a
    /// latency optimization; a full miss pass produces identical output.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let keys: Vec<String> = texts.iter().map(|t| Self::cache_key(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        {
            let mut cache = self.cache.lock();
            for (i, key) in keys.iter().enumerate() {
                let expired = matches!(
                    cache.peek(key),
                    Some(entry) if entry.inserted_at.elapsed() > self.cache_ttl
                );
                if expired {
                    cache.pop(key);
                }
                match cache.get(key) {
                    Some(entry) => results[i] = Some(entry.embedding.clone()),
                    None => miss_indices.push(i),
                }
            }
        }

        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> =
                miss_indices.iter().map(|&i| texts[i].clone()).collect();

            let (_permit, wait) = Limiters::acquire_timed(
                self.limiters.embedding.clone(),
                self.limiters.acquire_timeout,
                "embedding",
            )
            .await
            .map_err(|e| ApiError::EmbeddingUnavailable(e.to_string()))?;

            debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

            let embeddings = self.embed_with_retry(&miss_texts).await?;

            let mut cache = self.cache.lock();
            for (&i, mut embedding) in miss_indices.iter().zip(embeddings.into_iter()) {
                if embedding.len() != self.backend.dimension() {
                    return Err(ApiError::EmbeddingUnavailable(format!(
                        "dimension mismatch: expected {}, got {}",
                        self.backend.dimension(),
                        embedding.len()
                    )));
                }
                l2_normalize(&mut embedding);
                cache.put(
                    keys[i].clone(),
                    CacheEntry {
                        embedding: embedding.clone(),
                        inserted_at: Instant::now(),
                    },
                );
                results[i] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| ApiError::Internal("embedding slot unfilled".to_string())))
            .collect()
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut backoff = RETRY_INITIAL;
        let mut last_error = None;

        for attempt in 1..=RETRY_MAX_ATTEMPTS {
            let exec_start = Instant::now();
            match self.backend.embed(texts).await {
                Ok(embeddings) => {
                    debug!(
                        exec_ms = exec_start.elapsed().as_millis() as u64,
                        batch = texts.len(),
                        op = "embedding",
                        "exec"
                    );
                    return Ok(embeddings);
                }
                Err(e) => {
                    warn!(
                        "Embedding attempt {}/{} failed: {}",
                        attempt, RETRY_MAX_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < RETRY_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RETRY_CAP);
                    }
                }
            }
        }

        Err(ApiError::EmbeddingUnavailable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        inner: HashEmbeddingBackend,
        calls: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn model_id(&self) -> &str {
            "counting"
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient outage");
            }
            self.inner.embed(texts).await
        }
    }

    fn service(fail_first: usize) -> (EmbeddingService, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend {
            inner: HashEmbeddingBackend::new(64),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(fail_first),
        });
        let config = EmbeddingConfig {
            dimension: 64,
            cache_ttl_seconds: 3600,
            ..Default::default()
        };
        let limiters = Arc::new(Limiters::new(&LimitsConfig::default()));
        (
            EmbeddingService::new(backend.clone(), &config, limiters),
            backend,
        )
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let (service, _) = service(0);
        let a = service.embed_one("machine learning").await.unwrap();
        let b = service.embed_one("machine learning").await.unwrap();
        assert_eq!(a, b);

        let magnitude: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn cache_skips_backend_on_repeat() {
        let (service, backend) = service(0);
        service.embed_one("hello world").await.unwrap();
        service.embed_one("hello world").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_mixes_hits_and_misses() {
        let (service, backend) = service(0);
        service.embed_one("first").await.unwrap();

        let texts = vec!["first".to_string(), "second".to_string()];
        let out = service.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        // one call for "first", one for the batch containing only "second"
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (service, backend) = service(2);
        let out = service.embed_one("retry me").await.unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_outage_surfaces_kind() {
        let (service, _) = service(10);
        let err = service.embed_one("doomed").await.unwrap_err();
        assert_eq!(err.kind(), "EmbeddingUnavailable");
    }

    #[tokio::test]
    async fn similar_text_clusters() {
        let (service, _) = service(0);
        let base = service.embed_one("the quick brown fox").await.unwrap();
        let close = service.embed_one("the quick brown dog").await.unwrap();
        let far = service.embed_one("completely unrelated words").await.unwrap();

        let sim_close = crate::utils::similarity::unit_dot_score(&base, &close);
        let sim_far = crate::utils::similarity::unit_dot_score(&base, &far);
        assert!(sim_close > sim_far);
    }
}
