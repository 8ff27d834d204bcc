//! `Embedder` (spec §4.3): batched, cached, retrying client for a remote
//! OpenAI-compatible embeddings endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbedConfig;
use crate::error::EmbedError;

/// Capability interface (spec §9): swappable real / mock / null embedder.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Each slot is `Some(vector)` on success or
    /// `None` if that individual item could not be embedded after retries
    /// (spec §4.3 "Partial-failure fallback").
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponseItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingResponseItem>,
}

struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    opened_at_epoch_ms: AtomicU64,
    threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, open_duration: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at_epoch_ms: AtomicU64::new(0),
            threshold,
            open_duration,
        }
    }

    fn is_open(&self) -> bool {
        let opened_at = self.opened_at_epoch_ms.load(Ordering::Relaxed);
        if opened_at == 0 {
            return false;
        }
        let now_ms = now_epoch_ms();
        now_ms.saturating_sub(opened_at) < self.open_duration.as_millis() as u64
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.opened_at_epoch_ms.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            self.opened_at_epoch_ms.store(now_epoch_ms(), Ordering::Relaxed);
        }
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn embed_cache_key(text: &str, model: &str, dim: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(text.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(model.as_bytes());
    hasher.update(&dim.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Remote HTTP embedder against an OpenAI-compatible `/v1/embeddings`
/// endpoint, with an in-memory LRU cache, retry-with-backoff, and a circuit
/// breaker. The persistent (Store-table) cache tier sits in front of this
/// type at the call site (`CandidateGen`/`WriteMerge`), not inside it, so
/// this type stays storage-agnostic.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: EmbedConfig,
    breaker: CircuitBreaker,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl RemoteEmbedder {
    pub fn new(config: EmbedConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("reqwest client builds with static config");
        let cache_size = std::num::NonZeroUsize::new(config.lru_cache_size.max(1)).unwrap();
        Self {
            client,
            breaker: CircuitBreaker::new(config.circuit_failure_threshold, Duration::from_secs(config.circuit_open_secs)),
            cache: Mutex::new(LruCache::new(cache_size)),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn truncate_at_char_boundary(&self, text: &str) -> &str {
        let max = self.config.max_embed_chars;
        if text.len() <= max {
            return text;
        }
        let mut end = max;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }

    fn cached(&self, text: &str) -> Option<Vec<f32>> {
        let key = embed_cache_key(text, &self.config.model, self.config.dimensions);
        self.cache.lock().expect("cache mutex poisoned").get(&key).cloned()
    }

    fn store_cache(&self, text: &str, vec: &[f32]) {
        let key = embed_cache_key(text, &self.config.model, self.config.dimensions);
        self.cache.lock().expect("cache mutex poisoned").put(key, vec.to_vec());
    }

    async fn call_remote(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self.client.post(&url).json(&EmbeddingRequest { model: &self.config.model, input: batch });
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
            }

            let result = req.send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .await
                            .map_err(|e| EmbedError::Fatal(format!("invalid embedding response body: {e}")))?;
                        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
                        return Ok(vectors);
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < self.config.retry_attempts {
                        self.backoff_sleep(attempt).await;
                        continue;
                    }
                    return Err(EmbedError::Fatal(format!("embedding endpoint returned {status}")));
                }
                Err(e) => {
                    if attempt < self.config.retry_attempts {
                        self.backoff_sleep(attempt).await;
                        continue;
                    }
                    return Err(EmbedError::Transient(e.to_string()));
                }
            }
        }
    }

    async fn backoff_sleep(&self, attempt: u32) {
        let base = self.config.retry_base_delay_ms as f64;
        let factor = self.config.retry_backoff_factor.powi(attempt as i32 - 1);
        let jitter: f64 = rand::random::<f64>() * base * 0.25;
        let delay_ms = (base * factor + jitter) as u64;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.cached(text) {
            return Some(cached);
        }
        let truncated = self.truncate_at_char_boundary(text).to_string();
        match self.call_remote(std::slice::from_ref(&truncated)).await {
            Ok(mut vectors) if vectors.len() == 1 => {
                let vec = vectors.remove(0);
                if vec.len() != self.config.dimensions {
                    warn!(expected = self.config.dimensions, got = vec.len(), "embedding dimension mismatch");
                    self.breaker.record_failure();
                    return None;
                }
                self.breaker.record_success();
                self.store_cache(text, &vec);
                Some(vec)
            }
            _ => {
                self.breaker.record_failure();
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }

        if self.breaker.is_open() {
            // Serve whatever is already cached; everything else returns None
            // immediately per spec §4.3's circuit-open behavior.
            return texts.iter().map(|t| self.cached(t)).collect();
        }

        let truncated: Vec<String> = texts.iter().map(|t| self.truncate_at_char_boundary(t).to_string()).collect();

        match self.call_remote(&truncated).await {
            Ok(vectors) if vectors.len() == truncated.len() => {
                self.breaker.record_success();
                let mut out = Vec::with_capacity(texts.len());
                for (text, vec) in texts.iter().zip(vectors.into_iter()) {
                    if vec.len() != self.config.dimensions {
                        warn!(expected = self.config.dimensions, got = vec.len(), "embedding dimension mismatch");
                        out.push(None);
                        continue;
                    }
                    self.store_cache(text, &vec);
                    out.push(Some(vec));
                }
                out
            }
            _ => {
                debug!(batch_size = texts.len(), "batch embed failed, falling back to per-item retries");
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.embed_one(text).await);
                }
                out
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

/// Never-succeeds embedder for tests and degraded-mode simulation.
pub struct NullEmbedder {
    dims: usize,
}

impl NullEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait::async_trait]
impl Embedder for NullEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        vec![None; texts.len()]
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Deterministic fake embedder for tests: hashes text into a unit vector so
/// cosine similarity is stable and reproducible without a network call.
pub struct DeterministicTestEmbedder {
    dims: usize,
}

impl DeterministicTestEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait::async_trait]
impl Embedder for DeterministicTestEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(t.as_bytes());
                let mut reader = hasher.finalize_xof();
                let mut raw = vec![0u8; self.dims];
                reader.fill(&mut raw);
                let mut v: Vec<f32> = raw.into_iter().map(|b| (b as f32 / 255.0) * 2.0 - 1.0).collect();
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in v.iter_mut() {
                        *x /= norm;
                    }
                }
                Some(v)
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_embedder_is_stable() {
        let e = DeterministicTestEmbedder::new(32);
        let a = e.embed_batch(&["hello".to_string()]).await;
        let b = e.embed_batch(&["hello".to_string()]).await;
        assert_eq!(a[0], b[0]);
    }

    #[tokio::test]
    async fn null_embedder_always_fails() {
        let e = NullEmbedder::new(16);
        let r = e.embed_batch(&["anything".to_string()]).await;
        assert_eq!(r, vec![None]);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
