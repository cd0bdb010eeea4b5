//! ============================================================================
//! Embedding Service - Vector embeddings for semantic memory
//! ============================================================================
//! Generates text embeddings using x.ai's OpenAI-compatible API, with OpenAI
//! as fallback. The store only sees `EmbeddingProvider`, whose contract is
//! `embed(text) -> Option<vector>`: any failure, empty input, or wrong-length
//! vector is `None`, and the calling operation becomes a no-op.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Output length of the embedding model; every index must match it
pub const REQUIRED_DIMENSION: usize = 1536;

/// How long a failed provider is skipped before it is tried again
pub const DEFAULT_PROVIDER_COOLDOWN: Duration = Duration::from_secs(60);

/// Source of embeddings for the memory store
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`; `None` for empty input or any provider failure
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Embedding service for generating text vectors
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingService {
    /// Create a new embedding service using x.ai API
    pub fn new_xai(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            "https://api.x.ai/v1".to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Create a new embedding service using OpenAI API (fallback)
    pub fn new_openai(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            "https://api.openai.com/v1".to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Create with custom base URL and model
    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
            dimension: REQUIRED_DIMENSION,
        }
    }

    /// Apply a request timeout to the underlying HTTP client
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        match Client::builder().timeout(timeout).build() {
            Ok(client) => self.client = client,
            Err(e) => warn!("Failed to apply embedding client timeout: {}", e),
        }
        self
    }

    /// Generate embeddings for multiple texts
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send embedding request: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(anyhow!(
                    "Embedding API error ({}): {}",
                    status,
                    error.error.message
                ));
            }
            return Err(anyhow!("Embedding API error ({}): {}", status, body));
        }

        parse_embedding_response(&body)
    }

    /// Generate embedding for a single text
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding returned"))
    }

    /// Get the current model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn parse_embedding_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let embedding_response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Failed to parse embedding response: {} - body: {}", e, body))?;

    if let Some(usage) = &embedding_response.usage {
        debug!(
            "Embedding tokens used: {} (model: {})",
            usage.total_tokens, embedding_response.model
        );
    }

    // Sort by index and extract embeddings
    let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
        .data
        .into_iter()
        .map(|d| (d.index, d.embedding))
        .collect();
    embeddings.sort_by_key(|(idx, _)| *idx);

    Ok(embeddings.into_iter().map(|(_, e)| e).collect())
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }

        match self.embed_single(text).await {
            Ok(vector) if vector.len() == self.dimension => Some(vector),
            Ok(vector) => {
                warn!(
                    "Embedding from {} has dimension {} (expected {}); discarding",
                    self.base_url,
                    vector.len(),
                    self.dimension
                );
                None
            }
            Err(e) => {
                warn!("Embedding provider {} failed: {}", self.base_url, e);
                None
            }
        }
    }
}

/// Ordered list of providers; the first usable vector wins.
///
/// A provider that fails is benched for `cooldown` so a dead endpoint does
/// not cost a full HTTP timeout on every call. Success clears the mark.
pub struct EmbeddingChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    cooldown: Duration,
    failed_at: Mutex<HashMap<usize, Instant>>,
}

impl EmbeddingChain {
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            providers,
            cooldown: DEFAULT_PROVIDER_COOLDOWN,
            failed_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn in_cooldown(&self, slot: usize) -> bool {
        match self.failed_at.lock() {
            Ok(failed_at) => failed_at
                .get(&slot)
                .is_some_and(|at| at.elapsed() < self.cooldown),
            Err(_) => false,
        }
    }

    fn mark(&self, slot: usize, failed: bool) {
        if let Ok(mut failed_at) = self.failed_at.lock() {
            if failed {
                failed_at.insert(slot, Instant::now());
            } else {
                failed_at.remove(&slot);
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingChain {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        if self.providers.is_empty() {
            debug!("No embedding provider configured");
            return None;
        }
        for (slot, provider) in self.providers.iter().enumerate() {
            if self.in_cooldown(slot) {
                debug!("Embedding provider {} in cooldown; skipping", slot);
                continue;
            }
            match provider.embed(text).await {
                Some(vector) => {
                    self.mark(slot, false);
                    return Some(vector);
                }
                None => self.mark(slot, true),
            }
        }
        error!("All embedding providers failed or are cooling down");
        None
    }
}

/// Create an embedding chain: x.ai first, then OpenAI
pub fn create_embedding_service(
    xai_api_key: Option<String>,
    openai_api_key: Option<String>,
    timeout: Duration,
    cooldown: Duration,
) -> Result<EmbeddingChain> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();

    if let Some(key) = xai_api_key.filter(|k| !k.is_empty()) {
        debug!("Using x.ai for embeddings");
        providers.push(Arc::new(EmbeddingService::new_xai(key).with_timeout(timeout)));
    }

    if let Some(key) = openai_api_key.filter(|k| !k.is_empty()) {
        if providers.is_empty() {
            warn!("x.ai API key not available, falling back to OpenAI for embeddings");
        }
        providers.push(Arc::new(
            EmbeddingService::new_openai(key).with_timeout(timeout),
        ));
    }

    if providers.is_empty() {
        return Err(anyhow!(
            "No embedding API key available (tried x.ai and OpenAI)"
        ));
    }

    Ok(EmbeddingChain::new(providers).with_cooldown(cooldown))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            self.0.clone()
        }
    }

    /// Counts calls; fails until `heal()` is called
    #[derive(Default)]
    struct Counted {
        calls: std::sync::atomic::AtomicUsize,
        healthy: std::sync::atomic::AtomicBool,
    }

    impl Counted {
        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn heal(&self) {
            self.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Counted {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.healthy
                .load(std::sync::atomic::Ordering::SeqCst)
                .then(|| vec![9.0])
        }
    }

    #[test]
    fn test_service_creation() {
        let service = EmbeddingService::new_xai("test-key".to_string());
        assert_eq!(service.base_url(), "https://api.x.ai/v1");
        assert_eq!(service.model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_openai_fallback() {
        let service = EmbeddingService::new_openai("test-key".to_string());
        assert_eq!(service.base_url(), "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let service = EmbeddingService::new_xai("test-key".to_string());
        let result = service.embed_batch(vec![]).await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
        assert_eq!(service.embed("   ").await, None);
    }

    #[test]
    fn test_response_sorted_by_index() {
        let body = r#"{
            "data": [
                {"embedding": [0.2, 0.2], "index": 1},
                {"embedding": [0.1, 0.1], "index": 0}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }"#;
        let embeddings = parse_embedding_response(body).unwrap();
        assert_eq!(embeddings, vec![vec![0.1, 0.1], vec![0.2, 0.2]]);
    }

    #[test]
    fn test_no_keys_is_an_error() {
        let timeout = Duration::from_secs(5);
        let cooldown = DEFAULT_PROVIDER_COOLDOWN;
        assert!(create_embedding_service(None, Some(String::new()), timeout, cooldown).is_err());
        let chain =
            create_embedding_service(Some("x".into()), Some("o".into()), timeout, cooldown)
                .unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn test_chain_falls_through_failures() {
        let chain = EmbeddingChain::new(vec![
            Arc::new(Fixed(None)),
            Arc::new(Fixed(Some(vec![1.0, 2.0]))),
        ]);
        assert_eq!(chain.embed("hello").await, Some(vec![1.0, 2.0]));
        assert_eq!(chain.embed("").await, None);

        let dead = EmbeddingChain::new(vec![Arc::new(Fixed(None))]);
        assert_eq!(dead.embed("hello").await, None);
        assert_eq!(EmbeddingChain::new(Vec::new()).embed("hello").await, None);
    }

    #[tokio::test]
    async fn test_failed_provider_is_skipped_during_cooldown() {
        let primary = Arc::new(Counted::default());
        let providers: Vec<Arc<dyn EmbeddingProvider>> =
            vec![primary.clone(), Arc::new(Fixed(Some(vec![1.0, 2.0])))];
        let chain = EmbeddingChain::new(providers)
        .with_cooldown(Duration::from_secs(600));

        assert_eq!(chain.embed("hello").await, Some(vec![1.0, 2.0]));
        assert_eq!(chain.embed("again").await, Some(vec![1.0, 2.0]));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_is_retried_after_cooldown() {
        let primary = Arc::new(Counted::default());
        let providers: Vec<Arc<dyn EmbeddingProvider>> =
            vec![primary.clone(), Arc::new(Fixed(Some(vec![1.0, 2.0])))];
        let chain = EmbeddingChain::new(providers)
        .with_cooldown(Duration::ZERO);

        assert_eq!(chain.embed("hello").await, Some(vec![1.0, 2.0]));
        primary.heal();
        assert_eq!(chain.embed("hello").await, Some(vec![9.0]));
        assert_eq!(primary.calls(), 2);
    }
}
