//! Embedding providers.
//!
//! A provider is passed explicitly to whatever needs embeddings; there is no
//! process-wide model configuration. Two providers ship with the crate: an
//! OpenAI-compatible HTTP client and a deterministic hashing model.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a fixed configuration and
/// always produce vectors of [`EmbeddingProvider::dimension`] length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Model identifier; part of cache keys.
    fn model(&self) -> &str;

    /// Length of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Generate an embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// Must be equivalent to calling [`EmbeddingProvider::embed_one`] for
    /// each text; overriding exists only to batch requests.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_one(text).await?);
        }
        Ok(results)
    }

    /// Check if the provider is usable (API key set, etc.).
    fn is_available(&self) -> bool {
        true
    }
}

/// Default endpoint of the hosted OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for any service speaking the OpenAI `/embeddings` API.
///
/// This covers the hosted OpenAI API as well as local servers such as
/// Ollama or text-embeddings-inference.
pub struct OpenAIProvider {
    /// API key, sent as a bearer token when present.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model to request.
    model: String,

    /// Requested output dimension (only sent when set).
    dimensions: Option<usize>,
}

impl OpenAIProvider {
    /// Create a provider for the hosted API with `text-embedding-3-small`.
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: OPENAI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Read the API key from an environment variable, if set.
    pub fn with_api_key_from_env(mut self, var: &str) -> Self {
        self.api_key = std::env::var(var).ok().filter(|k| !k.is_empty());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request a specific output dimension.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    fn requires_api_key(&self) -> bool {
        self.base_url == OPENAI_BASE_URL
    }

    async fn request(&self, input: serde_json::Value) -> Result<OpenAIEmbeddingResponse> {
        if self.api_key.is_none() && self.requires_api_key() {
            return Err(EmbeddingError::ProviderNotConfigured(
                "no API key for the OpenAI API".to_string(),
            ));
        }

        let mut body = serde_json::json!({
            "input": input,
            "model": self.model,
        });
        if let Some(dims) = self.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            warn!("Embedding API rate limited, retry after {retry_after}s");
            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "{status}: {error_text}"
            )));
        }

        Ok(response.json().await?)
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<()> {
        match self.dimensions {
            Some(expected) if embedding.len() != expected => {
                Err(EmbeddingError::dimension(expected, embedding.len()))
            }
            _ => Ok(()),
        }
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Native dimension of well-known models.
pub fn known_dimension(model: &str) -> Option<usize> {
    let model = model.split(':').next().unwrap_or(model);
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "mxbai-embed-large" | "bge-large-en-v1.5" | "bge-m3" => Some(1024),
        "nomic-embed-text" | "bge-base-en-v1.5" => Some(768),
        "all-minilm" | "all-MiniLM-L6-v2" | "bge-small-en-v1.5" => Some(384),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimensions
            .or_else(|| known_dimension(&self.model))
            .unwrap_or(crate::DEFAULT_DIMENSION)
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        debug!("Generating embedding with model: {}", self.model);

        let result = self.request(serde_json::json!(text)).await?;
        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?
            .embedding;
        self.check_dimension(&embedding)?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let mut result = self.request(serde_json::json!(texts)).await?;
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // The API may return items out of order; `index` is authoritative.
        result.data.sort_by_key(|item| item.index);
        let embeddings: Vec<Embedding> =
            result.data.into_iter().map(|item| item.embedding).collect();
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }

        if let Some(usage) = result.usage {
            debug!("Batch embedding used {} tokens", usage.total_tokens);
        }
        info!("Generated {} batch embeddings", embeddings.len());

        Ok(embeddings)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() || !self.requires_api_key()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f64>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

/// Deterministic bag-of-words provider based on feature hashing.
///
/// Each lower-cased token is hashed with SHA-256 into one of `dimension`
/// buckets with a hash-derived sign, and the sum is normalized to unit
/// length. Needs no model download or network access.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    model: String,
}

impl HashingProvider {
    /// Create a hashing provider producing `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("sha256-bow-{dimension}"),
        }
    }

    /// Embed synchronously; the async trait methods delegate here.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0f64; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        for token in text.split_whitespace() {
            let token: String = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }

            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_text(text))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_openai_provider_dimensions() {
        let provider = OpenAIProvider::new().with_model("text-embedding-3-large");
        assert_eq!(provider.dimension(), 3072);

        let provider = OpenAIProvider::new().with_model("mxbai-embed-large:latest");
        assert_eq!(provider.dimension(), 1024);

        let provider = OpenAIProvider::new()
            .with_model("custom")
            .with_dimensions(256);
        assert_eq!(provider.dimension(), 256);
    }

    #[test]
    fn test_openai_provider_availability() {
        assert!(!OpenAIProvider::new().is_available());
        assert!(OpenAIProvider::new().with_api_key("sk-test").is_available());
        assert!(
            OpenAIProvider::new()
                .with_base_url("http://localhost:11434/v1/")
                .is_available()
        );
    }

    #[tokio::test]
    async fn test_openai_provider_requires_key_for_hosted_api() {
        let result = OpenAIProvider::new().embed_one("hello").await;
        assert!(matches!(result, Err(EmbeddingError::ProviderNotConfigured(_))));
    }

    #[test]
    fn test_hashing_provider_is_deterministic_and_normalized() {
        let provider = HashingProvider::new(64);
        let a = provider.embed_text("The quick brown fox");
        let b = provider.embed_text("the QUICK brown fox!");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_hashing_provider_shared_words_are_closer() {
        let provider = HashingProvider::new(256);
        let query = provider.embed_text("vector similarity search");
        let near = provider.embed_text("fast vector search engine");
        let far = provider.embed_text("banana bread recipe");

        let near_score = cosine_similarity(&query, &near).unwrap();
        let far_score = cosine_similarity(&query, &far).unwrap();
        assert!(near_score > far_score);
    }

    #[test]
    fn test_hashing_provider_empty_text_is_zero() {
        let provider = HashingProvider::new(8);
        assert_eq!(provider.embed_text("  ... "), vec![0.0; 8]);
        assert!(HashingProvider::new(0).embed_text("anything").is_empty());
    }

    #[tokio::test]
    async fn test_embed_many_matches_embed_one() {
        let provider = HashingProvider::new(32);
        let texts = vec![
            "alpha beta".to_string(),
            "gamma".to_string(),
            String::new(),
        ];

        let batch = provider.embed_many(&texts).await.unwrap();
        for (text, embedding) in texts.iter().zip(&batch) {
            assert_eq!(&provider.embed_one(text).await.unwrap(), embedding);
        }
    }
}
