//! Configuration for the retrieval engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use docsim_embeddings::{
    CachedProvider, DEFAULT_DIMENSION, EmbeddingCache, EmbeddingProvider, HashingProvider,
    OpenAIProvider,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RetrievalError};

/// Configuration for the retrieval engine.
///
/// Every section falls back to its defaults, so an empty TOML file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Query defaults.
    pub query: QueryConfig,

    /// External store settings.
    pub store: StoreConfig,
}

impl RetrievalConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let embedding = &self.embedding;
        if embedding.batch_size == 0 {
            return Err(RetrievalError::Config("embedding.batch_size must be positive".to_string()));
        }
        if embedding.dimension == Some(0) {
            return Err(RetrievalError::Config("embedding.dimension must be positive".to_string()));
        }
        if embedding.cache_enabled && embedding.cache_max_entries == 0 {
            return Err(RetrievalError::Config(
                "embedding.cache_max_entries must be positive when caching is enabled".to_string(),
            ));
        }
        if self.query.default_k == 0 {
            return Err(RetrievalError::Config("query.default_k must be positive".to_string()));
        }
        if let Some(min_score) = self.query.min_score {
            if !(-1.0..=1.0).contains(&min_score) {
                return Err(RetrievalError::Config(format!(
                    "query.min_score must be within [-1, 1], got {min_score}"
                )));
            }
        }
        Ok(())
    }
}

/// Which embedding provider to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI-compatible `/embeddings` HTTP API.
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    /// Deterministic offline hashing model.
    #[serde(rename = "hashing")]
    Hashing,
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: ProviderKind,

    /// Model to request (provider default when unset).
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible server.
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Output dimension. Requested from HTTP providers, used as-is by hashing.
    pub dimension: Option<usize>,

    /// Maximum texts per `embed_many` call.
    pub batch_size: usize,

    /// Whether to cache embeddings.
    pub cache_enabled: bool,

    /// Maximum cache size.
    pub cache_max_entries: usize,

    /// Persist the cache to this JSON file.
    pub cache_path: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAI,
            model: None,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: None,
            batch_size: 32,
            cache_enabled: true,
            cache_max_entries: 10000,
            cache_path: None,
        }
    }
}

impl EmbeddingConfig {
    /// Configuration for the offline hashing provider.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hashing,
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Construct the configured provider, wrapped in a cache when enabled.
    pub async fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            ProviderKind::OpenAI => {
                let mut provider = OpenAIProvider::new().with_api_key_from_env(&self.api_key_env);
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url.as_str());
                }
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.as_str());
                }
                if let Some(dimension) = self.dimension {
                    provider = provider.with_dimensions(dimension);
                }
                self.finish(provider).await
            }
            ProviderKind::Hashing => {
                let dimension = self.dimension.unwrap_or(DEFAULT_DIMENSION);
                self.finish(HashingProvider::new(dimension)).await
            }
        }
    }

    async fn finish<P>(&self, provider: P) -> Result<Arc<dyn EmbeddingProvider>>
    where
        P: EmbeddingProvider + 'static,
    {
        info!(
            "Using embedding provider {} (model: {}, dimension: {})",
            provider.name(),
            provider.model(),
            provider.dimension()
        );

        if !self.cache_enabled {
            return Ok(Arc::new(provider));
        }

        let cache = match &self.cache_path {
            Some(path) => EmbeddingCache::with_persistence(path, self.cache_max_entries).await?,
            None => EmbeddingCache::new(self.cache_max_entries),
        };
        Ok(Arc::new(CachedProvider::new(provider, cache)))
    }
}

/// Configuration for query processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of results when the caller gives none.
    pub default_k: usize,

    /// Drop results scoring below this similarity.
    pub min_score: Option<f64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: 4,
            min_score: None,
        }
    }
}

/// Settings for an external vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Collection name.
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: "documents".to_string(),
        }
    }
}
