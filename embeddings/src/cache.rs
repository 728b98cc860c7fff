//! Embedding cache for avoiding redundant provider calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 of the model and text.
    pub key: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Unix timestamp of insertion.
    pub created_at: i64,

    /// Insertion sequence, used for oldest-first eviction.
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
}

impl CacheState {
    fn insert(&mut self, key: String, model: &str, embedding: Embedding, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= max_entries {
                let Some(oldest) = self
                    .entries
                    .values()
                    .min_by_key(|e| e.sequence)
                    .map(|e| e.key.clone())
                else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }

        let entry = CacheEntry {
            key: key.clone(),
            embedding,
            model: model.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, entry);
    }
}

/// Bounded cache of embeddings keyed by model and text.
pub struct EmbeddingCache {
    /// In-memory cache.
    state: Arc<RwLock<CacheState>>,

    /// Path for persistent cache storage.
    cache_path: Option<PathBuf>,

    /// Maximum number of entries; zero disables caching.
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a new in-memory cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            cache_path: None,
            max_entries,
        }
    }

    /// Create a cache persisted as JSON at `path`, loading it if present.
    pub async fn with_persistence(path: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        let cache = Self {
            cache_path: Some(path.as_ref().to_path_buf()),
            ..Self::new(max_entries)
        };
        cache.load().await?;
        Ok(cache)
    }

    /// Compute the cache key for a text under a model.
    fn hash_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        let state = self.state.read().await;
        state.entries.get(&key).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) -> Result<()> {
        self.put_many(model, vec![(text.to_string(), embedding)]).await
    }

    /// Put several embeddings in the cache, persisting once.
    pub async fn put_many(&self, model: &str, items: Vec<(String, Embedding)>) -> Result<()> {
        if self.max_entries == 0 || items.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            for (text, embedding) in items {
                let key = Self::hash_key(&text, model);
                state.insert(key, model, embedding, self.max_entries);
            }
            debug!(
                "Cache holds {} embeddings (model: {model})",
                state.entries.len()
            );
        }

        if self.cache_path.is_some() {
            self.save().await?;
        }
        Ok(())
    }

    /// Check if an embedding is cached.
    pub async fn contains(&self, text: &str, model: &str) -> bool {
        let key = Self::hash_key(text, model);
        self.state.read().await.entries.contains_key(&key)
    }

    /// Remove an embedding from the cache.
    pub async fn remove(&self, text: &str, model: &str) {
        let key = Self::hash_key(text, model);
        self.state.write().await.entries.remove(&key);
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.state.write().await.entries.clear();
        info!("Cleared embedding cache");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let mut models: Vec<String> =
            state.entries.values().map(|e| e.model.clone()).collect();
        models.sort_unstable();
        models.dedup();
        CacheStats {
            entries: state.entries.len(),
            max_entries: self.max_entries,
            models,
        }
    }

    /// Save cache to disk.
    async fn save(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };

        let content = {
            let state = self.state.read().await;
            let mut entries: Vec<&CacheEntry> = state.entries.values().collect();
            entries.sort_by_key(|e| e.sequence);
            serde_json::to_string(&entries)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        debug!("Saved embedding cache to {}", path.display());
        Ok(())
    }

    /// Load cache from disk.
    async fn load(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if self.max_entries == 0 || !fs::try_exists(path).await? {
            return Ok(());
        }

        let content = fs::read_to_string(path).await?;
        let mut entries: Vec<CacheEntry> = serde_json::from_str(&content)
            .map_err(|e| EmbeddingError::Cache(format!("corrupt cache {}: {e}", path.display())))?;
        entries.sort_by_key(|e| e.sequence);

        let mut state = self.state.write().await;
        for CacheEntry {
            key,
            embedding,
            model,
            ..
        } in entries
        {
            state.insert(key, &model, embedding, self.max_entries);
        }

        info!("Loaded {} cache entries from disk", state.entries.len());
        Ok(())
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Models with cached embeddings.
    pub models: Vec<String>,
}

/// A provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Get the wrapped provider.
    pub fn inner(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> &str {
        self.provider.model()
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let model = self.provider.model();
        if let Some(embedding) = self.cache.get(text, model).await {
            debug!("Cache hit for embedding");
            return Ok(embedding);
        }

        let embedding = self.provider.embed_one(text).await?;
        self.cache.put(text, model, embedding.clone()).await?;
        Ok(embedding)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = self.provider.model();
        let mut slots: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();

        for text in texts {
            let cached = self.cache.get(text, model).await;
            if cached.is_none() {
                misses.push(text.clone());
            }
            slots.push(cached);
        }

        debug!(
            "Embedding cache: {} hits, {} misses",
            texts.len() - misses.len(),
            misses.len()
        );

        if !misses.is_empty() {
            let fresh = self.provider.embed_many(&misses).await?;
            if fresh.len() != misses.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    misses.len(),
                    fresh.len()
                )));
            }

            let mut fresh_iter = fresh.iter().cloned();
            for slot in slots.iter_mut().filter(|s| s.is_none()) {
                *slot = fresh_iter.next();
            }
            self.cache
                .put_many(model, misses.into_iter().zip(fresh).collect())
                .await?;
        }

        slots
            .into_iter()
            .map(|s| s.ok_or_else(|| EmbeddingError::Cache("missing embedding".to_string())))
            .collect()
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingProvider;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: HashingProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            self.inner.model()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed_one(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_one(text).await
        }
    }

    fn counting(dimension: usize) -> CountingProvider {
        CountingProvider {
            inner: HashingProvider::new(dimension),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100);
        let embedding = vec![1.0, 2.0, 3.0];

        cache
            .put("hello", "model-1", embedding.clone())
            .await
            .unwrap();

        assert_eq!(cache.get("hello", "model-1").await, Some(embedding));
        assert!(cache.get("hello", "model-2").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = EmbeddingCache::new(100);
        let result = cache.get("not cached", "model-1").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest() {
        let cache = EmbeddingCache::new(2);

        cache.put("a", "model", vec![1.0]).await.unwrap();
        cache.put("b", "model", vec![2.0]).await.unwrap();
        cache.put("c", "model", vec![3.0]).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.models, vec!["model".to_string()]);
        assert!(!cache.contains("a", "model").await);
        assert!(cache.contains("c", "model").await);
    }

    #[tokio::test]
    async fn test_cache_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cache.json");

        let cache = EmbeddingCache::with_persistence(&path, 10).await.unwrap();
        cache.put("hello", "m", vec![0.5, 0.25]).await.unwrap();

        let reloaded = EmbeddingCache::with_persistence(&path, 10).await.unwrap();
        assert_eq!(reloaded.get("hello", "m").await, Some(vec![0.5, 0.25]));
    }

    #[tokio::test]
    async fn test_cached_provider_skips_repeat_calls() {
        let provider = CachedProvider::new(counting(16), EmbeddingCache::new(100));

        let first = provider.embed_one("same text").await.unwrap();
        let second = provider.embed_one("same text").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_provider_batch_preserves_order() {
        let provider = CachedProvider::new(counting(16), EmbeddingCache::new(100));
        provider.embed_one("b").await.unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = provider.embed_many(&texts).await.unwrap();

        let reference = HashingProvider::new(16);
        for (text, embedding) in texts.iter().zip(&batch) {
            assert_eq!(&reference.embed_text(text), embedding);
        }
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }
}
