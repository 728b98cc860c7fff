//! Retrieval engine composing an embedding provider with a search backend.

use std::sync::Arc;

use docsim_embeddings::{
    DocumentRecord, EmbeddingError, EmbeddingProvider, IndexSnapshot, MemoryStore, Metadata,
    SharedIndex, SimilarityIndex, SimilarityResult, VectorStore, hits_to_results,
};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::Result;

/// A document waiting to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Text to embed; also the record's content identifier.
    pub content: String,

    /// Metadata carried into the index.
    pub metadata: Metadata,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Set a metadata field.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for Document {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

impl From<String> for Document {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

/// Where embedded documents live.
#[derive(Clone)]
pub enum SearchBackend {
    /// In-process similarity index.
    Local(SharedIndex),
    /// A distance-ranked vector store; hits are translated to similarity.
    Store(Arc<dyn VectorStore>),
}

/// Semantic retrieval over an injected embedding provider.
///
/// Results always rank by similarity, higher first, whichever backend holds
/// the vectors.
pub struct SemanticRetriever {
    /// Configuration.
    config: RetrievalConfig,

    /// Embedding provider shared with the caller.
    provider: Arc<dyn EmbeddingProvider>,

    /// Vector storage and search.
    backend: SearchBackend,
}

impl SemanticRetriever {
    /// Create a retriever over an empty local index.
    pub fn new(config: RetrievalConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_backend(config, provider, SearchBackend::Local(SharedIndex::default()))
    }

    /// Create a retriever over an existing local index.
    pub fn with_index(
        config: RetrievalConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: SimilarityIndex,
    ) -> Self {
        Self::with_backend(config, provider, SearchBackend::Local(SharedIndex::new(index)))
    }

    /// Create a retriever backed by an in-process [`MemoryStore`] named after
    /// `config.store.collection`.
    pub fn with_memory_store(
        config: RetrievalConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let store = MemoryStore::new(config.store.collection.clone());
        Self::with_backend(config, provider, SearchBackend::Store(Arc::new(store)))
    }

    /// Create a retriever with an explicit backend.
    pub fn with_backend(
        config: RetrievalConfig,
        provider: Arc<dyn EmbeddingProvider>,
        backend: SearchBackend,
    ) -> Self {
        Self {
            config,
            provider,
            backend,
        }
    }

    /// Build the configured provider and an empty local index.
    pub async fn from_config(config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        let provider = config.embedding.build_provider().await?;
        Ok(Self::new(config, provider))
    }

    /// Restore a local index from its snapshot.
    pub async fn from_snapshot(config: RetrievalConfig, snapshot: IndexSnapshot) -> Result<Self> {
        config.validate()?;
        let provider = config.embedding.build_provider().await?;
        let index = SimilarityIndex::from_snapshot(snapshot)?;
        info!("Restored index with {} records", index.len());
        Ok(Self::with_index(config, provider, index))
    }

    /// The retriever's configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The injected embedding provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed and store documents.
    ///
    /// Texts are embedded in batches of `embedding.batch_size`; vectors reach
    /// the backend in a single call only after every batch succeeded.
    pub async fn index_documents<D>(&self, documents: impl IntoIterator<Item = D>) -> Result<usize>
    where
        D: Into<Document>,
    {
        let documents: Vec<Document> = documents.into_iter().map(Into::into).collect();
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embedding.batch_size.max(1)) {
            let embedded = self.provider.embed_many(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "provider returned {} embeddings for {} texts",
                    embedded.len(),
                    batch.len()
                ))
                .into());
            }
            vectors.extend(embedded);
        }

        let records: Vec<DocumentRecord> = documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                DocumentRecord::new(doc.content, vector).with_metadata(doc.metadata)
            })
            .collect();
        let count = records.len();

        match &self.backend {
            SearchBackend::Local(index) => index.add(records).await?,
            SearchBackend::Store(store) => store.add(records).await?,
        }

        info!("Indexed {count} documents");
        Ok(count)
    }

    /// Return the `k` documents most similar to `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarityResult>> {
        debug!("Processing query: {query}");
        let vector = self.provider.embed_one(query).await?;
        self.search_vector(&vector, k).await
    }

    /// Search with `query.default_k`.
    pub async fn search_default(&self, query: &str) -> Result<Vec<SimilarityResult>> {
        self.search(query, self.config.query.default_k).await
    }

    /// Search with an already embedded query.
    pub async fn search_vector(&self, vector: &[f64], k: usize) -> Result<Vec<SimilarityResult>> {
        let min_score = self.config.query.min_score;
        let results = match &self.backend {
            SearchBackend::Local(index) => match min_score {
                Some(min) => index.search(vector, k, min).await?,
                None => index.query(vector, k).await?,
            },
            SearchBackend::Store(store) => {
                let hits = store.similarity_search(vector, k).await?;
                let mut results = hits_to_results(store.metric(), hits);
                if let Some(min) = min_score {
                    results.retain(|r| r.score >= min);
                }
                results
            }
        };

        debug!("Query returned {} results", results.len());
        Ok(results)
    }

    /// Snapshot of the local index; `None` for store backends.
    pub async fn snapshot(&self) -> Option<IndexSnapshot> {
        match &self.backend {
            SearchBackend::Local(index) => Some(index.snapshot().await),
            SearchBackend::Store(_) => None,
        }
    }

    /// Number of locally indexed documents; `None` for store backends.
    pub async fn len(&self) -> Option<usize> {
        match &self.backend {
            SearchBackend::Local(index) => Some(index.len().await),
            SearchBackend::Store(_) => None,
        }
    }
}
