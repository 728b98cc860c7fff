//! # Retrieval Engine
//!
//! Semantic document retrieval on top of `docsim-embeddings`:
//!
//! - **Configuration**: TOML-backed settings for providers and queries
//! - **Provider Injection**: the embedding provider is an explicit value
//! - **Backends**: an in-process index or any distance-ranked vector store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Semantic Retriever                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  documents ──► EmbeddingProvider ──► SharedIndex | VectorStore  │
//! │  query     ──► EmbeddingProvider ──► ranked SimilarityResults   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsim_retrieval::{RetrievalConfig, SemanticRetriever};
//!
//! let config = RetrievalConfig::load("docsim.toml")?;
//! let retriever = SemanticRetriever::from_config(config).await?;
//! retriever.index_documents(["first document", "second document"]).await?;
//! let results = retriever.search("document", 1).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use config::{EmbeddingConfig, ProviderKind, QueryConfig, RetrievalConfig, StoreConfig};
pub use engine::{Document, SearchBackend, SemanticRetriever};
pub use error::{Result, RetrievalError};

// Re-export from dependencies for convenience
pub use docsim_embeddings::{
    DocumentRecord, EmbeddingProvider, IndexSnapshot, SimilarityIndex, SimilarityResult,
};
