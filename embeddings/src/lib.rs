//! # Embeddings
//!
//! This crate provides embedding generation and cosine similarity search
//! for docsim.
//!
//! ## Features
//!
//! - **Similarity Index**: Brute-force top-k retrieval by cosine similarity
//! - **Providers**: OpenAI-compatible HTTP APIs and a deterministic hashing model
//! - **Caching**: Avoid re-embedding text that was already seen
//! - **Store Boundary**: Adapter trait for distance-ranked external stores
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► SimilarityIndex            │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  CachedProvider                  SharedIndex / VectorStore      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```
//! use docsim_embeddings::{DocumentRecord, SimilarityIndex};
//!
//! # fn main() -> docsim_embeddings::Result<()> {
//! let index = SimilarityIndex::build(vec![
//!     DocumentRecord::new("rust", vec![1.0, 0.0]),
//!     DocumentRecord::new("python", vec![0.0, 1.0]),
//! ])?;
//!
//! let hits = index.query(&[0.9, 0.1], 1)?;
//! assert_eq!(hits[0].content, "rust");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod provider;
pub mod shared;
pub mod similarity;
pub mod store;

pub use cache::{CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use index::{DocumentRecord, IndexSnapshot, Metadata, SimilarityIndex};
pub use provider::{EmbeddingProvider, HashingProvider, OpenAIProvider};
pub use shared::SharedIndex;
pub use similarity::{SimilarityResult, cosine_similarity};
pub use store::{DistanceHit, DistanceMetric, MemoryStore, VectorStore, hits_to_results};

/// A dense vector embedding.
pub type Embedding = Vec<f64>;

/// Dimension produced by `mxbai-embed-large` and similar 1024-d models.
pub const DEFAULT_DIMENSION: usize = 1024;
