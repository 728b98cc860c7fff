//! Boundary to persistent vector stores.
//!
//! External stores rank by *distance* (lower is better) while
//! [`SimilarityIndex`](crate::SimilarityIndex) ranks by cosine *similarity*
//! (higher is better). [`DistanceMetric::to_similarity`] is the single place
//! where one convention is converted into the other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::index::{DocumentRecord, Metadata};
use crate::shared::SharedIndex;
use crate::similarity::SimilarityResult;

/// Distance reported by a store, and how it maps back to similarity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance, `1 - cosine_similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance. Converts exactly only for unit-length vectors.
    L2,
    /// Negative inner product, as reported by pgvector's `<#>` operator.
    InnerProduct,
}

impl DistanceMetric {
    /// Convert a store distance into a higher-is-better similarity.
    ///
    /// - `Cosine`: `1 - d`
    /// - `L2`: `1 - d² / 2` (cosine similarity when both vectors are unit length)
    /// - `InnerProduct`: `-d`
    pub fn to_similarity(self, distance: f64) -> f64 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 - distance * distance / 2.0,
            DistanceMetric::InnerProduct => -distance,
        }
    }

    /// Inverse of [`DistanceMetric::to_similarity`] for non-negative distances.
    pub fn from_similarity(self, similarity: f64) -> f64 {
        match self {
            DistanceMetric::Cosine => 1.0 - similarity,
            DistanceMetric::L2 => (2.0 * (1.0 - similarity)).max(0.0).sqrt(),
            DistanceMetric::InnerProduct => -similarity,
        }
    }
}

/// A hit returned by a store, ranked by ascending distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceHit {
    /// Content identifier of the matched record.
    pub content: String,

    /// Store-specific distance, lower is better.
    pub distance: f64,

    /// Metadata stored with the record.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// A named collection of records in a vector store.
///
/// `similarity_search` must honor the contract of
/// [`SimilarityIndex::query`](crate::SimilarityIndex::query), expressed in
/// distances: at most `k` hits, best first, ties in insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection.
    fn collection(&self) -> &str;

    /// Distance metric of the store's index.
    fn metric(&self) -> DistanceMetric;

    /// Store records.
    async fn add(&self, records: Vec<DocumentRecord>) -> Result<()>;

    /// Return up to `k` hits ordered by ascending distance.
    async fn similarity_search(&self, query: &[f64], k: usize) -> Result<Vec<DistanceHit>>;
}

/// Translate store hits into similarity results, keeping their order.
///
/// The result's `position` is the hit's rank in the store's answer.
pub fn hits_to_results(metric: DistanceMetric, hits: Vec<DistanceHit>) -> Vec<SimilarityResult> {
    hits.into_iter()
        .enumerate()
        .map(|(rank, hit)| {
            SimilarityResult::new(hit.content, metric.to_similarity(hit.distance), rank)
                .with_metadata(hit.metadata)
        })
        .collect()
}

/// In-process [`VectorStore`] backed by a [`SharedIndex`], reporting cosine distance.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    collection: String,
    index: SharedIndex,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(collection: impl Into<String>) -> Self {
        Self::with_index(collection, SharedIndex::default())
    }

    /// Create a store over an existing index.
    pub fn with_index(collection: impl Into<String>, index: SharedIndex) -> Self {
        Self {
            collection: collection.into(),
            index,
        }
    }

    /// The backing index.
    pub fn index(&self) -> &SharedIndex {
        &self.index
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    async fn add(&self, records: Vec<DocumentRecord>) -> Result<()> {
        self.index.add(records).await
    }

    async fn similarity_search(&self, query: &[f64], k: usize) -> Result<Vec<DistanceHit>> {
        let metric = self.metric();
        let hits: Vec<DistanceHit> = self
            .index
            .query(query, k)
            .await?
            .into_iter()
            .map(|r| DistanceHit {
                content: r.content,
                distance: metric.from_similarity(r.score),
                metadata: r.metadata,
            })
            .collect();

        debug!(
            "Collection {} returned {} hits",
            self.collection,
            hits.len()
        );
        Ok(hits)
    }
}
