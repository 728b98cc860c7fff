//! Shared, concurrently queryable similarity index.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::index::{DocumentRecord, IndexSnapshot, SimilarityIndex};
use crate::similarity::SimilarityResult;

/// A cloneable handle to a [`SimilarityIndex`] behind a reader-writer lock.
///
/// Queries share the read lock and run in parallel. `add` holds the write
/// lock for the whole append, so a query sees either all of a batch or none
/// of it.
#[derive(Debug, Clone, Default)]
pub struct SharedIndex {
    inner: Arc<RwLock<SimilarityIndex>>,
}

impl SharedIndex {
    /// Wrap an existing index.
    pub fn new(index: SimilarityIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    /// Append records; see [`SimilarityIndex::add`].
    pub async fn add(&self, records: Vec<DocumentRecord>) -> Result<()> {
        let mut index = self.inner.write().await;
        index.add(records)?;
        debug!("Shared index now holds {} records", index.len());
        Ok(())
    }

    /// Top-k query; see [`SimilarityIndex::query`].
    pub async fn query(&self, query: &[f64], k: usize) -> Result<Vec<SimilarityResult>> {
        self.inner.read().await.query(query, k)
    }

    /// Query with a score floor; see [`SimilarityIndex::search`].
    pub async fn search(
        &self,
        query: &[f64],
        k: usize,
        min_score: f64,
    ) -> Result<Vec<SimilarityResult>> {
        self.inner.read().await.search(query, k, min_score)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Established dimension, if any.
    pub async fn dimension(&self) -> Option<usize> {
        self.inner.read().await.dimension()
    }

    /// Consistent copy of the current contents.
    pub async fn snapshot(&self) -> IndexSnapshot {
        self.inner.read().await.snapshot()
    }
}

impl From<SimilarityIndex> for SharedIndex {
    fn from(index: SimilarityIndex) -> Self {
        Self::new(index)
    }
}
