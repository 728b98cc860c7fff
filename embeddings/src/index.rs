//! Similarity index for brute-force embedding lookups.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{Magnitude, SimilarityResult, cosine_scaled, select_top_k};

/// Opaque metadata attached to a record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A document paired with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// The original text or a stable external reference.
    pub content: String,

    /// The embedding vector, stored as given.
    pub vector: Embedding,

    /// Associated metadata.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl DocumentRecord {
    /// Create a record without metadata.
    pub fn new(content: impl Into<String>, vector: Embedding) -> Self {
        Self {
            content: content.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a single metadata field.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Length of the record's vector.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A stored record together with its precomputed magnitude.
#[derive(Debug, Clone)]
struct IndexEntry {
    record: DocumentRecord,
    magnitude: Magnitude,
}

impl IndexEntry {
    fn new(record: DocumentRecord) -> Self {
        let magnitude = Magnitude::of(&record.vector);
        Self { record, magnitude }
    }

    fn score(&self, query: &[f64], query_magnitude: Magnitude) -> f64 {
        cosine_scaled(query, query_magnitude, &self.record.vector, self.magnitude)
    }
}

/// Serializable form of a [`SimilarityIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Established dimension, if any.
    pub dimension: Option<usize>,

    /// Records in insertion order.
    pub records: Vec<DocumentRecord>,
}

/// An in-memory similarity index over document embeddings.
///
/// Records keep their insertion order, which is the tie-break for equal
/// scores. Every record shares one dimension, fixed by the first record
/// ingested or by [`SimilarityIndex::with_dimension`]. Existing records are
/// never modified and queries never mutate the index.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    /// Stored entries, in insertion order.
    entries: Vec<IndexEntry>,

    /// Dimension shared by every stored vector.
    dimension: Option<usize>,
}

impl SimilarityIndex {
    /// Create an empty index whose dimension is set by the first ingest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index that only accepts vectors of `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimension: Some(dimension),
        }
    }

    /// Build an index from an initial batch of records.
    pub fn build(records: impl IntoIterator<Item = DocumentRecord>) -> Result<Self> {
        let mut index = Self::new();
        index.add(records)?;
        Ok(index)
    }

    /// Append records to the index.
    ///
    /// Every record is validated before any is stored, so on error the
    /// index is left exactly as it was.
    pub fn add(&mut self, records: impl IntoIterator<Item = DocumentRecord>) -> Result<()> {
        let records: Vec<DocumentRecord> = records.into_iter().collect();
        let Some(first) = records.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.dimension());
        if let Some(bad) = records.iter().find(|r| r.dimension() != expected) {
            return Err(EmbeddingError::dimension(expected, bad.dimension()));
        }

        let count = records.len();
        self.entries.reserve(count);
        self.entries.extend(records.into_iter().map(IndexEntry::new));
        self.dimension = Some(expected);

        debug!(
            "Added {count} records to similarity index ({} total)",
            self.entries.len()
        );
        Ok(())
    }

    /// Append a single record.
    pub fn add_one(&mut self, record: DocumentRecord) -> Result<()> {
        self.add(std::iter::once(record))
    }

    /// Return the `k` records most similar to `query`, best first.
    ///
    /// Scores are cosine similarities; equal scores rank by insertion order.
    /// A `k` above the record count returns every record ranked.
    pub fn query(&self, query: &[f64], k: usize) -> Result<Vec<SimilarityResult>> {
        self.rank(query, k, None)
    }

    /// Like [`SimilarityIndex::query`], dropping results below `min_score`.
    pub fn search(&self, query: &[f64], k: usize, min_score: f64) -> Result<Vec<SimilarityResult>> {
        self.rank(query, k, Some(min_score))
    }

    /// Search for the single most similar record.
    pub fn search_one(&self, query: &[f64], min_score: f64) -> Result<Option<SimilarityResult>> {
        let results = self.search(query, 1, min_score)?;
        Ok(results.into_iter().next())
    }

    fn rank(
        &self,
        query: &[f64],
        k: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SimilarityResult>> {
        match self.dimension {
            Some(dimension) if query.len() != dimension => {
                return Err(EmbeddingError::dimension(dimension, query.len()));
            }
            _ => {}
        }
        if self.entries.is_empty() {
            return Err(EmbeddingError::EmptyIndex);
        }

        let query_magnitude = Magnitude::of(query);
        let scored: Vec<(OrderedFloat<f64>, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let score = entry.score(query, query_magnitude);
                (OrderedFloat(score), position)
            })
            .filter(|(score, _)| min_score.is_none_or(|min| score.0 >= min))
            .collect();

        let results: Vec<SimilarityResult> = select_top_k(scored, k)
            .into_iter()
            .map(|(score, position)| {
                let record = &self.entries[position].record;
                SimilarityResult::new(record.content.clone(), score.0, position)
                    .with_metadata(record.metadata.clone())
            })
            .collect();

        debug!(
            "Similarity query returned {} of {} records",
            results.len(),
            self.entries.len()
        );
        Ok(results)
    }

    /// Cosine similarity between two stored records, by position.
    pub fn similarity(&self, a: usize, b: usize) -> Option<f64> {
        let a = self.entries.get(a)?;
        let b = self.entries.get(b)?;
        Some(a.score(&b.record.vector, b.magnitude))
    }

    /// Get a record by insertion position.
    pub fn get(&self, position: usize) -> Option<&DocumentRecord> {
        self.entries.get(position).map(|e| &e.record)
    }

    /// Iterate over records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    /// The established dimension, if any record was ingested or it was pinned.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Get the number of records in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy the index into its serializable form.
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            dimension: self.dimension,
            records: self.records().cloned().collect(),
        }
    }

    /// Rebuild an index from a snapshot, re-validating every dimension.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        let mut index = match snapshot.dimension {
            Some(dimension) => Self::with_dimension(dimension),
            None => Self::new(),
        };
        index.add(snapshot.records)?;
        Ok(index)
    }

    /// Serialize the index to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Load an index from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: IndexSnapshot = serde_json::from_str(json)?;
        let index = Self::from_snapshot(snapshot)?;
        info!("Loaded {} records into similarity index", index.len());
        Ok(index)
    }

    /// Append every record of `other`, keeping its order after ours.
    pub fn merge(&mut self, other: SimilarityIndex) -> Result<()> {
        if let (Some(ours), Some(theirs)) = (self.dimension, other.dimension) {
            if ours != theirs {
                return Err(EmbeddingError::dimension(ours, theirs));
            }
        }

        let count = other.entries.len();
        if self.dimension.is_none() {
            self.dimension = other.dimension;
        }
        self.entries.extend(other.entries);

        info!("Merged {count} records into similarity index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(content: &str, vector: &[f64]) -> DocumentRecord {
        DocumentRecord::new(content, vector.to_vec())
    }

    fn contents(results: &[SimilarityResult]) -> Vec<&str> {
        results.iter().map(|r| r.content.as_str()).collect()
    }

    fn sample() -> Vec<DocumentRecord> {
        vec![
            record("a", &[1.0, 0.0, 0.0]),
            record("b", &[0.0, 1.0, 0.0]),
            record("c", &[0.7, 0.7, 0.0]),
            record("d", &[-1.0, 0.2, 0.0]),
        ]
    }

    #[test]
    fn test_build_and_get() {
        let index = SimilarityIndex::build(sample()).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.dimension(), Some(3));
        assert_eq!(index.get(2).map(|r| r.content.as_str()), Some("c"));
        assert!(index.get(4).is_none());
    }

    #[test]
    fn test_query_top_k() {
        let index = SimilarityIndex::build(sample()).unwrap();
        let results = index.query(&[1.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(contents(&results), vec!["a", "c"]);
        assert!((results[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_query_k_exceeding_len_returns_all_ranked() {
        let index = SimilarityIndex::build(sample()).unwrap();
        let results = index.query(&[1.0, 0.1, 0.0], 100).unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(contents(&results), vec!["a", "c", "b", "d"]);
        assert!(results[3].score < 0.0);
    }

    #[test]
    fn test_query_k_zero_is_empty() {
        let index = SimilarityIndex::build(sample()).unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_is_deterministic() {
        let index = SimilarityIndex::build(vec![
            record("x", &[1.0, 1.0]),
            record("y", &[1.0, 1.0]),
            record("z", &[0.0, 1.0]),
            record("w", &[1.0, 1.0]),
        ])
        .unwrap();

        let first = index.query(&[1.0, 1.0], 3).unwrap();
        let second = index.query(&[1.0, 1.0], 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(contents(&first), vec!["x", "y", "w"]);
    }

    #[test]
    fn test_self_similarity() {
        let records = vec![
            record("p", &[0.3, -0.5, 0.8]),
            record("q", &[0.9, 0.1, 0.1]),
            record("r", &[-0.2, 0.7, 0.3]),
        ];
        let index = SimilarityIndex::build(records.clone()).unwrap();

        for r in &records {
            let top = index.query(&r.vector, 1).unwrap();
            assert_eq!(top[0].content, r.content);
            assert!((top[0].score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_duplicate_vectors_rank_by_insertion() {
        let index = SimilarityIndex::build(vec![
            record("first", &[0.5, 0.5]),
            record("second", &[0.5, 0.5]),
        ])
        .unwrap();

        let top = index.query(&[0.5, 0.5], 1).unwrap();
        assert_eq!(top[0].content, "first");
        assert_eq!(top[0].position, 0);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let index = SimilarityIndex::build(vec![
            record("zero", &[0.0, 0.0, 0.0]),
            record("neg", &[-1.0, 0.0, 0.0]),
        ])
        .unwrap();

        let results = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(contents(&results), vec!["zero", "neg"]);
        assert_eq!(results[0].score, 0.0);

        let results = index.query(&[0.0, 0.0, 0.0], 2).unwrap();
        assert!(results.iter().all(|r| r.score == 0.0));
        assert_eq!(contents(&results), vec!["zero", "neg"]);
    }

    #[test]
    fn test_large_components_keep_cosine_scores() {
        let index = SimilarityIndex::build(vec![
            record("unit", &[1.0, 0.0]),
            record("big", &[1e200, 0.0]),
            record("ortho", &[0.0, 1.0]),
        ])
        .unwrap();

        let results = index.query(&[1.0, 0.0], 3).unwrap();
        assert_eq!(contents(&results), vec!["unit", "big", "ortho"]);
        assert!((results[1].score - 1.0).abs() < 1e-12);
        assert_eq!(results[2].score, 0.0);

        let results = index.query(&[1e200, 0.0], 3).unwrap();
        assert_eq!(contents(&results), vec!["unit", "big", "ortho"]);
        assert!(results.iter().all(|r| (-1.0..=1.0).contains(&r.score)));
        assert!((index.similarity(0, 1).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_record_ranks_after_exact_match() {
        let index = SimilarityIndex::build(vec![
            record("nan", &[f64::NAN, 0.0]),
            record("exact", &[1.0, 0.0]),
            record("opposite", &[-1.0, 0.0]),
        ])
        .unwrap();

        let top = index.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(contents(&top), vec!["exact"]);

        let all = index.query(&[1.0, 0.0], 3).unwrap();
        assert_eq!(contents(&all), vec!["exact", "opposite", "nan"]);
        assert!(all[2].score.is_nan());

        let floored = index.search(&[1.0, 0.0], 3, -1.0).unwrap();
        assert_eq!(contents(&floored), vec!["exact", "opposite"]);
    }

    #[test]
    fn test_build_dimension_mismatch() {
        let result = SimilarityIndex::build(vec![
            record("v1", &[1.0, 0.0, 0.0]),
            record("v2", &[1.0, 0.0, 0.0, 0.0]),
        ]);
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = SimilarityIndex::build(sample()).unwrap();
        assert!(matches!(
            index.query(&[1.0, 0.0], 1),
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_add_dimension_mismatch_is_atomic() {
        let mut index = SimilarityIndex::build(sample()).unwrap();
        let before = index.snapshot();

        let result = index.add(vec![record("ok", &[0.0, 0.0, 1.0]), record("bad", &[1.0])]);

        assert!(matches!(result, Err(EmbeddingError::DimensionMismatch { .. })));
        assert_eq!(index.snapshot(), before);
    }

    #[test]
    fn test_pinned_dimension() {
        let mut index = SimilarityIndex::with_dimension(2);
        assert!(index.add_one(record("bad", &[1.0, 0.0, 0.0])).is_err());
        assert!(index.is_empty());
        assert!(matches!(
            index.query(&[1.0], 1),
            Err(EmbeddingError::DimensionMismatch { .. })
        ));
        index.add_one(record("good", &[1.0, 0.0])).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_empty_index() {
        let index = SimilarityIndex::new();
        assert!(matches!(
            index.query(&[1.0, 0.0], 3),
            Err(EmbeddingError::EmptyIndex)
        ));

        let built = SimilarityIndex::build(Vec::new()).unwrap();
        assert!(built.dimension().is_none());
        assert!(matches!(built.query(&[1.0], 1), Err(EmbeddingError::EmptyIndex)));

        let pinned = SimilarityIndex::with_dimension(2);
        assert!(matches!(
            pinned.query(&[1.0, 0.0], 1),
            Err(EmbeddingError::EmptyIndex)
        ));
    }

    #[test]
    fn test_incremental_add_matches_single_build() {
        let all = sample();
        let (a, b) = all.split_at(2);

        let mut incremental = SimilarityIndex::build(a.to_vec()).unwrap();
        incremental.add(b.to_vec()).unwrap();
        let single = SimilarityIndex::build(all.clone()).unwrap();

        let query = [0.6, 0.6, 0.1];
        assert_eq!(
            incremental.query(&query, 10).unwrap(),
            single.query(&query, 10).unwrap()
        );
    }

    #[test]
    fn test_add_does_not_change_prior_records() {
        let mut index = SimilarityIndex::build(sample()).unwrap();
        let before: Vec<DocumentRecord> = index.records().cloned().collect();

        index.add(vec![record("e", &[0.0, 0.0, 1.0])]).unwrap();

        let after: Vec<DocumentRecord> = index.records().take(4).cloned().collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_reference_scores() {
        let doc1 = vec![1.0, 0.0];
        let doc2 = vec![0.8, 0.6];
        let doc3 = vec![0.3, (1.0f64 - 0.09).sqrt()];
        let index = SimilarityIndex::build(vec![
            DocumentRecord::new("doc2", doc2),
            DocumentRecord::new("doc3", doc3),
        ])
        .unwrap();

        let results = index.query(&doc1, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "doc2");
        assert!((results[0].score - 0.8).abs() < 1e-9);

        let both = index.query(&doc1, 2).unwrap();
        assert!((both[1].score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_search_min_score_and_metadata() {
        let index = SimilarityIndex::build(vec![
            record("a", &[1.0, 0.0]).with_field("page", 3),
            record("b", &[0.0, 1.0]),
        ])
        .unwrap();

        let results = index.search(&[1.0, 0.0], 5, 0.5).unwrap();
        assert_eq!(contents(&results), vec!["a"]);
        assert_eq!(results[0].metadata.get("page"), Some(&serde_json::json!(3)));

        assert!(index.search_one(&[-1.0, 0.0], 0.1).unwrap().is_none());
    }

    #[test]
    fn test_similarity_between_records() {
        let index = SimilarityIndex::build(sample()).unwrap();
        let sim = index.similarity(0, 1).unwrap();
        assert_eq!(sim, 0.0);
        assert!(index.similarity(0, 9).is_none());
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let index = SimilarityIndex::build(sample()).unwrap();
        let restored = SimilarityIndex::from_json(&index.to_json().unwrap()).unwrap();

        assert_eq!(restored.snapshot(), index.snapshot());
    }

    #[test]
    fn test_from_json_rejects_inconsistent_dimension() {
        let json = r#"{"dimension":2,"records":[{"content":"a","vector":[1.0,0.0,0.0]}]}"#;
        assert!(matches!(
            SimilarityIndex::from_json(json),
            Err(EmbeddingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_merge() {
        let mut left = SimilarityIndex::build(sample()).unwrap();
        let right = SimilarityIndex::build(vec![record("e", &[0.0, 0.0, 1.0])]).unwrap();
        left.merge(right).unwrap();
        assert_eq!(left.get(4).map(|r| r.content.as_str()), Some("e"));

        let other = SimilarityIndex::build(vec![record("f", &[1.0])]).unwrap();
        assert!(left.merge(other).is_err());
        assert_eq!(left.len(), 5);
    }
}
