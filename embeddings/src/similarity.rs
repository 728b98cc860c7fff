//! Similarity computation for embeddings.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::index::Metadata;

fn check_dimensions(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(EmbeddingError::dimension(a.len(), b.len()));
    }
    Ok(())
}

/// Size of a vector, kept as its largest absolute component and the norm of
/// the vector divided by that component.
///
/// Squares and products are taken on the rescaled vector, so any finite
/// input stays in range. NaN components propagate into both fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Magnitude {
    scale: f64,
    unit_norm: f64,
}

impl Magnitude {
    pub(crate) fn of(v: &[f64]) -> Self {
        let scale = v.iter().fold(0.0f64, |max, x| {
            if x.is_nan() || x.abs() > max {
                x.abs()
            } else {
                max
            }
        });
        if scale == 0.0 {
            return Self {
                scale,
                unit_norm: 0.0,
            };
        }

        let unit_norm = v
            .iter()
            .map(|x| {
                let r = x / scale;
                r * r
            })
            .sum::<f64>()
            .sqrt();
        Self { scale, unit_norm }
    }

    fn norm(self) -> f64 {
        self.scale * self.unit_norm
    }
}

/// Euclidean (L2) norm of a vector.
pub fn norm(v: &[f64]) -> f64 {
    Magnitude::of(v).norm()
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dimensions(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Cosine similarity of two equal-length vectors with known magnitudes.
///
/// A zero vector on either side yields exactly `0.0`.
pub(crate) fn cosine_scaled(a: &[f64], ma: Magnitude, b: &[f64], mb: Magnitude) -> f64 {
    if ma.scale == 0.0 || mb.scale == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x / ma.scale) * (y / mb.scale))
        .sum();
    (dot / (ma.unit_norm * mb.unit_norm)).clamp(-1.0, 1.0)
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors (or a zero vector on either side)
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dimensions(a, b)?;
    Ok(cosine_scaled(a, Magnitude::of(a), b, Magnitude::of(b)))
}

/// Compute the euclidean distance between two embeddings.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dimensions(a, b)?;
    let sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    Ok(sum.sqrt())
}

/// A similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Content identifier of the matched record.
    pub content: String,

    /// Cosine similarity score, higher is better.
    pub score: f64,

    /// Insertion position of the record in its index, or its rank when the
    /// result was translated from a store hit.
    pub position: usize,

    /// Metadata copied from the record.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl SimilarityResult {
    /// Create a new similarity result.
    pub fn new(content: impl Into<String>, score: f64, position: usize) -> Self {
        Self {
            content: content.into(),
            score,
            position,
            metadata: Metadata::new(),
        }
    }

    /// Add metadata to the result.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Ranking order: higher score first, then lower position first. NaN scores
/// rank after every number.
fn rank_order(a: &(OrderedFloat<f64>, usize), b: &(OrderedFloat<f64>, usize)) -> Ordering {
    a.0.0
        .is_nan()
        .cmp(&b.0.0.is_nan())
        .then_with(|| b.0.cmp(&a.0))
        .then(a.1.cmp(&b.1))
}

/// Keep the `k` best `(score, position)` pairs, sorted best first.
///
/// The ordering is total, so equal inputs always produce equal outputs.
pub(crate) fn select_top_k(
    mut scored: Vec<(OrderedFloat<f64>, usize)>,
    k: usize,
) -> Vec<(OrderedFloat<f64>, usize)> {
    if k == 0 {
        return Vec::new();
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_unstable_by(rank_order);
    scored
}

/// Find the top-k most similar embeddings among `candidates`.
///
/// Candidates scoring below `min_score` are dropped. Ties keep candidate order.
pub fn find_top_k(
    query: &[f64],
    candidates: &[(String, Embedding)],
    k: usize,
    min_score: f64,
) -> Result<Vec<SimilarityResult>> {
    let query_magnitude = Magnitude::of(query);
    let mut scored = Vec::with_capacity(candidates.len());

    for (position, (_, embedding)) in candidates.iter().enumerate() {
        check_dimensions(query, embedding)?;
        let magnitude = Magnitude::of(embedding);
        let score = cosine_scaled(query, query_magnitude, embedding, magnitude);
        if score >= min_score {
            scored.push((OrderedFloat(score), position));
        }
    }

    Ok(select_top_k(scored, k)
        .into_iter()
        .map(|(score, position)| {
            SimilarityResult::new(candidates[position].0.clone(), score.0, position)
        })
        .collect())
}

/// Normalize an embedding to unit length. Zero and non-finite vectors are
/// left untouched.
pub fn normalize(embedding: &mut [f64]) {
    let Magnitude { scale, unit_norm } = Magnitude::of(embedding);
    if scale > 0.0 && unit_norm.is_finite() {
        for x in embedding.iter_mut() {
            *x = *x / scale / unit_norm;
        }
    }
}

/// Compute the average of multiple embeddings.
pub fn average(embeddings: &[Embedding]) -> Result<Embedding> {
    let Some(first) = embeddings.first() else {
        return Ok(Vec::new());
    };

    let dim = first.len();
    for e in embeddings {
        if e.len() != dim {
            return Err(EmbeddingError::dimension(dim, e.len()));
        }
    }

    let n = embeddings.len() as f64;
    let mut result = vec![0.0f64; dim];

    for embedding in embeddings {
        for (slot, val) in result.iter_mut().zip(embedding.iter()) {
            *slot += val / n;
        }
    }

    Ok(result)
}
