//! Semantic retrieval over a [`ContextIndex`].
//!
//! # Ranking Algorithm
//!
//! 1. Embed the query as a single-item batch.
//! 2. Cosine similarity against every stored vector, flattened order.
//! 3. Keep candidates with `score >= similarity_threshold`.
//! 4. Sort by score (desc), then insertion sequence (asc).
//! 5. Truncate to `top_k`.

use serde::Serialize;
use tracing::debug;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::error::{Result, StoreError};
use crate::index::ContextIndex;
use crate::models::ContextRecord;

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Search query text.
    pub query: &'a str,
    /// Maximum results to return. Non-positive values return nothing.
    pub top_k: i64,
    /// Minimum cosine similarity, inclusive, in `[0.0, 1.0]`.
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: ContextRecord,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Run a similarity search against `index`.
///
/// Returns an empty result without calling the provider when `top_k` is
/// not positive or the index holds no records. Any other query string,
/// blank included, is embedded and ranked.
pub fn search(
    index: &ContextIndex,
    provider: &dyn EmbeddingProvider,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchHit>> {
    let threshold = req.similarity_threshold;
    if threshold.is_nan() || !(0.0..=1.0).contains(&threshold) {
        return Err(StoreError::InvalidArgument(format!(
            "similarity_threshold must be within [0, 1], got {}",
            threshold
        )));
    }

    if req.top_k <= 0 || index.is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embed_query(provider, req.query)?;
    if query_vec.len() != index.dims() {
        return Err(StoreError::Provider(format!(
            "query vector has {} dims but the index holds {}-dim vectors",
            query_vec.len(),
            index.dims()
        )));
    }

    let records: Vec<&ContextRecord> = index.records().collect();
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    let top_k = usize::try_from(req.top_k).unwrap_or(usize::MAX);

    let ranked = rank(&query_vec, index.vectors(), &seqs, top_k, threshold);
    debug!(
        candidates = records.len(),
        returned = ranked.len(),
        top_k,
        threshold,
        "search ranked"
    );

    Ok(ranked
        .into_iter()
        .map(|(pos, score)| SearchHit {
            record: records[pos].clone(),
            score,
        })
        .collect())
}

/// Score and order candidate vectors against a query vector.
///
/// `seqs[i]` is the insertion sequence of `vectors[i]`; equal scores are
/// ordered by ascending sequence. Returns `(position, score)` pairs, where
/// `position` indexes into `vectors`.
pub fn rank(
    query: &[f32],
    vectors: &[Vec<f32>],
    seqs: &[u64],
    top_k: usize,
    threshold: f32,
) -> Vec<(usize, f32)> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| seq_at(seqs, a.0).cmp(&seq_at(seqs, b.0)))
    });
    scored.truncate(top_k);
    scored
}

fn seq_at(seqs: &[u64], pos: usize) -> u64 {
    seqs.get(pos).copied().unwrap_or(pos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContext;

    /// Maps a handful of words onto fixed directions.
    struct Animals;

    impl EmbeddingProvider for Animals {
        fn model_name(&self) -> &str {
            "animals"
        }
        fn dims(&self) -> usize {
            3
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "cat" => vec![1.0, 0.1, 0.0],
                    "feline" => vec![0.9, 0.2, 0.0],
                    "kitten" => vec![1.0, 0.15, 0.0],
                    "dog" => vec![0.0, 1.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0],
                })
                .collect())
        }
    }

    fn animals_index() -> ContextIndex {
        ContextIndex::empty(&Animals)
            .appended(
                vec![
                    NewContext::new("P", "cat", ""),
                    NewContext::new("P", "dog", ""),
                    NewContext::new("P", "feline", ""),
                ],
                &Animals,
            )
            .unwrap()
    }

    fn req(query: &str, top_k: i64, threshold: f32) -> SearchRequest<'_> {
        SearchRequest {
            query,
            top_k,
            similarity_threshold: threshold,
        }
    }

    #[test]
    fn test_kitten_prefers_cats() {
        let hits = search(&animals_index(), &Animals, &req("kitten", 2, 0.0)).unwrap();
        let summaries: Vec<&str> = hits.iter().map(|h| h.record.summary.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(summaries.contains(&"cat"));
        assert!(summaries.contains(&"feline"));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let idx = ContextIndex::empty(&Animals);
        assert!(search(&idx, &Animals, &req("cat", 3, 0.9)).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_top_k_returns_nothing() {
        let idx = animals_index();
        assert!(search(&idx, &Animals, &req("cat", 0, 0.0)).unwrap().is_empty());
        assert!(search(&idx, &Animals, &req("cat", -4, 0.0)).unwrap().is_empty());
    }

    #[test]
    fn test_blank_query_is_ranked() {
        let hits = search(&animals_index(), &Animals, &req("  ", 3, 0.0)).unwrap();
        let seqs: Vec<u64> = hits.iter().map(|h| h.record.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(hits.iter().all(|h| h.score == 0.0));

        assert!(search(&animals_index(), &Animals, &req("", 3, 0.5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let idx = animals_index();
        for t in [f32::NAN, -0.1, 1.5] {
            assert!(matches!(
                search(&idx, &Animals, &req("cat", 3, t)),
                Err(StoreError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_threshold_is_monotonic() {
        let idx = animals_index();
        let mut last = usize::MAX;
        for t in [0.0, 0.2, 0.5, 0.9, 0.99, 1.0] {
            let n = search(&idx, &Animals, &req("kitten", 10, t)).unwrap().len();
            assert!(n <= last, "threshold {} returned more hits", t);
            last = n;
        }
    }

    #[test]
    fn test_top_k_bounds_results() {
        let idx = animals_index();
        for k in 1..=5 {
            let n = search(&idx, &Animals, &req("kitten", k, 0.0)).unwrap().len();
            assert_eq!(n, (k as usize).min(3));
        }
    }

    #[test]
    fn test_rank_ties_broken_by_sequence() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let seqs = vec![7, 2, 5];
        let ranked = rank(&[1.0, 0.0], &vectors, &seqs, 3, 0.0);
        let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_rank_zero_vector_scores_zero() {
        let vectors = vec![vec![0.0, 0.0]];
        let ranked = rank(&[1.0, 0.0], &vectors, &[0], 1, 0.0);
        assert_eq!(ranked, vec![(0, 0.0)]);
    }
}
