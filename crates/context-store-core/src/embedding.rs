//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for output validation, vector
//! serialization, similarity computation, and corpus fingerprinting.
//!
//! Concrete providers (hosted OpenAI-compatible API, local fastembed model)
//! live in the `context-store` app crate.

use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// Trait for embedding providers.
///
/// A provider converts texts into fixed-length vectors: one vector per
/// input, in input order, all of length [`dims`](EmbeddingProvider::dims).
/// Calls are synchronous and block the caller until the backend answers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    ///
    /// Backend failures are reported as [`StoreError::Provider`].
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` and check the provider kept its contract.
///
/// Rejects responses with the wrong number of vectors, vectors of the
/// wrong length, or non-finite components. An empty input never reaches
/// the provider.
pub fn embed_checked(provider: &dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = provider.embed(texts)?;

    if vectors.len() != texts.len() {
        return Err(StoreError::Provider(format!(
            "{} returned {} vectors for {} texts",
            provider.model_name(),
            vectors.len(),
            texts.len()
        )));
    }

    let dims = provider.dims();
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            return Err(StoreError::Provider(format!(
                "{} returned a {}-dim vector at position {}, expected {}",
                provider.model_name(),
                v.len(),
                i,
                dims
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::Provider(format!(
                "{} returned a non-finite component at position {}",
                provider.model_name(),
                i
            )));
        }
    }

    Ok(vectors)
}

/// Embed a single query text as a one-item batch.
pub fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    embed_checked(provider, &[text.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Provider("Empty embedding response".to_string()))
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use context_store_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
///
/// Trailing bytes that do not form a whole `f32` are dropped; callers
/// compare the decoded length against the expected dimensionality.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero vectors.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 || !(norm_a.is_finite() && norm_b.is_finite()) {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// SHA-256 over a sequence of texts, length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` differ.
///
/// Used to detect stored vectors that no longer match the records.
pub fn fingerprint<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for text in texts {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
