//! Embedding trait, normalization policy, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! the [`EmbeddingPolicy`] shared by index building and querying, and
//! pure helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed, feature hashing) live
//! in the `film-rag` app crate.
//!
//! # Normalization contract
//!
//! Build and search must embed with the same model and the same
//! [`EmbeddingPolicy::normalize`] setting. Distances between a
//! normalized corpus and an unnormalized query are not comparable, so
//! the policy is stamped into the persisted index and checked when the
//! index is loaded.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{IndexError, IndexResult};
use crate::matrix::EmbeddingMatrix;

/// Trait for embedding providers.
///
/// `embed` returns one vector per input text, in input order, each of
/// length [`dims`](Embedder::dims). A call either returns every vector
/// or fails; there are no partial results.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-base-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// How texts are turned into index vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingPolicy {
    /// Scale every vector to unit L2 length.
    pub normalize: bool,
    /// Number of texts per provider call.
    pub batch_size: usize,
}

impl Default for EmbeddingPolicy {
    fn default() -> Self {
        Self {
            normalize: true,
            batch_size: 128,
        }
    }
}

/// Embed `texts` batch by batch into a resident matrix.
///
/// Only one batch of text is handed to the provider at a time.
/// `on_batch` is invoked with the number of rows embedded so far.
pub async fn embed_matrix<T, F>(
    embedder: &dyn Embedder,
    texts: &[T],
    policy: &EmbeddingPolicy,
    mut on_batch: F,
) -> IndexResult<EmbeddingMatrix>
where
    T: AsRef<str>,
    F: FnMut(usize),
{
    let dims = embedder.dims();
    let mut matrix = EmbeddingMatrix::with_capacity(dims, texts.len());

    for slice in texts.chunks(policy.batch_size.max(1)) {
        let batch: Vec<String> = slice.iter().map(|t| t.as_ref().to_owned()).collect();
        let vectors = embedder
            .embed(&batch)
            .await
            .map_err(|e| IndexError::Embedding(format!("{:#}", e)))?;

        if vectors.len() != batch.len() {
            return Err(IndexError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }

        for v in &vectors {
            if policy.normalize {
                matrix.push_normalized(v)?;
            } else {
                matrix.push_row(v)?;
            }
        }
        on_batch(matrix.rows());
    }

    Ok(matrix)
}

/// Embed a single query under the same policy as the corpus.
pub async fn embed_query(
    embedder: &dyn Embedder,
    text: &str,
    policy: &EmbeddingPolicy,
) -> IndexResult<Vec<f32>> {
    let mut vectors = embedder
        .embed(&[text.to_string()])
        .await
        .map_err(|e| IndexError::Embedding(format!("{:#}", e)))?;

    let mut v = vectors
        .pop()
        .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))?;

    if v.len() != embedder.dims() {
        return Err(IndexError::DimensionMismatch {
            expected: embedder.dims(),
            actual: v.len(),
        });
    }
    if policy.normalize {
        l2_normalize(&mut v);
    }
    Ok(v)
}

/// Scale a vector to unit L2 length in place.
///
/// Zero vectors are left untouched. Applying this twice yields the same
/// vector within float tolerance.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Squared Euclidean distance, the index's native metric.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use film_rag_core::embedding::{vec_to_blob, blob_to_vec};
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
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
