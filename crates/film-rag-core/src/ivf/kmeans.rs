//! Lloyd's k-means for the coarse quantizer.
//!
//! Initialization samples `k` distinct training rows from a seeded
//! ChaCha8 stream, so a given `(data, k, seed)` always yields the same
//! centroids. Assignment is the only step that runs on the executor;
//! centroid sums are accumulated sequentially in row order, which keeps
//! the result bit-identical whether or not a worker pool is used.

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::embedding::l2_squared;
use crate::matrix::EmbeddingMatrix;

use super::Executor;

/// Relative perturbation applied when splitting a cluster to refill an
/// empty one.
const SPLIT_EPS: f32 = 1.0 / 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KMeansParams {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            iterations: 20,
            seed: 1234,
        }
    }
}

/// Fit `k` centroids to the rows of `data`. Caller guarantees
/// `1 <= k <= data.rows()`.
pub(crate) fn train(
    data: &EmbeddingMatrix,
    k: usize,
    params: &KMeansParams,
    exec: Executor<'_>,
) -> Vec<f32> {
    let dims = data.dims();
    let n = data.rows();

    let mut centroids = Vec::with_capacity(k * dims);
    for row in sample_rows(n, k, params.seed) {
        centroids.extend_from_slice(data.row(row));
    }

    let mut assignment = vec![usize::MAX; n];
    for iter in 0..params.iterations {
        let next = assign_all(data, &centroids, exec);
        let changed = next
            .iter()
            .zip(assignment.iter())
            .filter(|(a, b)| a != b)
            .count();
        assignment = next;

        update_centroids(data, &assignment, &mut centroids, k);
        split_empty_clusters(data, &assignment, &mut centroids, k);

        tracing::debug!(iteration = iter, changed, "k-means iteration");
        if changed == 0 {
            break;
        }
    }

    centroids
}

/// Index of the nearest centroid and its squared distance.
pub(crate) fn nearest(centroids: &[f32], dims: usize, v: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (i, c) in centroids.chunks_exact(dims).enumerate() {
        let d = l2_squared(c, v);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Nearest-centroid assignment for every row.
pub(crate) fn assign_all(
    data: &EmbeddingMatrix,
    centroids: &[f32],
    exec: Executor<'_>,
) -> Vec<usize> {
    let dims = data.dims();
    match exec {
        Executor::Sequential => data
            .iter()
            .map(|v| nearest(centroids, dims, v).0)
            .collect(),
        Executor::Pool(pool) => pool.install(|| {
            data.as_slice()
                .par_chunks_exact(dims)
                .map(|v| nearest(centroids, dims, v).0)
                .collect()
        }),
    }
}

fn update_centroids(data: &EmbeddingMatrix, assignment: &[usize], centroids: &mut [f32], k: usize) {
    let dims = data.dims();
    let mut sums = vec![0.0f64; k * dims];
    let mut counts = vec![0usize; k];

    for (v, &c) in data.iter().zip(assignment.iter()) {
        counts[c] += 1;
        let acc = &mut sums[c * dims..(c + 1) * dims];
        for (s, x) in acc.iter_mut().zip(v.iter()) {
            *s += *x as f64;
        }
    }

    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let inv = 1.0 / counts[c] as f64;
        for d in 0..dims {
            centroids[c * dims + d] = (sums[c * dims + d] * inv) as f32;
        }
    }
}

/// Refill empty clusters by splitting the currently largest one into two
/// slightly perturbed copies.
fn split_empty_clusters(
    data: &EmbeddingMatrix,
    assignment: &[usize],
    centroids: &mut [f32],
    k: usize,
) {
    let dims = data.dims();
    let mut counts = vec![0usize; k];
    for &c in assignment {
        counts[c] += 1;
    }

    for empty in 0..k {
        if counts[empty] != 0 {
            continue;
        }
        let largest = counts
            .iter()
            .enumerate()
            .max_by_key(|(i, n)| (**n, usize::MAX - *i));
        let Some((largest, &size)) = largest else {
            return;
        };
        if size < 2 {
            return;
        }
        for d in 0..dims {
            let value = centroids[largest * dims + d];
            let (up, down) = if d % 2 == 0 {
                (1.0 + SPLIT_EPS, 1.0 - SPLIT_EPS)
            } else {
                (1.0 - SPLIT_EPS, 1.0 + SPLIT_EPS)
            };
            centroids[empty * dims + d] = value * up;
            centroids[largest * dims + d] = value * down;
        }
        counts[empty] = size / 2;
        counts[largest] = size - size / 2;
    }
}

/// Pick `k` distinct row indices from `0..n`, reproducibly for a seed.
fn sample_rows(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    index::sample(&mut rng, n, k.min(n)).into_vec()
}
