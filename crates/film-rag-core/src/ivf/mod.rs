//! IVF-Flat approximate nearest-neighbor index.
//!
//! A coarse quantizer partitions the embedding space into `nlist`
//! Voronoi cells (squared-L2 k-means). Each cell owns a flat posting
//! list holding the ordinals and raw vectors of its members. A query
//! scans only the `nprobe` cells whose centroids are closest to it:
//!
//! ```text
//! Brute force: O(n)      →   IVF: O(nlist + nprobe × n/nlist)
//! ```
//!
//! # Lifecycle
//!
//! 1. [`IvfIndex::new`]: untrained, empty.
//! 2. [`IvfIndex::train`]: fit the quantizer once, on the full data.
//! 3. [`IvfIndex::add`]: assign vectors to cells; ordinals continue
//!    from [`ntotal`](IvfIndex::ntotal). Adding never retrains.
//! 4. [`IvfIndex::search`]: top-k by ascending distance, `-1` padded.
//!
//! The index file format is described in [`format`].

pub mod format;
pub mod kmeans;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::embedding::l2_squared;
use crate::error::{IndexError, IndexResult};
use crate::matrix::EmbeddingMatrix;

pub use kmeans::KMeansParams;

/// Ordinal reported for result slots that have no candidate.
pub const NO_NEIGHBOR: i64 = -1;

/// Where the CPU-heavy steps of training and population run.
#[derive(Clone, Copy)]
pub enum Executor<'a> {
    /// The calling thread.
    Sequential,
    /// A dedicated worker pool.
    Pool(&'a rayon::ThreadPool),
}

/// Number of coarse clusters for `n` training vectors: `floor(sqrt(n))`.
///
/// Returns `None` for `n == 0`; a zero-cluster index is never built.
pub fn cluster_count(n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }
    Some(((n as f64).sqrt().floor() as usize).max(1))
}

/// Shape of an index: vector width and number of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfParams {
    pub dims: usize,
    pub nlist: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct InvertedList {
    pub(crate) ids: Vec<i64>,
    pub(crate) vectors: Vec<f32>,
}

/// IVF-Flat index with a squared-L2 coarse quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfIndex {
    params: IvfParams,
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    ntotal: usize,
}

impl IvfIndex {
    /// Create an untrained, empty index.
    pub fn new(params: IvfParams) -> IndexResult<Self> {
        if params.dims == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if params.nlist == 0 {
            return Err(IndexError::DegenerateInput);
        }
        Ok(Self {
            params,
            centroids: Vec::new(),
            lists: Vec::new(),
            ntotal: 0,
        })
    }

    pub fn params(&self) -> IvfParams {
        self.params
    }

    pub fn dims(&self) -> usize {
        self.params.dims
    }

    pub fn nlist(&self) -> usize {
        self.params.nlist
    }

    /// Total number of vectors added.
    pub fn ntotal(&self) -> usize {
        self.ntotal
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Sizes of the posting lists, one entry per cell.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.ids.len()).collect()
    }

    /// Fit the coarse quantizer on `data`.
    pub fn train(
        &mut self,
        data: &EmbeddingMatrix,
        kmeans: &KMeansParams,
        exec: Executor<'_>,
    ) -> IndexResult<()> {
        if self.is_trained() {
            return Err(IndexError::AlreadyTrained);
        }
        self.check_dims(data.dims())?;
        if data.rows() < self.params.nlist {
            return Err(IndexError::InsufficientTrainingData {
                required: self.params.nlist,
                provided: data.rows(),
            });
        }

        self.centroids = kmeans::train(data, self.params.nlist, kmeans, exec);
        self.lists = vec![InvertedList::default(); self.params.nlist];
        Ok(())
    }

    /// Append every row of `data`; row `i` receives ordinal `ntotal + i`.
    pub fn add(&mut self, data: &EmbeddingMatrix, exec: Executor<'_>) -> IndexResult<()> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        self.check_dims(data.dims())?;

        let assignment = kmeans::assign_all(data, &self.centroids, exec);
        for (offset, (v, cell)) in data.iter().zip(assignment).enumerate() {
            let list = &mut self.lists[cell];
            list.ids.push((self.ntotal + offset) as i64);
            list.vectors.extend_from_slice(v);
        }
        self.ntotal += data.rows();
        Ok(())
    }

    /// Find the `k` nearest stored vectors among the `nprobe` closest
    /// cells.
    ///
    /// Returns `(distances, ordinals)`, both of length `k`, in ascending
    /// distance order (ties by ordinal). Slots without a candidate hold
    /// [`NO_NEIGHBOR`] and `f32::INFINITY`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> IndexResult<(Vec<f32>, Vec<i64>)> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        self.check_dims(query.len())?;

        let dims = self.params.dims;
        let nprobe = nprobe.clamp(1, self.params.nlist);

        let mut cells: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(dims)
            .enumerate()
            .map(|(i, c)| (l2_squared(c, query), i))
            .collect();
        cells.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        if k > 0 {
            for &(_, cell) in cells.iter().take(nprobe) {
                let list = &self.lists[cell];
                for (id, v) in list.ids.iter().zip(list.vectors.chunks_exact(dims)) {
                    let cand = Candidate {
                        distance: l2_squared(v, query),
                        id: *id,
                    };
                    if heap.len() < k {
                        heap.push(cand);
                    } else if let Some(worst) = heap.peek() {
                        if cand < *worst {
                            heap.pop();
                            heap.push(cand);
                        }
                    }
                }
            }
        }

        let ranked = heap.into_sorted_vec();
        let mut distances = vec![f32::INFINITY; k];
        let mut ordinals = vec![NO_NEIGHBOR; k];
        for (slot, cand) in ranked.into_iter().enumerate() {
            distances[slot] = cand.distance;
            ordinals[slot] = cand.id;
        }
        Ok((distances, ordinals))
    }

    fn check_dims(&self, actual: usize) -> IndexResult<()> {
        if actual != self.params.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.params.dims,
                actual,
            });
        }
        Ok(())
    }
}

/// Heap entry ordered by (distance, ordinal); the heap top is the worst
/// candidate kept so far.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: i64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}
