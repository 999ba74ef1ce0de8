//! Accelerated execution context for index training and population.
//!
//! An [`Accelerator`] takes ownership of an untrained [`IvfIndex`],
//! trains and populates it in its own execution context, and hands the
//! populated index back in the portable representation. It never
//! returns an error: every failure becomes
//! [`AccelerationOutcome::Failed`], and the caller decides how to fall
//! back (see [`crate::build`]).
//!
//! [`ParallelAccelerator`] is the built-in context: a dedicated rayon
//! worker pool with a memory budget. Acquiring it fails when the pool
//! cannot be created or the working set does not fit the budget.

use std::fmt;

use crate::ivf::{Executor, IvfIndex, KMeansParams};
use crate::matrix::EmbeddingMatrix;

/// Why an accelerated attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationFailure {
    pub reason: String,
}

impl AccelerationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AccelerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Result of an accelerated train+add attempt.
#[derive(Debug)]
pub enum AccelerationOutcome {
    /// Trained and populated index, already in portable form.
    Built(IvfIndex),
    Failed(AccelerationFailure),
}

pub trait Accelerator: Send + Sync {
    /// Human-readable name of the execution context.
    fn name(&self) -> &str;

    /// Train `index` on all of `data`, then add all of `data`.
    fn train_and_add(
        &self,
        index: IvfIndex,
        data: &EmbeddingMatrix,
        kmeans: &KMeansParams,
    ) -> AccelerationOutcome;
}

/// Multi-threaded execution on a dedicated worker pool.
#[derive(Debug, Clone)]
pub struct ParallelAccelerator {
    /// Worker threads; `0` means one per logical core.
    pub threads: usize,
    /// Upper bound on vectors plus centroids held by the context.
    pub memory_budget_bytes: usize,
}

impl ParallelAccelerator {
    pub fn new(threads: usize, memory_budget_bytes: usize) -> Self {
        Self {
            threads,
            memory_budget_bytes,
        }
    }

    /// Bytes the context needs for `data`: the input matrix, one copy
    /// inside the posting lists, and the centroids.
    pub fn working_set_bytes(index: &IvfIndex, data: &EmbeddingMatrix) -> usize {
        let centroids = index.nlist() * index.dims() * std::mem::size_of::<f32>();
        data.byte_len().saturating_mul(2).saturating_add(centroids)
    }

    fn acquire(
        &self,
        index: &IvfIndex,
        data: &EmbeddingMatrix,
    ) -> Result<rayon::ThreadPool, AccelerationFailure> {
        let needed = Self::working_set_bytes(index, data);
        if needed > self.memory_budget_bytes {
            return Err(AccelerationFailure::new(format!(
                "working set of {} bytes exceeds accelerator budget of {} bytes",
                needed, self.memory_budget_bytes
            )));
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("ivf-accel-{}", i))
            .build()
            .map_err(|e| AccelerationFailure::new(format!("worker pool unavailable: {}", e)))
    }
}

impl Accelerator for ParallelAccelerator {
    fn name(&self) -> &str {
        "parallel"
    }

    fn train_and_add(
        &self,
        mut index: IvfIndex,
        data: &EmbeddingMatrix,
        kmeans: &KMeansParams,
    ) -> AccelerationOutcome {
        let pool = match self.acquire(&index, data) {
            Ok(pool) => pool,
            Err(failure) => return AccelerationOutcome::Failed(failure),
        };
        tracing::debug!(
            threads = pool.current_num_threads(),
            vectors = data.rows(),
            "accelerated context acquired"
        );

        let exec = Executor::Pool(&pool);
        if let Err(e) = index.train(data, kmeans, exec) {
            return AccelerationOutcome::Failed(AccelerationFailure::new(format!("train: {}", e)));
        }
        if let Err(e) = index.add(data, exec) {
            return AccelerationOutcome::Failed(AccelerationFailure::new(format!("add: {}", e)));
        }
        AccelerationOutcome::Built(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::IvfParams;

    fn data() -> EmbeddingMatrix {
        let rows = (0..9).map(|i| vec![i as f32, 1.0]).collect();
        EmbeddingMatrix::from_rows(2, rows).unwrap()
    }

    #[test]
    fn test_builds_within_budget() {
        let accel = ParallelAccelerator::new(2, 1 << 20);
        let index = IvfIndex::new(IvfParams { dims: 2, nlist: 3 }).unwrap();
        match accel.train_and_add(index, &data(), &KMeansParams::default()) {
            AccelerationOutcome::Built(index) => assert_eq!(index.ntotal(), 9),
            AccelerationOutcome::Failed(f) => panic!("unexpected failure: {}", f),
        }
    }

    #[test]
    fn test_budget_exceeded_fails() {
        let accel = ParallelAccelerator::new(2, 16);
        let index = IvfIndex::new(IvfParams { dims: 2, nlist: 3 }).unwrap();
        match accel.train_and_add(index, &data(), &KMeansParams::default()) {
            AccelerationOutcome::Failed(f) => assert!(f.reason.contains("budget")),
            AccelerationOutcome::Built(_) => panic!("expected budget failure"),
        }
    }
}
