//! Train and populate an index, preferring the accelerated context.
//!
//! [`train_and_populate`] validates the embedding matrix, sizes the
//! quantizer at `floor(sqrt(N))` cells, and runs the train→add sequence.
//! When an accelerator is supplied it gets a fresh untrained index;
//! if it reports [`AccelerationOutcome::Failed`], the failure is logged
//! and the whole sequence is re-run on another fresh index on the
//! calling thread. Nothing from the failed attempt is reused.
//!
//! Input problems (empty matrix, wrong width, non-finite values) are
//! detected before any attempt and are always fatal.

use std::fmt;

use crate::accel::{AccelerationOutcome, Accelerator};
use crate::error::{IndexError, IndexResult};
use crate::ivf::{cluster_count, Executor, IvfIndex, IvfParams, KMeansParams};
use crate::matrix::EmbeddingMatrix;

/// Which execution context produced the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPath {
    Accelerated { context: String },
    Portable,
    /// The accelerated attempt failed and the portable path took over.
    PortableFallback { reason: String },
}

impl fmt::Display for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPath::Accelerated { context } => write!(f, "accelerated ({})", context),
            BuildPath::Portable => f.write_str("portable"),
            BuildPath::PortableFallback { reason } => {
                write!(f, "portable (accelerated attempt failed: {})", reason)
            }
        }
    }
}

pub fn train_and_populate(
    data: &EmbeddingMatrix,
    kmeans: &KMeansParams,
    accelerator: Option<&dyn Accelerator>,
) -> IndexResult<(IvfIndex, BuildPath)> {
    let nlist = cluster_count(data.rows()).ok_or(IndexError::DegenerateInput)?;
    data.check_finite()?;
    let params = IvfParams {
        dims: data.dims(),
        nlist,
    };

    let mut fallback_reason = None;
    if let Some(accel) = accelerator {
        tracing::info!(
            context = accel.name(),
            nlist,
            vectors = data.rows(),
            "training on accelerated context"
        );
        match accel.train_and_add(IvfIndex::new(params)?, data, kmeans) {
            AccelerationOutcome::Built(index) => {
                return Ok((
                    index,
                    BuildPath::Accelerated {
                        context: accel.name().to_string(),
                    },
                ));
            }
            AccelerationOutcome::Failed(failure) => {
                tracing::warn!(
                    context = accel.name(),
                    reason = %failure,
                    "accelerated build failed; retrying on portable path"
                );
                fallback_reason = Some(failure.reason);
            }
        }
    }

    tracing::info!(nlist, vectors = data.rows(), "training on portable path");
    let mut index = IvfIndex::new(params)?;
    index.train(data, kmeans, Executor::Sequential)?;
    index.add(data, Executor::Sequential)?;

    let path = match fallback_reason {
        Some(reason) => BuildPath::PortableFallback { reason },
        None => BuildPath::Portable,
    };
    Ok((index, path))
}
