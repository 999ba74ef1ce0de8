//! Typed errors for index building, loading, and searching.

use std::path::PathBuf;
use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("catalog not found at {}", .0.display())]
    InputMissing(PathBuf),

    #[error("no chunks to index; refusing to build a zero-cluster index")]
    DegenerateInput,

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding row {row} contains non-finite values")]
    NonFiniteEmbedding { row: usize },

    #[error("index must be trained before vectors are added or searched")]
    NotTrained,

    #[error("index quantizer is already trained")]
    AlreadyTrained,

    #[error("training needs at least {required} vectors, got {provided}")]
    InsufficientTrainingData { required: usize, provided: usize },

    #[error("no index found at {}; run `filmrag build` first", .0.display())]
    IndexAbsent(PathBuf),

    #[error("index failed to load: {0}")]
    LoadFailed(String),

    #[error(
        "index was built with model '{built_model}' (normalize={built_normalized}) \
         but queries use '{query_model}' (normalize={query_normalized})"
    )]
    EmbeddingMismatch {
        built_model: String,
        built_normalized: bool,
        query_model: String,
        query_normalized: bool,
    },

    #[error("top_k must be >= 1")]
    InvalidTopK,

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
