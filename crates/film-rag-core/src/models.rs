//! Core data types shared by the extractor, builder, and search engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One film as delivered by the catalog builder.
///
/// The indexing core only ever needs these three fields; every other
/// catalog fact (rating, genres, …) is reached through
/// [`Chunk::row_index`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub title: String,
    pub plot_text: String,
    pub meta_text: String,
}

impl CatalogRow {
    pub fn new(
        title: impl Into<String>,
        plot_text: impl Into<String>,
        meta_text: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            plot_text: plot_text.into(),
            meta_text: meta_text.into(),
        }
    }
}

/// Which text blob of a catalog row a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Meta,
    Plot,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Meta => "meta",
            ChunkType::Plot => "plot",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit of retrieval.
///
/// A chunk's position in the metadata store equals the ordinal of its
/// vector inside the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of the source film in the catalog (0-based).
    pub row_index: usize,
    pub chunk_type: ChunkType,
    pub title: String,
    /// The literal text that was embedded.
    pub text: String,
}

/// A single ranked hit returned by the search engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_text: String,
    /// Raw index distance (squared L2). Lower is closer.
    pub similarity: f32,
    pub row_index: usize,
    pub chunk_type: ChunkType,
    pub title: String,
}

impl SearchResult {
    pub fn from_chunk(chunk: &Chunk, distance: f32) -> Self {
        Self {
            chunk_text: chunk.text.clone(),
            similarity: distance,
            row_index: chunk.row_index,
            chunk_type: chunk.chunk_type,
            title: chunk.title.clone(),
        }
    }

    /// Cosine similarity implied by the distance, valid when both the
    /// indexed vectors and the query were unit-normalized
    /// (`‖a − b‖² = 2 − 2·cos θ`).
    pub fn cosine(&self) -> f32 {
        1.0 - self.similarity / 2.0
    }
}
