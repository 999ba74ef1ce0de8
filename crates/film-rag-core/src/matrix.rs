//! Row-major `f32` embedding matrix.
//!
//! The builder keeps the full `N × D` matrix resident while it trains
//! and populates the index; rows are appended batch by batch as the
//! embedding provider returns them.

use crate::embedding::l2_normalize;
use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(dims: usize, rows: usize) -> Self {
        Self {
            dims,
            data: Vec::with_capacity(dims * rows),
        }
    }

    /// Build a matrix from owned rows, checking every row's width.
    pub fn from_rows(dims: usize, rows: Vec<Vec<f32>>) -> IndexResult<Self> {
        let mut m = Self::with_capacity(dims, rows.len());
        for row in rows {
            m.push_row(&row)?;
        }
        Ok(m)
    }

    /// Append one vector as-is.
    pub fn push_row(&mut self, row: &[f32]) -> IndexResult<()> {
        if row.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn push_normalized(&mut self, row: &[f32]) -> IndexResult<()> {
        let start = self.data.len();
        self.push_row(row)?;
        l2_normalize(&mut self.data[start..]);
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn rows(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dims.max(1))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Size of the vector payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Reject NaN and infinite components, reporting the first bad row.
    pub fn check_finite(&self) -> IndexResult<()> {
        match self.iter().position(|r| r.iter().any(|x| !x.is_finite())) {
            Some(row) => Err(IndexError::NonFiniteEmbedding { row }),
            None => Ok(()),
        }
    }
}
