//! # Film RAG Core
//!
//! Shared logic for film-rag: the chunk data model, the chunk extractor,
//! the embedding trait and vector utilities, the IVF-Flat approximate
//! nearest-neighbor index, and the accelerated/portable train+populate
//! sequence used by the index builder.
//!
//! This crate contains no tokio, HTTP, or configuration-file
//! dependencies. File locations and provider wiring live in the
//! `film-rag` application crate.

pub mod accel;
pub mod build;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod ivf;
pub mod matrix;
pub mod models;

pub use error::{IndexError, IndexResult};
