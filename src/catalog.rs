//! Catalog CSV loading.
//!
//! The prepared catalog carries many columns (ratings, genres, …); the
//! index only reads `title`, `title_plot` and `title_meta`. Empty
//! cells become empty strings, so every row still yields its two
//! chunks.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use film_rag_core::models::CatalogRow;
use film_rag_core::IndexError;

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_plot: Option<String>,
    #[serde(default)]
    title_meta: Option<String>,
}

impl From<CatalogRecord> for CatalogRow {
    fn from(r: CatalogRecord) -> Self {
        CatalogRow::new(
            r.title.unwrap_or_default(),
            r.title_plot.unwrap_or_default(),
            r.title_meta.unwrap_or_default(),
        )
    }
}

/// Read up to `limit` rows of the catalog, in file order.
///
/// A missing file is reported as [`IndexError::InputMissing`] so the
/// build aborts before any embedding work. A zero-byte file has no rows.
pub fn load_catalog(path: &Path, limit: Option<usize>) -> Result<Vec<CatalogRow>> {
    if !path.is_file() {
        return Err(IndexError::InputMissing(path.to_path_buf()).into());
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open catalog: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read catalog headers: {}", path.display()))?
        .clone();
    if headers.is_empty() {
        tracing::warn!(path = %path.display(), "catalog is empty");
        return Ok(Vec::new());
    }
    for required in ["title", "title_plot", "title_meta"] {
        if !headers.iter().any(|h| h == required) {
            anyhow::bail!(
                "catalog {} has no '{}' column (columns: {:?})",
                path.display(),
                required,
                headers.iter().collect::<Vec<_>>()
            );
        }
    }

    let limit = limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<CatalogRecord>().enumerate() {
        if rows.len() >= limit {
            break;
        }
        let record =
            record.with_context(|| format!("catalog {} row {}", path.display(), line + 2))?;
        rows.push(record.into());
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "catalog loaded");
    Ok(rows)
}
