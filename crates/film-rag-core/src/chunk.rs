//! Chunk extractor.
//!
//! Turns each [`CatalogRow`] into exactly two searchable [`Chunk`]s, the
//! metadata text first and the plot text second. The extractor never
//! filters or deduplicates: a row with blank text still yields both
//! chunks, because ranking code downstream relies on
//! `count(meta) == count(plot) == rows.len()`.
//!
//! # Example
//!
//! ```rust
//! use film_rag_core::chunk::{chunk_texts, extract};
//! use film_rag_core::models::{CatalogRow, ChunkType};
//!
//! let rows = vec![CatalogRow::new("Heat", "Heat: a heist.", "Heat. Crime.")];
//! let chunks = extract(rows);
//! assert_eq!(chunk_texts(&chunks), vec!["Heat. Crime.", "Heat: a heist."]);
//! assert_eq!(chunks[0].chunk_type, ChunkType::Meta);
//! assert_eq!(chunks[1].chunk_type, ChunkType::Plot);
//! ```

use crate::models::{CatalogRow, Chunk, ChunkType};

/// Number of chunks produced per catalog row.
pub const CHUNKS_PER_ROW: usize = 2;

/// Split catalog rows into chunks, two per row, in input order.
///
/// Row text is moved into the chunks, so the catalog is held once.
pub fn extract(rows: Vec<CatalogRow>) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(rows.len() * CHUNKS_PER_ROW);

    for (row_index, row) in rows.into_iter().enumerate() {
        let CatalogRow {
            title,
            plot_text,
            meta_text,
        } = row;
        chunks.push(Chunk {
            row_index,
            chunk_type: ChunkType::Meta,
            title: title.clone(),
            text: meta_text,
        });
        chunks.push(Chunk {
            row_index,
            chunk_type: ChunkType::Plot,
            title,
            text: plot_text,
        });
    }

    chunks
}

/// Borrow the embedding input of each chunk, aligned by ordinal.
pub fn chunk_texts(chunks: &[Chunk]) -> Vec<&str> {
    chunks.iter().map(|c| c.text.as_str()).collect()
}

/// Count chunks per type, returned as `(plot, meta)`.
pub fn count_by_type(chunks: &[Chunk]) -> (usize, usize) {
    chunks.iter().fold((0, 0), |(plot, meta), c| match c.chunk_type {
        ChunkType::Plot => (plot + 1, meta),
        ChunkType::Meta => (plot, meta + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<CatalogRow> {
        (0..n)
            .map(|i| {
                CatalogRow::new(
                    format!("Film {}", i),
                    format!("plot{}", i),
                    format!("meta{}", i),
                )
            })
            .collect()
    }

    #[test]
    fn test_three_rows_alternate_meta_plot() {
        let chunks = extract(rows(3));
        let texts = chunk_texts(&chunks);
        assert_eq!(
            texts,
            vec!["meta0", "plot0", "meta1", "plot1", "meta2", "plot2"]
        );
        assert_eq!(chunks.len(), 6);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.row_index, i / 2);
            let expected = if i % 2 == 0 {
                ChunkType::Meta
            } else {
                ChunkType::Plot
            };
            assert_eq!(c.chunk_type, expected);
            assert_eq!(c.text, texts[i]);
        }
    }

    #[test]
    fn test_each_row_index_appears_twice() {
        let n = 17;
        let chunks = extract(rows(n));
        assert_eq!(chunks.len(), 2 * n);
        for row in 0..n {
            let count = chunks.iter().filter(|c| c.row_index == row).count();
            assert_eq!(count, 2, "row {} should have two chunks", row);
        }
        assert_eq!(count_by_type(&chunks), (n, n));
    }

    #[test]
    fn test_blank_text_still_produces_chunks() {
        let rows = vec![CatalogRow::new("Untitled", "", "")];
        let chunks = extract(rows);
        assert_eq!(chunk_texts(&chunks), vec!["", ""]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title, "Untitled");
    }

    #[test]
    fn test_empty_catalog() {
        assert!(extract(Vec::new()).is_empty());
    }
}
