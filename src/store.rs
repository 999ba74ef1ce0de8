//! On-disk index store: the binary IVF file plus its JSON metadata
//! sibling.
//!
//! The two files are one unit. [`IndexStore::persist`] writes both to
//! temporary siblings and renames them into place; both carry the same
//! build id. [`IndexStore::load`] reads both or neither: a missing
//! member or a build-id disagreement is reported as
//! [`IndexError::IndexAbsent`], never as a half-loaded index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use film_rag_core::ivf::format::IndexStamp;
use film_rag_core::ivf::IvfIndex;
use film_rag_core::models::Chunk;
use film_rag_core::{IndexError, IndexResult};

use crate::config::PathsConfig;

/// Contents of the metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFile {
    pub build_id: Uuid,
    pub model: String,
    pub normalized: bool,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    /// SHA-256 of the catalog file the index was built from.
    pub catalog_sha256: String,
    /// Ordinal `i` of the index ↔ `chunks[i]`.
    pub chunks: Vec<Chunk>,
}

impl MetadataFile {
    pub fn stamp(&self) -> IndexStamp {
        IndexStamp {
            build_id: self.build_id,
            model: self.model.clone(),
            normalized: self.normalized,
        }
    }
}

/// A consistent (index, metadata) pair held in memory.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: IvfIndex,
    pub metadata: MetadataFile,
}

impl LoadedIndex {
    pub fn chunk(&self, ordinal: i64) -> IndexResult<&Chunk> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.metadata.chunks.get(i))
            .ok_or_else(|| {
                IndexError::Corrupt(format!(
                    "ordinal {} has no metadata record ({} chunks)",
                    ordinal,
                    self.metadata.chunks.len()
                ))
            })
    }
}

/// Summary printed by `filmrag status`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StoreStatus {
    Absent {
        index: PathBuf,
        metadata: PathBuf,
    },
    Unreadable {
        reason: String,
    },
    Ready {
        build_id: Uuid,
        model: String,
        normalized: bool,
        dims: usize,
        chunks: usize,
        nlist: usize,
        largest_list: usize,
        empty_lists: usize,
        built_at: DateTime<Utc>,
        catalog_sha256: String,
    },
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    index_path: PathBuf,
    metadata_path: PathBuf,
}

impl IndexStore {
    pub fn new(index_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.index, &paths.metadata)
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Write the pair, replacing any previous build.
    ///
    /// Nothing is renamed into place until both temporary files are
    /// complete, so a failure while writing leaves the previous pair
    /// untouched.
    pub fn persist(&self, index: &IvfIndex, metadata: &MetadataFile) -> IndexResult<()> {
        if index.ntotal() != metadata.chunks.len() {
            return Err(IndexError::Corrupt(format!(
                "index holds {} vectors but metadata has {} chunks",
                index.ntotal(),
                metadata.chunks.len()
            )));
        }

        let index_tmp = tmp_sibling(&self.index_path);
        let metadata_tmp = tmp_sibling(&self.metadata_path);

        let written = write_index(&index_tmp, index, &metadata.stamp())
            .and_then(|_| write_metadata(&metadata_tmp, metadata));
        if let Err(e) = written {
            let _ = fs::remove_file(&index_tmp);
            let _ = fs::remove_file(&metadata_tmp);
            return Err(e);
        }

        fs::rename(&index_tmp, &self.index_path)?;
        fs::rename(&metadata_tmp, &self.metadata_path)?;
        tracing::debug!(
            index = %self.index_path.display(),
            metadata = %self.metadata_path.display(),
            "index pair persisted"
        );
        Ok(())
    }

    /// Load the pair, or report it absent.
    pub fn load(&self) -> IndexResult<LoadedIndex> {
        if !self.index_path.is_file() || !self.metadata_path.is_file() {
            if self.index_path.is_file() != self.metadata_path.is_file() {
                tracing::warn!(
                    index = %self.index_path.display(),
                    metadata = %self.metadata_path.display(),
                    "only one file of the index pair exists; treating index as absent"
                );
            }
            return Err(IndexError::IndexAbsent(self.index_path.clone()));
        }

        let file = fs::File::open(&self.index_path)?;
        let byte_len = file.metadata()?.len();
        let (index, stamp) = IvfIndex::read_sized(BufReader::new(file), byte_len)?;

        let raw = fs::read(&self.metadata_path)?;
        let metadata: MetadataFile = serde_json::from_slice(&raw).map_err(|e| {
            IndexError::LoadFailed(format!(
                "metadata {} is not valid: {}",
                self.metadata_path.display(),
                e
            ))
        })?;

        if metadata.build_id != stamp.build_id {
            tracing::warn!(
                index_build = %stamp.build_id,
                metadata_build = %metadata.build_id,
                "index and metadata come from different builds; treating index as absent"
            );
            return Err(IndexError::IndexAbsent(self.index_path.clone()));
        }
        if metadata.chunks.len() != index.ntotal() {
            return Err(IndexError::LoadFailed(format!(
                "metadata has {} chunks but index holds {} vectors",
                metadata.chunks.len(),
                index.ntotal()
            )));
        }
        if metadata.dims != index.dims() || metadata.stamp() != stamp {
            return Err(IndexError::LoadFailed(
                "metadata header disagrees with index header".to_string(),
            ));
        }

        Ok(LoadedIndex { index, metadata })
    }

    pub fn status(&self) -> StoreStatus {
        match self.load() {
            Ok(loaded) => {
                let sizes = loaded.index.list_sizes();
                StoreStatus::Ready {
                    build_id: loaded.metadata.build_id,
                    model: loaded.metadata.model.clone(),
                    normalized: loaded.metadata.normalized,
                    dims: loaded.index.dims(),
                    chunks: loaded.index.ntotal(),
                    nlist: loaded.index.nlist(),
                    largest_list: sizes.iter().copied().max().unwrap_or(0),
                    empty_lists: sizes.iter().filter(|&&n| n == 0).count(),
                    built_at: loaded.metadata.built_at,
                    catalog_sha256: loaded.metadata.catalog_sha256,
                }
            }
            Err(IndexError::IndexAbsent(_)) => StoreStatus::Absent {
                index: self.index_path.clone(),
                metadata: self.metadata_path.clone(),
            },
            Err(e) => StoreStatus::Unreadable {
                reason: e.to_string(),
            },
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> IndexResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_index(path: &Path, index: &IvfIndex, stamp: &IndexStamp) -> IndexResult<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(fs::File::create(path)?);
    index.write_to(stamp, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn write_metadata(path: &Path, metadata: &MetadataFile) -> IndexResult<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, metadata)
        .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Run `filmrag status`.
pub fn run_status(paths: &PathsConfig, json: bool) -> anyhow::Result<()> {
    let status = IndexStore::from_config(paths).status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    match status {
        StoreStatus::Absent { index, metadata } => {
            println!("No index built.");
            println!("  index:    {}", index.display());
            println!("  metadata: {}", metadata.display());
        }
        StoreStatus::Unreadable { reason } => {
            println!("Index present but unreadable: {}", reason);
        }
        StoreStatus::Ready {
            build_id,
            model,
            normalized,
            dims,
            chunks,
            nlist,
            largest_list,
            empty_lists,
            built_at,
            catalog_sha256,
        } => {
            println!("Index ready.");
            println!("  build:      {} ({})", build_id, built_at.to_rfc3339());
            println!("  model:      {} (dims={}, normalized={})", model, dims, normalized);
            println!("  chunks:     {}", chunks);
            println!(
                "  clusters:   {} (largest {}, empty {})",
                nlist, largest_list, empty_lists
            );
            println!("  catalog:    sha256 {}", catalog_sha256);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use film_rag_core::ivf::{cluster_count, Executor, IvfParams, KMeansParams};
    use film_rag_core::matrix::EmbeddingMatrix;
    use film_rag_core::models::ChunkType;
    use tempfile::TempDir;

    fn sample(n: usize) -> (IvfIndex, MetadataFile) {
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|i| vec![(i as f32 * 0.7).sin(), (i as f32 * 1.3).cos()])
            .collect();
        let data = EmbeddingMatrix::from_rows(2, rows).unwrap();
        let nlist = cluster_count(n).unwrap();
        let mut index = IvfIndex::new(IvfParams { dims: 2, nlist }).unwrap();
        index
            .train(&data, &KMeansParams::default(), Executor::Sequential)
            .unwrap();
        index.add(&data, Executor::Sequential).unwrap();

        let chunks = (0..n)
            .map(|i| Chunk {
                row_index: i / 2,
                chunk_type: if i % 2 == 0 {
                    ChunkType::Meta
                } else {
                    ChunkType::Plot
                },
                title: format!("Film {}", i / 2),
                text: format!("chunk {}", i),
            })
            .collect();
        let metadata = MetadataFile {
            build_id: Uuid::new_v4(),
            model: "fnv1a-2".to_string(),
            normalized: true,
            dims: 2,
            built_at: Utc::now(),
            catalog_sha256: "00".to_string(),
            chunks,
        };
        (index, metadata)
    }

    fn store(tmp: &TempDir) -> IndexStore {
        IndexStore::new(
            tmp.path().join("index/films.ivf"),
            tmp.path().join("index/films.meta.json"),
        )
    }

    #[test]
    fn test_missing_pair_is_absent() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            store(&tmp).load(),
            Err(IndexError::IndexAbsent(_))
        ));
        assert!(matches!(store(&tmp).status(), StoreStatus::Absent { .. }));
    }

    #[test]
    fn test_persist_then_load() {
        let tmp = TempDir::new().unwrap();
        let (index, metadata) = sample(8);
        let s = store(&tmp);
        s.persist(&index, &metadata).unwrap();

        let loaded = s.load().unwrap();
        assert_eq!(loaded.index, index);
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.chunk(3).unwrap().text, "chunk 3");
        assert!(loaded.chunk(8).is_err());
        assert!(loaded.chunk(-1).is_err());
        assert!(!tmp_sibling(s.index_path()).exists());
    }

    #[test]
    fn test_truncated_index_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let (index, metadata) = sample(8);
        let s = store(&tmp);
        s.persist(&index, &metadata).unwrap();
        let bytes = fs::read(s.index_path()).unwrap();
        fs::write(s.index_path(), &bytes[..bytes.len() - 5]).unwrap();
        assert!(matches!(s.load(), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn test_metadata_only_is_absent() {
        let tmp = TempDir::new().unwrap();
        let (index, metadata) = sample(4);
        let s = store(&tmp);
        s.persist(&index, &metadata).unwrap();
        fs::remove_file(s.index_path()).unwrap();
        assert!(matches!(s.load(), Err(IndexError::IndexAbsent(_))));
    }

    #[test]
    fn test_mismatched_builds_are_absent() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let (index, metadata) = sample(4);
        s.persist(&index, &metadata).unwrap();

        // A second build whose metadata rename never happened.
        let (index2, mut metadata2) = sample(4);
        metadata2.build_id = Uuid::new_v4();
        write_index(s.index_path(), &index2, &metadata2.stamp()).unwrap();

        assert!(matches!(s.load(), Err(IndexError::IndexAbsent(_))));
    }

    #[test]
    fn test_persist_rejects_misaligned_metadata() {
        let tmp = TempDir::new().unwrap();
        let (index, mut metadata) = sample(4);
        metadata.chunks.pop();
        assert!(store(&tmp).persist(&index, &metadata).is_err());
        assert!(!store(&tmp).index_path().exists());
    }

    #[test]
    fn test_status_reports_shape() {
        let tmp = TempDir::new().unwrap();
        let (index, metadata) = sample(9);
        let s = store(&tmp);
        s.persist(&index, &metadata).unwrap();
        match s.status() {
            StoreStatus::Ready { chunks, nlist, .. } => {
                assert_eq!(chunks, 9);
                assert_eq!(nlist, 3);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }
}
