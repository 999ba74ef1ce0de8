//! Index build orchestration for `filmrag build`.
//!
//! Catalog → chunks → embeddings → train+populate (accelerated context
//! first, portable on failure) → persisted pair. Every failure before
//! the final rename leaves the previous pair on disk untouched.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

use film_rag_core::accel::{Accelerator, ParallelAccelerator};
use film_rag_core::build::{train_and_populate, BuildPath};
use film_rag_core::chunk::{chunk_texts, count_by_type, extract};
use film_rag_core::embedding::{embed_matrix, Embedder};
use film_rag_core::ivf::cluster_count;
use film_rag_core::IndexError;

use crate::catalog::load_catalog;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::progress::{BuildProgressEvent, BuildProgressReporter, ProgressMode};
use crate::store::{IndexStore, MetadataFile};

/// Per-invocation overrides of the `[index]` section.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// `Some(false)` forces the portable path.
    pub use_acceleration: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub build_id: Uuid,
    pub rows: usize,
    pub total_chunks: usize,
    pub plot_chunks: usize,
    pub meta_chunks: usize,
    pub nlist: usize,
    pub dims: usize,
    pub model: String,
    pub execution: String,
    pub fell_back: bool,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub elapsed_ms: u64,
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Build and persist the index pair for the configured catalog.
pub async fn build_index(
    config: &Config,
    embedder: &dyn Embedder,
    options: &BuildOptions,
    progress: &dyn BuildProgressReporter,
) -> Result<BuildSummary> {
    let started = Instant::now();
    let catalog_path = &config.paths.catalog;
    let limit = options.limit.or(config.index.build_limit);

    let rows = load_catalog(catalog_path, limit)?;
    let catalog_sha256 = sha256_file(catalog_path)?;
    let row_count = rows.len();
    let chunks = extract(rows);
    if chunks.is_empty() {
        return Err(IndexError::DegenerateInput.into());
    }
    tracing::info!(
        rows = row_count,
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedding catalog chunks"
    );

    let total = chunks.len() as u64;
    let policy = config.embedding.policy();
    let matrix = embed_matrix(embedder, &chunk_texts(&chunks), &policy, |n| {
        progress.report(BuildProgressEvent::Embedding {
            n: n as u64,
            total,
        })
    })
    .await?;

    progress.report(BuildProgressEvent::Training {
        nlist: cluster_count(matrix.rows()).unwrap_or(0),
        vectors: matrix.rows() as u64,
    });
    let use_acceleration = options
        .use_acceleration
        .unwrap_or(config.index.use_acceleration);
    let accelerator = use_acceleration.then(|| {
        ParallelAccelerator::new(
            config.index.accel_threads,
            config.index.accel_memory_mb.saturating_mul(1024 * 1024),
        )
    });
    let kmeans = config.index.kmeans();
    let (index, path) = tokio::task::spawn_blocking(move || {
        let accel = accelerator.as_ref().map(|a| a as &dyn Accelerator);
        train_and_populate(&matrix, &kmeans, accel)
    })
    .await
    .context("training task panicked")??;

    progress.report(BuildProgressEvent::Persisting);
    let metadata = MetadataFile {
        build_id: Uuid::new_v4(),
        model: embedder.model_name().to_string(),
        normalized: policy.normalize,
        dims: index.dims(),
        built_at: chrono::Utc::now(),
        catalog_sha256,
        chunks,
    };
    let store = IndexStore::from_config(&config.paths);
    store.persist(&index, &metadata)?;

    let (plot_chunks, meta_chunks) = count_by_type(&metadata.chunks);
    let summary = BuildSummary {
        build_id: metadata.build_id,
        rows: row_count,
        total_chunks: metadata.chunks.len(),
        plot_chunks,
        meta_chunks,
        nlist: index.nlist(),
        dims: index.dims(),
        model: metadata.model.clone(),
        execution: path.to_string(),
        fell_back: matches!(path, BuildPath::PortableFallback { .. }),
        index_path: store.index_path().to_path_buf(),
        metadata_path: store.metadata_path().to_path_buf(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        build_id = %summary.build_id,
        chunks = summary.total_chunks,
        nlist = summary.nlist,
        execution = %summary.execution,
        elapsed_ms = summary.elapsed_ms,
        "index built"
    );
    Ok(summary)
}

/// Run `filmrag build`.
pub async fn run_build(config: &Config, options: BuildOptions, json: bool) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let progress = if json {
        ProgressMode::Json
    } else {
        ProgressMode::default_for_tty()
    }
    .reporter();

    let summary = build_index(config, embedder.as_ref(), &options, progress.as_ref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("Built index {}", summary.build_id);
    println!(
        "  chunks:    {} ({} plot, {} meta) from {} films",
        summary.total_chunks, summary.plot_chunks, summary.meta_chunks, summary.rows
    );
    println!("  clusters:  {}", summary.nlist);
    println!("  model:     {} (dims={})", summary.model, summary.dims);
    println!("  execution: {}", summary.execution);
    println!("  index:     {}", summary.index_path.display());
    println!("  metadata:  {}", summary.metadata_path.display());
    Ok(())
}
