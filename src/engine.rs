//! Search engine over a persisted index.
//!
//! The engine owns an [`IndexState`] that moves
//! `Unloaded → Loading → Ready` on the first query, or
//! `Unloaded → Loading → Failed` if the pair cannot be loaded. `Failed`
//! is terminal: every later query reports the same error. Once `Ready`,
//! queries share an `Arc` of the immutable index and never mutate it.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use film_rag_core::embedding::{embed_query, Embedder, EmbeddingPolicy};
use film_rag_core::ivf::NO_NEIGHBOR;
use film_rag_core::models::SearchResult;
use film_rag_core::{IndexError, IndexResult};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::store::{IndexStore, LoadedIndex};

/// Why the index could not be loaded; kept so repeated queries report
/// the same failure.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailure {
    Absent(std::path::PathBuf),
    Mismatch {
        built_model: String,
        built_normalized: bool,
        query_model: String,
        query_normalized: bool,
    },
    Failed(String),
}

impl LoadFailure {
    fn from_error(e: &IndexError) -> Self {
        match e {
            IndexError::IndexAbsent(path) => LoadFailure::Absent(path.clone()),
            IndexError::EmbeddingMismatch {
                built_model,
                built_normalized,
                query_model,
                query_normalized,
            } => LoadFailure::Mismatch {
                built_model: built_model.clone(),
                built_normalized: *built_normalized,
                query_model: query_model.clone(),
                query_normalized: *query_normalized,
            },
            other => LoadFailure::Failed(other.to_string()),
        }
    }

    fn to_error(&self) -> IndexError {
        match self {
            LoadFailure::Absent(path) => IndexError::IndexAbsent(path.clone()),
            LoadFailure::Mismatch {
                built_model,
                built_normalized,
                query_model,
                query_normalized,
            } => IndexError::EmbeddingMismatch {
                built_model: built_model.clone(),
                built_normalized: *built_normalized,
                query_model: query_model.clone(),
                query_normalized: *query_normalized,
            },
            LoadFailure::Failed(msg) => IndexError::LoadFailed(msg.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IndexState {
    Unloaded,
    Loading,
    Ready(Arc<LoadedIndex>),
    Failed(LoadFailure),
}

impl IndexState {
    pub fn name(&self) -> &'static str {
        match self {
            IndexState::Unloaded => "unloaded",
            IndexState::Loading => "loading",
            IndexState::Ready(_) => "ready",
            IndexState::Failed(_) => "failed",
        }
    }
}

pub struct SearchEngine {
    store: IndexStore,
    embedder: Arc<dyn Embedder>,
    policy: EmbeddingPolicy,
    query_prefix: Option<String>,
    probe_width: usize,
    state: RwLock<IndexState>,
    load_lock: tokio::sync::Mutex<()>,
}

impl SearchEngine {
    pub fn new(
        store: IndexStore,
        embedder: Arc<dyn Embedder>,
        policy: EmbeddingPolicy,
        probe_width: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            policy,
            query_prefix: None,
            probe_width,
            state: RwLock::new(IndexState::Unloaded),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_query_prefix(mut self, prefix: Option<String>) -> Self {
        self.query_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        Ok(Self::new(
            IndexStore::from_config(&config.paths),
            embedder,
            config.embedding.policy(),
            config.index.probe_width,
        )
        .with_query_prefix(config.embedding.query_prefix.clone()))
    }

    pub fn state(&self) -> IndexState {
        match self.state.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, next: IndexState) {
        let mut guard = match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!(from = guard.name(), to = next.name(), "index state");
        *guard = next;
    }

    /// `Some` once settled: the loaded index, or the stored failure.
    fn settled(&self) -> Option<IndexResult<Arc<LoadedIndex>>> {
        match self.state() {
            IndexState::Ready(loaded) => Some(Ok(loaded)),
            IndexState::Failed(failure) => Some(Err(failure.to_error())),
            IndexState::Unloaded | IndexState::Loading => None,
        }
    }

    /// Load the index pair on first use.
    pub async fn ensure_loaded(&self) -> IndexResult<Arc<LoadedIndex>> {
        if let Some(settled) = self.settled() {
            return settled;
        }
        let _guard = self.load_lock.lock().await;
        if let Some(settled) = self.settled() {
            return settled;
        }

        self.set_state(IndexState::Loading);
        let started = Instant::now();
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| IndexError::LoadFailed(format!("load task failed: {}", e)))
            .and_then(|r| r)
            .and_then(|loaded| self.check_compatible(&loaded).map(|_| loaded));

        match loaded {
            Ok(loaded) => {
                tracing::info!(
                    chunks = loaded.index.ntotal(),
                    nlist = loaded.index.nlist(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "index loaded"
                );
                let loaded = Arc::new(loaded);
                self.set_state(IndexState::Ready(loaded.clone()));
                Ok(loaded)
            }
            Err(e) => {
                tracing::warn!(error = %e, "index load failed");
                self.set_state(IndexState::Failed(LoadFailure::from_error(&e)));
                Err(e)
            }
        }
    }

    fn check_compatible(&self, loaded: &LoadedIndex) -> IndexResult<()> {
        let meta = &loaded.metadata;
        if meta.model != self.embedder.model_name() || meta.normalized != self.policy.normalize {
            return Err(IndexError::EmbeddingMismatch {
                built_model: meta.model.clone(),
                built_normalized: meta.normalized,
                query_model: self.embedder.model_name().to_string(),
                query_normalized: self.policy.normalize,
            });
        }
        if loaded.index.dims() != self.embedder.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: loaded.index.dims(),
                actual: self.embedder.dims(),
            });
        }
        Ok(())
    }

    /// Ranked chunks for `query`, nearest first, at most `top_k`.
    pub async fn search(&self, query: &str, top_k: usize) -> IndexResult<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        let loaded = self.ensure_loaded().await?;

        let text = match &self.query_prefix {
            Some(prefix) => format!("{}{}", prefix, query),
            None => query.to_string(),
        };
        let vector = embed_query(self.embedder.as_ref(), &text, &self.policy).await?;
        let (distances, ordinals) = loaded.index.search(&vector, top_k, self.probe_width)?;

        distances
            .into_iter()
            .zip(ordinals)
            .filter(|&(_, ordinal)| ordinal != NO_NEIGHBOR)
            .map(|(distance, ordinal)| {
                loaded
                    .chunk(ordinal)
                    .map(|chunk| SearchResult::from_chunk(chunk, distance))
            })
            .collect()
    }
}

/// Run `filmrag search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = SearchEngine::from_config(config)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let results = engine.search(query, top_k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({}, row {})",
            i + 1,
            r.similarity,
            r.title,
            r.chunk_type,
            r.row_index
        );
        println!("    {}", r.chunk_text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::store::MetadataFile;
    use film_rag_core::build::train_and_populate;
    use film_rag_core::chunk::{chunk_texts, extract};
    use film_rag_core::embedding::embed_matrix;
    use film_rag_core::ivf::KMeansParams;
    use film_rag_core::models::CatalogRow;
    use tempfile::TempDir;

    const DIMS: usize = 128;

    fn catalog() -> Vec<CatalogRow> {
        vec![
            CatalogRow::new(
                "Heat",
                "Heat: a crew of professional thieves plans a bank heist in Los Angeles",
                "Heat (1995). Genres: Crime, Thriller. Directed by: Michael Mann.",
            ),
            CatalogRow::new(
                "Alien",
                "Alien: the crew of a space freighter is hunted by a deadly creature",
                "Alien (1979). Genres: Horror, Science Fiction. Directed by: Ridley Scott.",
            ),
            CatalogRow::new(
                "Amelie",
                "Amelie: a shy waitress in Paris decides to change the lives of others",
                "Amelie (2001). Genres: Comedy, Romance. Directed by: Jean-Pierre Jeunet.",
            ),
        ]
    }

    async fn build(tmp: &TempDir, rows: Vec<CatalogRow>) -> IndexStore {
        let embedder = HashEmbedder::new(DIMS);
        let policy = EmbeddingPolicy::default();
        let chunks = extract(rows);
        let matrix = embed_matrix(&embedder, &chunk_texts(&chunks), &policy, |_| {})
            .await
            .unwrap();
        let (index, _) = train_and_populate(&matrix, &KMeansParams::default(), None).unwrap();
        let store = IndexStore::new(tmp.path().join("films.ivf"), tmp.path().join("films.json"));
        let metadata = MetadataFile {
            build_id: uuid::Uuid::new_v4(),
            model: embedder.model_name().to_string(),
            normalized: policy.normalize,
            dims: DIMS,
            built_at: chrono::Utc::now(),
            catalog_sha256: String::new(),
            chunks,
        };
        store.persist(&index, &metadata).unwrap();
        store
    }

    fn engine(store: IndexStore) -> SearchEngine {
        SearchEngine::new(
            store,
            Arc::new(HashEmbedder::new(DIMS)),
            EmbeddingPolicy::default(),
            10,
        )
    }

    #[tokio::test]
    async fn test_search_before_build_is_index_absent() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("a.ivf"), tmp.path().join("a.json"));
        let engine = engine(store);
        assert_eq!(engine.state().name(), "unloaded");

        let err = engine.search("heist", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexAbsent(_)));
        assert_eq!(engine.state().name(), "failed");

        // Terminal: still absent even though nothing changed on disk.
        let err = engine.search("heist", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexAbsent(_)));
    }

    #[tokio::test]
    async fn test_three_rows_return_all_six_chunks() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(build(&tmp, catalog()).await);

        let results = engine.search("a bank heist", 6).await.unwrap();
        assert_eq!(engine.state().name(), "ready");
        assert_eq!(results.len(), 6);
        for pair in results.windows(2) {
            assert!(pair[0].similarity <= pair[1].similarity);
        }
        let mut rows: Vec<usize> = results.iter().map(|r| r.row_index).collect();
        rows.sort();
        assert_eq!(rows, vec![0, 0, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn test_exact_chunk_text_ranks_first() {
        let tmp = TempDir::new().unwrap();
        let rows = catalog();
        let engine = engine(build(&tmp, rows.clone()).await);

        let results = engine.search(&rows[1].plot_text, 2).await.unwrap();
        assert_eq!(results[0].chunk_text, rows[1].plot_text);
        assert!(results[0].similarity < 1e-4);
        assert!(results[0].cosine() > 0.999);
    }

    #[tokio::test]
    async fn test_fewer_chunks_than_k() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(build(&tmp, catalog()[..1].to_vec()).await);
        let results = engine.search("thieves", 5).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(build(&tmp, catalog()).await);
        assert!(matches!(
            engine.search("x", 0).await,
            Err(IndexError::InvalidTopK)
        ));
    }

    #[tokio::test]
    async fn test_normalization_mismatch_fails_load() {
        let tmp = TempDir::new().unwrap();
        let store = build(&tmp, catalog()).await;
        let engine = SearchEngine::new(
            store,
            Arc::new(HashEmbedder::new(DIMS)),
            EmbeddingPolicy {
                normalize: false,
                batch_size: 8,
            },
            10,
        );
        let err = engine.search("heist", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::EmbeddingMismatch { .. }));
        assert_eq!(engine.state().name(), "failed");
    }
}
