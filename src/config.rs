//! TOML configuration.
//!
//! Every component receives the parsed [`Config`] (or the section it
//! needs) through its constructor; there is no process-wide settings
//! object.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use film_rag_core::embedding::EmbeddingPolicy;
use film_rag_core::ivf::KMeansParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Prepared catalog CSV (`title`, `title_plot`, `title_meta`, …).
    pub catalog: PathBuf,
    #[serde(default)]
    pub tmdb_raw: Option<PathBuf>,
    #[serde(default)]
    pub letterboxd_raw: Option<PathBuf>,
    pub index: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Prepended to every query (never to catalog chunks), e.g.
    /// `"query: "` for e5-style models.
    #[serde(default)]
    pub query_prefix: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            normalize: true,
            query_prefix: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// The normalization and batching policy shared by build and search.
    pub fn policy(&self) -> EmbeddingPolicy {
        EmbeddingPolicy {
            normalize: self.normalize,
            batch_size: self.batch_size,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    128
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Coarse cells visited per query.
    #[serde(default = "default_probe_width")]
    pub probe_width: usize,
    #[serde(default = "default_true")]
    pub use_acceleration: bool,
    /// Accelerator worker threads; `0` = one per core.
    #[serde(default)]
    pub accel_threads: usize,
    #[serde(default = "default_accel_memory_mb")]
    pub accel_memory_mb: usize,
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Only index the first N catalog rows.
    #[serde(default)]
    pub build_limit: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            probe_width: default_probe_width(),
            use_acceleration: true,
            accel_threads: 0,
            accel_memory_mb: default_accel_memory_mb(),
            kmeans_iterations: default_kmeans_iterations(),
            seed: default_seed(),
            build_limit: None,
        }
    }
}

impl IndexConfig {
    pub fn kmeans(&self) -> KMeansParams {
        KMeansParams {
            iterations: self.kmeans_iterations,
            seed: self.seed,
        }
    }
}

fn default_probe_width() -> usize {
    10
}
fn default_accel_memory_mb() -> usize {
    2048
}
fn default_kmeans_iterations() -> usize {
    20
}
fn default_seed() -> u64 {
    1234
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessingConfig {
    #[serde(default = "default_min_overview_words")]
    pub min_overview_words: usize,
    #[serde(default = "default_max_overview_words")]
    pub max_overview_words: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            min_overview_words: default_min_overview_words(),
            max_overview_words: default_max_overview_words(),
        }
    }
}

fn default_min_overview_words() -> usize {
    6
}
fn default_max_overview_words() -> usize {
    169
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_generation_retries() -> u32 {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hash.",
            other
        ),
    }

    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    if config.index.probe_width == 0 {
        bail!("index.probe_width must be >= 1");
    }
    if config.index.kmeans_iterations == 0 {
        bail!("index.kmeans_iterations must be >= 1");
    }
    if config.index.build_limit == Some(0) {
        bail!("index.build_limit must be >= 1 when set");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.preprocessing.max_overview_words < config.preprocessing.min_overview_words {
        bail!("preprocessing.max_overview_words must be >= min_overview_words");
    }

    match config.generation.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.generation.provider == "openai" && config.generation.model.is_none() {
        bail!("generation.model must be specified when provider is 'openai'");
    }

    if config.paths.index == config.paths.metadata {
        bail!("paths.index and paths.metadata must be different files");
    }

    Ok(())
}
