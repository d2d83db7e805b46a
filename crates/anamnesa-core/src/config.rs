//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_FUSION__STRATEGY=rrf`). Every setting
//! has a default so an empty configuration is valid.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::RetrievalContext;

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let base_dir = env::current_dir()?;
        Self::load_from(&base_dir)
    }

    /// Load `config.toml` and the environment overlay from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            other => tracing::warn!(env = other, "unknown RUST_ENV, using base config only"),
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, base_dir: dir.to_path_buf() };
        config.settings()?;
        Ok(config)
    }

    /// Build from an inline TOML document (no files, no environment).
    pub fn from_toml_str(toml: &str, base_dir: &Path) -> Result<Self> {
        let config = Self { figment: Figment::new().merge(Toml::string(toml)), base_dir: base_dir.to_path_buf() };
        config.settings()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("failed to get '{key}': {e}")))
    }

    /// Typed, validated settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve_path<S: AsRef<str>>(&self, p: S) -> PathBuf {
        resolve_with_base(&self.base_dir, p)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataConfig,
    pub chunking: ChunkingConfig,
    pub tokenizer: TokenizerConfig,
    pub bm25: Bm25Config,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub fusion: FusionConfig,
    pub facade: FacadeConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.bm25.validate()?;
        self.vector.validate()?;
        self.embedding.validate()?;
        self.fusion.validate()?;
        self.facade.validate()?;
        if self.tokenizer.min_token_len > self.tokenizer.max_token_len {
            return Err(invalid("tokenizer.min_token_len must not exceed tokenizer.max_token_len"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Local mirror of the cloud-drive folder.
    pub drive_mirror_dir: Option<String>,
    /// JSON exports written by the literature crawler.
    pub crawler_exports: Vec<String>,
    pub snapshot_dir: String,
    /// Old snapshot versions kept besides the active one.
    pub keep_snapshots: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            drive_mirror_dir: None,
            crawler_exports: Vec::new(),
            snapshot_dir: "../dev_data/snapshots".to_string(),
            keep_snapshots: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 200, overlap_tokens: 40 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(invalid("chunking.max_tokens must be positive"));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(invalid("chunking.overlap_tokens must be smaller than chunking.max_tokens"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub min_token_len: usize,
    pub max_token_len: usize,
    pub stem: bool,
    pub extra_stopwords: Vec<String>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self { min_token_len: 2, max_token_len: 40, stem: true, extra_stopwords: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Config {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1.is_finite() && self.k1 >= 0.0) {
            return Err(invalid("bm25.k1 must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(invalid("bm25.b must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Corpus size at which search switches from brute force to HNSW.
    pub ann_threshold: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// HNSW over-fetch factor before exact re-scoring.
    pub candidate_multiplier: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { ann_threshold: 20_000, hnsw_m: 16, hnsw_ef_construction: 200, hnsw_ef_search: 100, candidate_multiplier: 4 }
    }
}

impl VectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hnsw_m == 0 || self.hnsw_ef_construction == 0 || self.hnsw_ef_search == 0 {
            return Err(invalid("vector.hnsw_* parameters must be positive"));
        }
        if self.candidate_multiplier == 0 {
            return Err(invalid("vector.candidate_multiplier must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic feature hashing; offline and in tests.
    Hashing,
    /// Generative Language REST API.
    Remote,
    /// Local BGE-M3 model (requires the `local-model` feature).
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dim: usize,
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub batch_size: usize,
    /// Embedding batches in flight during an index build.
    pub concurrency: usize,
    pub request_timeout_ms: u64,
    pub max_input_chars: usize,
    pub model_dir: Option<String>,
    /// Delay before the single retry of a failed batch.
    pub batch_retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "text-embedding-004".to_string(),
            dim: 768,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            batch_size: 32,
            concurrency: 2,
            request_timeout_ms: 20_000,
            max_input_chars: 8_000,
            model_dir: None,
            batch_retry_delay_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(invalid("embedding.dim must be positive"));
        }
        if self.batch_size == 0 || self.concurrency == 0 {
            return Err(invalid("embedding.batch_size and embedding.concurrency must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    WeightedSum,
    Rrf,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl FusionWeights {
    fn validate(&self, what: &str) -> Result<()> {
        let ok = self.vector_weight.is_finite()
            && self.keyword_weight.is_finite()
            && self.vector_weight >= 0.0
            && self.keyword_weight >= 0.0
            && self.vector_weight + self.keyword_weight > 0.0;
        if ok {
            Ok(())
        } else {
            Err(invalid(&format!("{what}: weights must be non-negative and not both zero")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// How many top entries of each list are compared.
    pub depth: usize,
    /// Minimum overlap ratio to trust the weighted sum.
    pub agreement_threshold: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self { depth: 5, agreement_threshold: 0.4, vector_weight: 0.7, keyword_weight: 0.3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub rrf_c: f32,
    pub vector_top_k: usize,
    pub keyword_top_k: usize,
    pub adaptive: AdaptiveConfig,
    /// Per-context weight overrides, keyed by context name.
    pub profiles: HashMap<RetrievalContext, FusionWeights>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::WeightedSum,
            vector_weight: 0.6,
            keyword_weight: 0.4,
            rrf_c: 60.0,
            vector_top_k: 20,
            keyword_top_k: 20,
            adaptive: AdaptiveConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

impl FusionConfig {
    /// Weighted-sum weights for a context, falling back to the defaults.
    pub fn weights_for(&self, context: RetrievalContext) -> FusionWeights {
        self.profiles.get(&context).copied().unwrap_or(FusionWeights {
            vector_weight: self.vector_weight,
            keyword_weight: self.keyword_weight,
        })
    }

    pub fn validate(&self) -> Result<()> {
        FusionWeights { vector_weight: self.vector_weight, keyword_weight: self.keyword_weight }.validate("fusion")?;
        FusionWeights { vector_weight: self.adaptive.vector_weight, keyword_weight: self.adaptive.keyword_weight }
            .validate("fusion.adaptive")?;
        for (context, weights) in &self.profiles {
            weights.validate(&format!("fusion.profiles.{context}"))?;
        }
        if !(self.rrf_c.is_finite() && self.rrf_c >= 0.0) {
            return Err(invalid("fusion.rrf_c must be a non-negative number"));
        }
        if self.adaptive.depth == 0 {
            return Err(invalid("fusion.adaptive.depth must be positive"));
        }
        if !(0.0..=1.0).contains(&self.adaptive.agreement_threshold) {
            return Err(invalid("fusion.adaptive.agreement_threshold must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Overall budget for one query, retries included.
    pub timeout_ms: u64,
    /// Budget for each search branch; must not exceed `timeout_ms`.
    pub branch_timeout_ms: u64,
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub default_max_docs: usize,
    pub max_docs_limit: usize,
    pub preview_chars: usize,
    pub apology_message: String,
    pub no_results_message: String,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            branch_timeout_ms: 10_000,
            retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
            default_max_docs: 5,
            max_docs_limit: 20,
            preview_chars: 200,
            apology_message: "Maaf, terjadi kesalahan saat memproses permintaan Anda.".to_string(),
            no_results_message: "Tidak ditemukan dokumen yang relevan untuk pertanyaan ini.".to_string(),
        }
    }
}

impl FacadeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.branch_timeout_ms == 0 {
            return Err(invalid("facade timeouts must be positive"));
        }
        if self.branch_timeout_ms > self.timeout_ms {
            return Err(invalid("facade.branch_timeout_ms must not exceed facade.timeout_ms"));
        }
        if self.max_docs_limit == 0 {
            return Err(invalid("facade.max_docs_limit must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidConfig(msg.to_string())
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
