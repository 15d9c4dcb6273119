//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{bm25, chunking, embedding, endpoints, rag, vector_store};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Hybrid ranking
    #[serde(default)]
    pub rag: RagConfig,

    /// Default chunking options for ingestion
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Lexical index parameters
    #[serde(default)]
    pub bm25: Bm25Config,

    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Vector index backend
    #[serde(default)]
    pub vector_store: VectorStoreSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Hybrid ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Final number of fused results
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Weight of normalized vector similarity
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Weight of normalized BM25 score
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Over-fetch factor applied to both sub-searches
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Fused results scoring below this are dropped
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Knowledge base used when ingestion names none
    #[serde(default = "default_knowledge_base")]
    pub default_knowledge_base: String,
}

fn default_top_k() -> usize {
    rag::DEFAULT_TOP_K
}

fn default_vector_weight() -> f32 {
    rag::VECTOR_WEIGHT
}

fn default_keyword_weight() -> f32 {
    rag::KEYWORD_WEIGHT
}

fn default_candidate_multiplier() -> usize {
    rag::CANDIDATE_MULTIPLIER
}

fn default_min_score() -> f32 {
    rag::MIN_SCORE
}

fn default_knowledge_base() -> String {
    rag::DEFAULT_KNOWLEDGE_BASE_ID.to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            min_score: default_min_score(),
            default_knowledge_base: default_knowledge_base(),
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// One of `fixed`, `sentence`, `paragraph`
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_chunk_size() -> usize {
    chunking::CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    chunking::CHUNK_OVERLAP
}

fn default_strategy() -> String {
    chunking::STRATEGY.to_string()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            strategy: default_strategy(),
        }
    }
}

/// BM25 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    #[serde(default = "default_k1")]
    pub k1: f32,

    #[serde(default = "default_b")]
    pub b: f32,

    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Results returned by a plain lexical search
    #[serde(default = "default_bm25_top_k")]
    pub top_k: usize,

    /// Per-knowledge-base chunk capacity (unbounded when absent)
    #[serde(default)]
    pub max_documents: Option<usize>,
}

fn default_k1() -> f32 {
    bm25::K1
}

fn default_b() -> f32 {
    bm25::B
}

fn default_min_token_len() -> usize {
    bm25::MIN_TOKEN_LEN
}

fn default_bm25_top_k() -> usize {
    bm25::DEFAULT_TOP_K
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            min_token_len: default_min_token_len(),
            top_k: default_bm25_top_k(),
            max_documents: None,
        }
    }
}

/// Embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic in-process hashing embedder (offline, tests)
    #[default]
    Simple,
    /// Ollama `/api/embed`
    Ollama,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Token budget of the model; input is truncated to a character proxy of it
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    #[serde(default = "default_embedding_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_ollama_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}

fn default_embedding_model() -> String {
    embedding::MODEL.to_string()
}

fn default_dimension() -> usize {
    embedding::DIMENSION
}

fn default_max_input_tokens() -> usize {
    embedding::MAX_INPUT_TOKENS
}

fn default_batch_size() -> usize {
    embedding::BATCH_SIZE
}

fn default_embedding_timeout_ms() -> u64 {
    embedding::TIMEOUT_MS
}

fn default_embedding_retries() -> u32 {
    embedding::MAX_RETRIES
}

fn default_embedding_backoff_ms() -> u64 {
    embedding::INITIAL_BACKOFF_MS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: default_ollama_endpoint(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            max_input_tokens: default_max_input_tokens(),
            batch_size: default_batch_size(),
            timeout_ms: default_embedding_timeout_ms(),
            max_retries: default_embedding_retries(),
            initial_backoff_ms: default_embedding_backoff_ms(),
        }
    }
}

/// Vector index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// In-process brute-force cosine search
    #[default]
    Memory,
    /// External Qdrant service, one collection per knowledge base
    Qdrant,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    #[serde(default)]
    pub backend: VectorBackend,

    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// API key (optional, for cloud deployments)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_vector_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_vector_retries")]
    pub max_retries: u32,

    #[serde(default = "default_vector_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}

fn default_collection_prefix() -> String {
    vector_store::COLLECTION_PREFIX.to_string()
}

fn default_vector_timeout_ms() -> u64 {
    vector_store::TIMEOUT_MS
}

fn default_vector_retries() -> u32 {
    vector_store::MAX_RETRIES
}

fn default_vector_backoff_ms() -> u64 {
    vector_store::INITIAL_BACKOFF_MS
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            endpoint: default_qdrant_endpoint(),
            collection_prefix: default_collection_prefix(),
            api_key: None,
            timeout_ms: default_vector_timeout_ms(),
            max_retries: default_vector_retries(),
            initial_backoff_ms: default_vector_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_rag()?;
        self.validate_chunking()?;
        self.validate_bm25()?;
        self.validate_embedding()?;
        self.validate_vector_store()?;
        Ok(())
    }

    fn validate_rag(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;

        for (field, weight) in [
            ("rag.vector_weight", rag.vector_weight),
            ("rag.keyword_weight", rag.keyword_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be a non-negative number, got {}", weight),
                });
            }
        }

        if rag.vector_weight == 0.0 && rag.keyword_weight == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.vector_weight".to_string(),
                message: "vector_weight and keyword_weight cannot both be 0".to_string(),
            });
        }

        if rag.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.top_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if rag.candidate_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.candidate_multiplier".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !rag.min_score.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "rag.min_score".to_string(),
                message: format!("Must be finite, got {}", rag.min_score),
            });
        }

        if rag.default_knowledge_base.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "rag.default_knowledge_base".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let c = &self.chunking;

        if c.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunking.chunk_size".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if c.chunk_overlap >= c.chunk_size {
            return Err(ConfigError::InvalidValue {
                field: "chunking.chunk_overlap".to_string(),
                message: format!(
                    "Must be smaller than chunk_size ({}), got {}",
                    c.chunk_size, c.chunk_overlap
                ),
            });
        }

        let strategy = c.strategy.to_ascii_lowercase();
        if !chunking::STRATEGIES.contains(&strategy.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "chunking.strategy".to_string(),
                message: format!(
                    "Must be one of {:?}, got '{}'",
                    chunking::STRATEGIES,
                    c.strategy
                ),
            });
        }

        Ok(())
    }

    fn validate_bm25(&self) -> Result<(), ConfigError> {
        let b = &self.bm25;

        if !b.k1.is_finite() || b.k1 <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "bm25.k1".to_string(),
                message: format!("Must be positive, got {}", b.k1),
            });
        }

        if !(0.0..=1.0).contains(&b.b) {
            return Err(ConfigError::InvalidValue {
                field: "bm25.b".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", b.b),
            });
        }

        if b.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bm25.top_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if b.max_documents == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "bm25.max_documents".to_string(),
                message: "Must be at least 1 when set".to_string(),
            });
        }

        Ok(())
    }

    fn validate_embedding(&self) -> Result<(), ConfigError> {
        let e = &self.embedding;

        for (field, value) in [
            ("embedding.dimension", e.dimension),
            ("embedding.max_input_tokens", e.max_input_tokens),
            ("embedding.batch_size", e.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Must be at least 1".to_string(),
                });
            }
        }

        if e.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.timeout_ms".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if e.provider == EmbeddingProvider::Ollama && e.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField("embedding.endpoint".to_string()));
        }

        Ok(())
    }

    fn validate_vector_store(&self) -> Result<(), ConfigError> {
        let v = &self.vector_store;

        if v.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vector_store.timeout_ms".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if v.backend == VectorBackend::Qdrant {
            if v.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField("vector_store.endpoint".to_string()));
            }
            if v.collection_prefix.trim().is_empty() {
                return Err(ConfigError::MissingField(
                    "vector_store.collection_prefix".to_string(),
                ));
            }
            if self.environment.is_production() && v.api_key.is_none() {
                return Err(ConfigError::MissingField("vector_store.api_key".to_string()));
            }
        }

        Ok(())
    }
}

/// Load settings from `./config` and the environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (KNOWLEDGE_ENGINE__ prefix, `__` separator)
/// 2. config/{env}.yaml|toml (if env specified)
/// 3. config/default.yaml|toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from an explicit configuration directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(
        File::with_name(&dir.join("default").to_string_lossy()).required(false),
    );

    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&dir.join(env_name).to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("KNOWLEDGE_ENGINE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
