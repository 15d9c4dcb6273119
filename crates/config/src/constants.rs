//! Centralized defaults for the knowledge engine
//!
//! Settings defaults and component defaults both read from here so the
//! compiled-in behaviour and the loaded configuration never drift apart.

/// Service endpoints
pub mod endpoints {
    /// Local Ollama server used for embeddings
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Local Qdrant gRPC endpoint
    pub const QDRANT_DEFAULT: &str = "http://localhost:6334";
}

/// Hybrid ranking defaults
pub mod rag {
    /// Final number of fused results
    pub const DEFAULT_TOP_K: usize = 5;

    /// Weight of the normalized vector similarity in the fused score
    pub const VECTOR_WEIGHT: f32 = 0.7;

    /// Weight of the normalized BM25 score in the fused score
    pub const KEYWORD_WEIGHT: f32 = 0.3;

    /// Each sub-index is asked for `top_k * CANDIDATE_MULTIPLIER` candidates
    pub const CANDIDATE_MULTIPLIER: usize = 3;

    /// Fused results below this score are dropped
    pub const MIN_SCORE: f32 = 0.0;

    /// Knowledge base materialized on first ingestion when none is named
    pub const DEFAULT_KNOWLEDGE_BASE_ID: &str = "default";
}

/// Chunker defaults
pub mod chunking {
    /// Target maximum characters per chunk
    pub const CHUNK_SIZE: usize = 1000;

    /// Characters carried into the next chunk
    pub const CHUNK_OVERLAP: usize = 200;

    pub const STRATEGY: &str = "paragraph";

    /// Accepted strategy names
    pub const STRATEGIES: &[&str] = &["fixed", "sentence", "paragraph"];
}

/// Okapi BM25 parameters
pub mod bm25 {
    /// Term-frequency saturation
    pub const K1: f32 = 1.5;

    /// Length normalization
    pub const B: f32 = 0.75;

    /// Tokens shorter than this (in characters) are dropped
    pub const MIN_TOKEN_LEN: usize = 3;

    pub const DEFAULT_TOP_K: usize = 10;
}

/// Embedding service defaults
pub mod embedding {
    /// Output size of [`MODEL`]
    pub const DIMENSION: usize = 384;

    pub const MODEL: &str = "all-minilm";

    /// Model context budget in tokens
    pub const MAX_INPUT_TOKENS: usize = 512;

    /// Conservative characters-per-token proxy used for truncation.
    /// English averages ~4; 3 keeps multilingual and code input under budget.
    pub const CHARS_PER_TOKEN: usize = 3;

    pub const BATCH_SIZE: usize = 32;

    pub const TIMEOUT_MS: u64 = 30_000;

    pub const MAX_RETRIES: u32 = 3;

    /// Doubles after every failed attempt
    pub const INITIAL_BACKOFF_MS: u64 = 100;
}

/// Vector store defaults
pub mod vector_store {
    /// Collections are named `{prefix}_{knowledge_base_id}`
    pub const COLLECTION_PREFIX: &str = "knowledge";

    pub const TIMEOUT_MS: u64 = 10_000;

    pub const MAX_RETRIES: u32 = 2;

    pub const INITIAL_BACKOFF_MS: u64 = 100;
}
