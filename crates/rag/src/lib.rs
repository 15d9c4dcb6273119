//! Hybrid retrieval over isolated knowledge bases
//!
//! Features:
//! - Fixed, sentence and paragraph chunking with overlap
//! - Hand-built BM25 inverted index
//! - Dense vector search, in-process or via Qdrant
//! - Weighted min-max fusion with graceful degradation
//! - Ingestion that keeps both indices in lock-step
//! - Offline hashing embedder and Ollama embeddings

pub mod chunker;
pub mod embeddings;
pub mod engine;
pub mod ingest;
pub mod knowledge_base;
pub mod ollama_embeddings;
pub mod parser;
pub mod qdrant_store;
pub mod retriever;
pub mod retry;
pub mod sparse_search;
pub mod vector_store;

pub use chunker::{ChunkOptions, ChunkStrategy, Chunker};
pub use embeddings::{truncate_for_embedding, EmbeddingConfig, SimpleEmbedder};
pub use engine::{EngineConfig, IngestOutcome, KnowledgeEngine};
pub use ingest::{
    ChunkFailure, IngestConfig, IngestFailure, IngestOptions, IngestReport, IngestionPipeline,
};
pub use knowledge_base::{
    DocumentRecord, KnowledgeBase, KnowledgeBaseInfo, KnowledgeBaseRegistry,
};
pub use ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use parser::PlainTextParser;
pub use qdrant_store::{QdrantConfig, QdrantVectorStore, QdrantVectorStoreFactory};
pub use retriever::{
    normalize_scores, Degradation, HybridRetriever, HybridSearchResponse, QueryOptions,
    RetrieverConfig, SearchResult, SearchSource,
};
pub use retry::RetryPolicy;
pub use sparse_search::{tokenize, SparseConfig, SparseIndex};
pub use vector_store::{cosine_similarity, InMemoryVectorStore, InMemoryVectorStoreFactory};

pub use knowledge_engine_core::{
    Chunk, ChunkMetadata, DocumentParser, Embedder, Error, MetadataFilter, MetadataMap,
    MetadataValue, ParsedDocument, Result, ScoredChunk, VectorIndex, VectorIndexFactory,
};
