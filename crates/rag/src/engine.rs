//! Knowledge engine facade
//!
//! The surface the rest of the platform talks to: knowledge-base lifecycle,
//! document ingestion and deletion, and hybrid queries.

use knowledge_engine_config::{EmbeddingProvider, Settings, VectorBackend};
use knowledge_engine_core::{DocumentParser, Embedder, Result, VectorIndexFactory};
use serde::Serialize;
use std::sync::Arc;

use crate::embeddings::{EmbeddingConfig, SimpleEmbedder};
use crate::ingest::{ChunkFailure, IngestConfig, IngestOptions, IngestionPipeline};
use crate::knowledge_base::{KnowledgeBaseInfo, KnowledgeBaseRegistry};
use crate::ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
use crate::parser::PlainTextParser;
use crate::qdrant_store::{QdrantConfig, QdrantVectorStoreFactory};
use crate::retriever::{HybridRetriever, HybridSearchResponse, QueryOptions, RetrieverConfig};
use crate::sparse_search::SparseConfig;
use crate::vector_store::InMemoryVectorStoreFactory;

/// Component configuration for [`KnowledgeEngine::new`]
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub retriever: RetrieverConfig,
    pub sparse: SparseConfig,
}

impl TryFrom<&Settings> for EngineConfig {
    type Error = knowledge_engine_core::Error;

    fn try_from(settings: &Settings) -> Result<Self> {
        Ok(Self {
            ingest: IngestConfig::try_from(settings)?,
            retriever: RetrieverConfig::from(settings),
            sparse: SparseConfig::from(&settings.bm25),
        })
    }
}

/// Result of [`KnowledgeEngine::ingest_document`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub chunk_count: usize,
    pub knowledge_base_id: String,
    pub failed_chunks: Vec<ChunkFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hybrid retrieval engine over isolated knowledge bases
pub struct KnowledgeEngine {
    registry: Arc<KnowledgeBaseRegistry>,
    pipeline: IngestionPipeline,
    retriever: HybridRetriever,
}

impl KnowledgeEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_factory: Arc<dyn VectorIndexFactory>,
        parser: Arc<dyn DocumentParser>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(
            KnowledgeBaseRegistry::new(vector_factory, config.sparse)
                .with_vector_retry(config.ingest.vector_retry),
        );
        let pipeline = IngestionPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&embedder),
            parser,
            config.ingest,
        );
        let retriever = HybridRetriever::new(config.retriever, embedder);

        Self {
            registry,
            pipeline,
            retriever,
        }
    }

    /// Wire up the embedder and vector backend named in `settings`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
            EmbeddingProvider::Simple => Arc::new(SimpleEmbedder::new(EmbeddingConfig::from(
                &settings.embedding,
            ))),
            EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
                OllamaEmbeddingConfig::from(&settings.embedding),
            )?),
        };

        let dimension = settings.embedding.dimension;
        let vector_factory: Arc<dyn VectorIndexFactory> = match settings.vector_store.backend {
            VectorBackend::Memory => Arc::new(InMemoryVectorStoreFactory::new(Some(dimension))),
            VectorBackend::Qdrant => Arc::new(QdrantVectorStoreFactory::new(
                QdrantConfig::from_settings(&settings.vector_store, dimension),
            )),
        };

        tracing::info!(
            embedder = embedder.name(),
            dimension,
            vector_backend = ?settings.vector_store.backend,
            "Knowledge engine initialized"
        );

        Ok(Self::new(
            embedder,
            vector_factory,
            Arc::new(PlainTextParser::new()),
            EngineConfig::try_from(settings)?,
        ))
    }

    pub fn registry(&self) -> &Arc<KnowledgeBaseRegistry> {
        &self.registry
    }

    pub async fn create_knowledge_base(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<KnowledgeBaseInfo> {
        Ok(self.registry.create(id, name, description).await?.info())
    }

    pub async fn delete_knowledge_base(&self, id: &str) -> Result<()> {
        self.registry.delete(id).await
    }

    pub fn list_knowledge_bases(&self) -> Vec<KnowledgeBaseInfo> {
        self.registry.list()
    }

    /// Ingest one file; failures are reported in the outcome, never partially applied
    pub async fn ingest_document(
        &self,
        bytes: &[u8],
        filename: &str,
        options: &IngestOptions,
    ) -> IngestOutcome {
        let knowledge_base_id = options
            .knowledge_base_id
            .clone()
            .unwrap_or_else(|| self.pipeline.config().default_knowledge_base.clone());

        match self.pipeline.ingest(bytes, filename, options).await {
            Ok(report) => IngestOutcome {
                success: true,
                chunk_count: report.chunk_count,
                knowledge_base_id: report.knowledge_base_id,
                failed_chunks: Vec::new(),
                error: None,
            },
            Err(failure) => {
                tracing::warn!(
                    knowledge_base_id = %knowledge_base_id,
                    source = filename,
                    error = %failure.error,
                    failed_chunks = failure.failed_chunks.len(),
                    "Ingestion failed"
                );
                IngestOutcome {
                    success: false,
                    chunk_count: 0,
                    knowledge_base_id,
                    failed_chunks: failure.failed_chunks,
                    error: Some(failure.error.to_string()),
                }
            },
        }
    }

    pub async fn delete_document(&self, knowledge_base_id: &str, source: &str) -> Result<usize> {
        self.pipeline.delete_document(knowledge_base_id, source).await
    }

    /// Hybrid query; an unknown knowledge base is `NotFound`
    pub async fn query_knowledge_base(
        &self,
        knowledge_base_id: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<HybridSearchResponse> {
        let kb = self.registry.get(knowledge_base_id)?;
        self.retriever.search(query, &kb, options).await
    }
}
