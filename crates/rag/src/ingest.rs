//! Ingestion Pipeline
//!
//! Parse → chunk → embed → vector upsert → lexical add, for one document.
//!
//! The pipeline is the only writer to a knowledge base's two indices and
//! keeps them in lock-step:
//! - embedding happens before either index is touched, so an embedding
//!   failure leaves the knowledge base unchanged;
//! - index writes run under the knowledge base's write lock;
//! - if the lexical add fails after the vector upsert succeeded, the new
//!   vectors are deleted again before the failure is reported.
//!
//! Re-ingesting a source that is already present replaces it: the old
//! chunks are removed from both indices before the new ones are written.

use chrono::Utc;
use knowledge_engine_config::{constants::rag, Settings};
use knowledge_engine_core::{
    Chunk, DocumentParser, Embedder, Error, MetadataFilter, Result, VectorIndex,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error as ThisError;

use crate::chunker::{ChunkOptions, ChunkStrategy, Chunker};
use crate::knowledge_base::{DocumentRecord, KnowledgeBase, KnowledgeBaseRegistry};
use crate::retry::RetryPolicy;

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Target knowledge base; the configured default when `None`
    pub knowledge_base_id: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub strategy: Option<ChunkStrategy>,
}

impl IngestOptions {
    pub fn for_knowledge_base(id: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: Some(id.into()),
            ..Default::default()
        }
    }

    fn chunk_options(&self, base: ChunkOptions) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(base.chunk_overlap),
            strategy: self.strategy.unwrap_or(base.strategy),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Chunking used when a call does not override it
    pub chunk: ChunkOptions,
    pub default_knowledge_base: String,
    pub embed_retry: RetryPolicy,
    pub vector_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkOptions::default(),
            default_knowledge_base: rag::DEFAULT_KNOWLEDGE_BASE_ID.to_string(),
            embed_retry: RetryPolicy::default(),
            vector_retry: RetryPolicy::default(),
        }
    }
}

impl TryFrom<&Settings> for IngestConfig {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self> {
        Ok(Self {
            chunk: ChunkOptions::try_from(&settings.chunking)?,
            default_knowledge_base: settings.rag.default_knowledge_base.clone(),
            embed_retry: RetryPolicy::embedding(&settings.embedding),
            vector_retry: RetryPolicy::vector_store(&settings.vector_store),
        })
    }
}

/// Successful ingestion summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub knowledge_base_id: String,
    pub source: String,
    pub chunk_count: usize,
    /// A previous version of the source was replaced
    pub replaced: bool,
}

/// A chunk that could not be indexed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub reason: String,
}

/// Failed ingestion; neither index holds any of the document's new chunks
#[derive(ThisError, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct IngestFailure {
    pub error: Error,
    /// Chunks affected by the failure, empty if it happened before chunking
    pub failed_chunks: Vec<ChunkFailure>,
}

impl IngestFailure {
    fn for_chunks(error: Error, chunks: &[Chunk]) -> Self {
        let reason = error.to_string();
        Self {
            failed_chunks: chunks
                .iter()
                .map(|c| ChunkFailure {
                    chunk_index: c.metadata.chunk_index,
                    reason: reason.clone(),
                })
                .collect(),
            error,
        }
    }
}

impl From<Error> for IngestFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            failed_chunks: Vec::new(),
        }
    }
}

/// Document ingestion into knowledge bases
pub struct IngestionPipeline {
    registry: Arc<KnowledgeBaseRegistry>,
    embedder: Arc<dyn Embedder>,
    parser: Arc<dyn DocumentParser>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<KnowledgeBaseRegistry>,
        embedder: Arc<dyn Embedder>,
        parser: Arc<dyn DocumentParser>,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            parser,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one uploaded file
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        options: &IngestOptions,
    ) -> std::result::Result<IngestReport, IngestFailure> {
        let kb_id = options
            .knowledge_base_id
            .as_deref()
            .unwrap_or(&self.config.default_knowledge_base);

        let chunker = Chunker::new(options.chunk_options(self.config.chunk))?;
        let parsed = self.parser.parse(bytes, filename)?;
        let chunks = chunker.chunk(&parsed.content, filename, &parsed.metadata);

        tracing::info!(
            knowledge_base_id = kb_id,
            source = filename,
            bytes = bytes.len(),
            chunks = chunks.len(),
            strategy = ?chunker.options().strategy,
            "Ingesting document"
        );

        let kb = self.registry.get_or_create(kb_id).await?;

        // Nothing is written until every chunk has a vector
        let vectors = self
            .embed_chunks(&chunks)
            .await
            .map_err(|e| IngestFailure::for_chunks(e, &chunks))?;

        let _guard = kb.lock_writes().await;
        // Deleted while the chunks were being embedded
        kb.ensure_live()
            .map_err(|e| IngestFailure::for_chunks(e, &chunks))?;

        let replaced = match kb.document(filename) {
            Some(previous) => {
                self.remove_document(&kb, &previous).await?;
                true
            },
            None => false,
        };

        self.write_indices(&kb, &chunks, &vectors)
            .await
            .map_err(|e| IngestFailure::for_chunks(e, &chunks))?;

        kb.record_document(DocumentRecord {
            source: filename.to_string(),
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
            ingested_at: Utc::now(),
        });

        tracing::info!(
            knowledge_base_id = kb_id,
            source = filename,
            chunks = chunks.len(),
            replaced,
            "Document ingested"
        );

        Ok(IngestReport {
            knowledge_base_id: kb_id.to_string(),
            source: filename.to_string(),
            chunk_count: chunks.len(),
            replaced,
        })
    }

    /// Remove one document from both indices, returning its chunk count
    pub async fn delete_document(&self, knowledge_base_id: &str, source: &str) -> Result<usize> {
        let kb = self.registry.get(knowledge_base_id)?;
        let _guard = kb.lock_writes().await;
        kb.ensure_live()?;

        let record = kb.document(source).ok_or_else(|| {
            Error::NotFound(format!(
                "document '{}' in knowledge base '{}'",
                source, knowledge_base_id
            ))
        })?;
        self.remove_document(&kb, &record).await?;

        tracing::info!(
            knowledge_base_id,
            source,
            chunks = record.chunk_ids.len(),
            "Document deleted"
        );
        Ok(record.chunk_ids.len())
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let vectors = self
            .config
            .embed_retry
            .run("embed_batch", Error::EmbeddingService, || {
                self.embedder.embed_batch(&texts)
            })
            .await?;

        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingService(format!(
                "{} returned {} vectors for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(vectors)
    }

    /// Vector upsert then lexical add, undoing the upsert if the add fails
    async fn write_indices(
        &self,
        kb: &KnowledgeBase,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let index = kb.vectors();

        let upserted = self
            .config
            .vector_retry
            .run("vector upsert", Error::VectorIndex, || index.upsert(chunks, vectors))
            .await;
        if let Err(e) = upserted {
            // A timed-out upsert may still have landed some points
            self.compensate(kb, index, &ids).await;
            return Err(e);
        }

        if let Err(e) = kb.lexical().add_documents(chunks) {
            tracing::warn!(
                knowledge_base_id = kb.id(),
                error = %e,
                chunks = ids.len(),
                "Lexical index update failed, rolling back vector upsert"
            );
            self.compensate(kb, index, &ids).await;
            return Err(e);
        }
        Ok(())
    }

    async fn compensate(&self, kb: &KnowledgeBase, index: &Arc<dyn VectorIndex>, ids: &[String]) {
        let rollback = self
            .config
            .vector_retry
            .run("vector rollback", Error::VectorIndex, || index.delete(ids))
            .await;
        if let Err(e) = rollback {
            tracing::error!(
                knowledge_base_id = kb.id(),
                error = %e,
                chunks = ids.len(),
                "Vector rollback failed, indices may diverge"
            );
        }
    }

    /// Remove a recorded document from both indices; caller holds the write lock
    async fn remove_document(&self, kb: &KnowledgeBase, record: &DocumentRecord) -> Result<()> {
        let filter = MetadataFilter::source(record.source.as_str());
        let index = kb.vectors();
        self.config
            .vector_retry
            .run("vector delete", Error::VectorIndex, || {
                index.delete_by_metadata(&filter)
            })
            .await?;

        kb.lexical().remove(&record.chunk_ids);
        kb.forget_document(&record.source);
        Ok(())
    }
}
