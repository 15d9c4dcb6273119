//! Vector index seam

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Chunk, MetadataFilter, Result, ScoredChunk};

/// Chunk-id to vector store for one knowledge base
///
/// Search ranks by cosine similarity, descending. A query whose length
/// differs from the stored vectors fails with
/// [`Error::DimensionMismatch`](crate::Error::DimensionMismatch).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace; `chunks` and `vectors` are parallel and equally long
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove by chunk id; unknown ids are ignored
    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<()>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Number of stored vectors
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Creates the vector index owned by a new knowledge base
#[async_trait]
pub trait VectorIndexFactory: Send + Sync {
    async fn create(&self, knowledge_base_id: &str) -> Result<Arc<dyn VectorIndex>>;
}
