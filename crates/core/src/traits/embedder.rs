//! Embedding service seam

use async_trait::async_trait;

use crate::Result;

/// Converts text into fixed-length dense vectors
///
/// Implementations must surface every service failure as
/// [`Error::EmbeddingService`](crate::Error::EmbeddingService) so ingestion
/// can tell it apart from indexing failures.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts; output is parallel to the input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality
    fn dim(&self) -> usize;

    /// Model or adapter name, used in logs
    fn name(&self) -> &str;
}
