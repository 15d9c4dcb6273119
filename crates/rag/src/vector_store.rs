//! In-process Vector Store
//!
//! Brute-force cosine similarity over every stored vector. O(n) per query,
//! with the same ranking contract as the Qdrant backend: descending
//! similarity, ties in insertion order.

use async_trait::async_trait;
use knowledge_engine_core::{
    Chunk, Error, MetadataFilter, Result, ScoredChunk, VectorIndex, VectorIndexFactory,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Cosine similarity of two equally long vectors
///
/// Unequal lengths are a [`Error::DimensionMismatch`]; a zero vector has
/// similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: b.len(),
            actual: a.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Reject mismatched `chunks`/`vectors` batches before any mutation
pub(crate) fn check_parallel(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(Error::InvalidArgument(format!(
            "Chunk and vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<Entry>,
    positions: HashMap<String, usize>,
    /// Established by config or by the first upsert
    dimension: Option<usize>,
}

impl MemoryState {
    fn retain(&mut self, keep: impl Fn(&Entry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(keep);
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.chunk.id.clone(), pos))
            .collect();
        before - self.entries.len()
    }
}

/// Vector index held in process memory
pub struct InMemoryVectorStore {
    state: RwLock<MemoryState>,
    configured_dim: Option<usize>,
}

impl InMemoryVectorStore {
    /// Create a store; `dimension` of `None` adopts the first upsert's length
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                dimension,
                ..Default::default()
            }),
            configured_dim: dimension,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_parallel(chunks, vectors)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();

        let expected = state.dimension.unwrap_or(vectors[0].len());
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        state.dimension = Some(expected);

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let entry = Entry {
                chunk: chunk.clone(),
                vector: vector.clone(),
            };
            match state.positions.get(&chunk.id).copied() {
                Some(pos) => state.entries[pos] = entry,
                None => {
                    let pos = state.entries.len();
                    state.positions.insert(chunk.id.clone(), pos);
                    state.entries.push(entry);
                },
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read();
        if let Some(dim) = state.dimension {
            if query.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }
        if state.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::with_capacity(state.entries.len());
        for (pos, entry) in state.entries.iter().enumerate() {
            scored.push((pos, cosine_similarity(query, &entry.vector)?));
        }
        // Stable: ties keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: state.entries[pos].chunk.clone(),
                score,
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let removed = state.retain(|e| !ids.contains(&e.chunk.id));
        tracing::trace!(removed, "In-memory vectors deleted");
        Ok(())
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<()> {
        if filter.is_empty() {
            return Err(Error::InvalidArgument(
                "delete_by_metadata requires at least one condition".to_string(),
            ));
        }
        let mut state = self.state.write();
        let removed = state.retain(|e| !filter.matches(&e.chunk.metadata));
        tracing::trace!(removed, "In-memory vectors deleted by metadata");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.state.write() = MemoryState {
            dimension: self.configured_dim,
            ..Default::default()
        };
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().entries.len())
    }
}

/// Creates one [`InMemoryVectorStore`] per knowledge base
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorStoreFactory {
    dimension: Option<usize>,
}

impl InMemoryVectorStoreFactory {
    pub fn new(dimension: Option<usize>) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl VectorIndexFactory for InMemoryVectorStoreFactory {
    async fn create(&self, knowledge_base_id: &str) -> Result<Arc<dyn VectorIndex>> {
        tracing::debug!(knowledge_base_id, "Creating in-memory vector index");
        Ok(Arc::new(InMemoryVectorStore::new(self.dimension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_engine_core::{ChunkMetadata, MetadataMap};

    fn chunk(id: &str, source: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: format!("content of {}", id),
            metadata: ChunkMetadata {
                source: source.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                start_char: 0,
                end_char: 10,
                word_count: 3,
                extra: MetadataMap::new(),
            },
        }
    }

    fn ids(results: &[ScoredChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
        assert_eq!(
            cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_cosine_self_and_symmetry() {
        let a = [0.3, -1.2, 4.0, 0.0];
        let b = [2.0, 0.5, -0.7, 1.1];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = InMemoryVectorStore::default();
        store
            .upsert(
                &[chunk("x", "a"), chunk("y", "a"), chunk("z", "a")],
                &[vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
            )
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(ids(&results), vec!["x", "y"]);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_length_mismatch_fails_fast() {
        let store = InMemoryVectorStore::default();
        let err = store
            .upsert(&[chunk("x", "a"), chunk("y", "a")], &[vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!err.is_retryable());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_hard_error() {
        let store = InMemoryVectorStore::new(Some(3));
        let err = store
            .upsert(&[chunk("x", "a")], &[vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );

        store
            .upsert(&[chunk("x", "a")], &[vec![1.0, 0.0, 0.0]])
            .await
            .unwrap();
        assert!(matches!(
            store.search(&[1.0, 0.0], 5).await,
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let store = InMemoryVectorStore::default();
        store
            .upsert(&[chunk("x", "a"), chunk("y", "a")], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        store.upsert(&[chunk("x", "a")], &[vec![0.0, 1.0]]).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        // Equal scores keep insertion order
        let results = store.search(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(ids(&results), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_delete_and_delete_by_metadata() {
        let store = InMemoryVectorStore::default();
        store
            .upsert(
                &[chunk("a1", "a.txt"), chunk("a2", "a.txt"), chunk("b1", "b.txt")],
                &[vec![1.0], vec![1.0], vec![1.0]],
            )
            .await
            .unwrap();

        store.delete(&["a1".to_string(), "nope".to_string()]).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);

        store
            .delete_by_metadata(&MetadataFilter::source("a.txt"))
            .await
            .unwrap();
        let remaining = store.search(&[1.0], 10).await.unwrap();
        assert_eq!(ids(&remaining), vec!["b1"]);

        assert!(matches!(
            store.delete_by_metadata(&MetadataFilter::new()).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_resets_learned_dimension() {
        let store = InMemoryVectorStore::default();
        store.upsert(&[chunk("x", "a")], &[vec![1.0, 0.0]]).await.unwrap();
        assert_eq!(store.dimension(), Some(2));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await.unwrap());
        assert_eq!(store.dimension(), None);
        assert!(store.search(&[1.0, 0.0, 0.0], 3).await.unwrap().is_empty());
    }
}
