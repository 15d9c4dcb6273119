//! Hybrid Retriever
//!
//! Combines vector and BM25 search with weighted min-max fusion.
//!
//! Cosine similarities and BM25 scores live on unrelated scales, so each
//! candidate list is min-max normalized on its own before the weighted sum
//! `vector_weight * v + keyword_weight * k`. Both sub-searches over-fetch by
//! `candidate_multiplier` so fusion has enough overlap to work with.
//!
//! If one sub-search fails the query is answered from the other one and the
//! response says so through [`HybridSearchResponse::degraded`].

use knowledge_engine_config::constants::{embedding, rag, vector_store};
use knowledge_engine_config::{RagConfig, Settings};
use knowledge_engine_core::{Chunk, ChunkMetadata, Embedder, Error, Result, ScoredChunk};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::knowledge_base::KnowledgeBase;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Final number of fused results
    pub top_k: usize,
    /// Weight of normalized vector similarity
    pub vector_weight: f32,
    /// Weight of normalized BM25 score
    pub keyword_weight: f32,
    /// Each sub-search fetches `top_k * candidate_multiplier`
    pub candidate_multiplier: usize,
    /// Minimum fused score
    pub min_score: f32,
    /// Bound on the query embedding call
    pub embed_timeout: Duration,
    /// Bound on the vector index search
    pub vector_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: rag::DEFAULT_TOP_K,
            vector_weight: rag::VECTOR_WEIGHT,
            keyword_weight: rag::KEYWORD_WEIGHT,
            candidate_multiplier: rag::CANDIDATE_MULTIPLIER,
            min_score: rag::MIN_SCORE,
            embed_timeout: Duration::from_millis(embedding::TIMEOUT_MS),
            vector_timeout: Duration::from_millis(vector_store::TIMEOUT_MS),
        }
    }
}

impl From<&RagConfig> for RetrieverConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            top_k: config.top_k,
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            candidate_multiplier: config.candidate_multiplier,
            min_score: config.min_score,
            ..Default::default()
        }
    }
}

impl From<&Settings> for RetrieverConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            embed_timeout: Duration::from_millis(settings.embedding.timeout_ms),
            vector_timeout: Duration::from_millis(settings.vector_store.timeout_ms),
            ..Self::from(&settings.rag)
        }
    }
}

/// Per-query overrides
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub vector_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
}

/// Which sub-search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Dense,
    Sparse,
    Hybrid,
}

/// Final search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Chunk ID
    pub id: String,
    pub content: String,
    /// Fused score
    pub score: f32,
    /// Normalized vector score, if the chunk was a vector candidate
    pub vector_score: Option<f32>,
    /// Normalized BM25 score, if the chunk was a keyword candidate
    pub keyword_score: Option<f32>,
    /// Originating document
    pub source: String,
    pub metadata: ChunkMetadata,
    pub matched_by: SearchSource,
}

/// A sub-search that could not contribute to the result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Degradation {
    /// Embedding or vector search failed; results are keyword-only
    VectorUnavailable(String),
    /// Keyword search failed; results are vector-only
    KeywordUnavailable(String),
}

/// Fused results plus whether they are partial
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HybridSearchResponse {
    pub results: Vec<SearchResult>,
    pub degraded: Option<Degradation>,
}

impl HybridSearchResponse {
    pub fn is_partial(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Min-max normalize scores into [0, 1]
///
/// A single score, or a list where every score is equal, normalizes to 1.0.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    let range = max - min;

    scores
        .iter()
        .map(|&s| {
            if range > f32::EPSILON {
                (s - min) / range
            } else {
                1.0
            }
        })
        .collect()
}

struct Candidate {
    chunk: Chunk,
    /// (rank, normalized score)
    vector: Option<(usize, f32)>,
    keyword: Option<(usize, f32)>,
}

/// Weighted fusion of two normalized candidate lists
///
/// Equal fused scores are ordered by rank in the more heavily weighted list,
/// then by rank in the other one.
pub(crate) fn fuse(
    vector: Vec<ScoredChunk>,
    keyword: Vec<ScoredChunk>,
    vector_weight: f32,
    keyword_weight: f32,
) -> Vec<SearchResult> {
    let vector_norm = normalize_scores(&vector.iter().map(|r| r.score).collect::<Vec<_>>());
    let keyword_norm = normalize_scores(&keyword.iter().map(|r| r.score).collect::<Vec<_>>());

    let mut candidates: Vec<Candidate> = Vec::with_capacity(vector.len() + keyword.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (rank, (result, norm)) in vector.into_iter().zip(vector_norm).enumerate() {
        positions.insert(result.chunk.id.clone(), candidates.len());
        candidates.push(Candidate {
            chunk: result.chunk,
            vector: Some((rank, norm)),
            keyword: None,
        });
    }
    for (rank, (result, norm)) in keyword.into_iter().zip(keyword_norm).enumerate() {
        match positions.get(&result.chunk.id) {
            Some(&pos) => candidates[pos].keyword = Some((rank, norm)),
            None => {
                positions.insert(result.chunk.id.clone(), candidates.len());
                candidates.push(Candidate {
                    chunk: result.chunk,
                    vector: None,
                    keyword: Some((rank, norm)),
                });
            },
        }
    }

    let vector_first = vector_weight >= keyword_weight;
    let rank_key = |c: &Candidate| {
        let v = c.vector.map_or(usize::MAX, |(rank, _)| rank);
        let k = c.keyword.map_or(usize::MAX, |(rank, _)| rank);
        if vector_first {
            (v, k)
        } else {
            (k, v)
        }
    };

    let mut scored: Vec<(f32, Candidate)> = candidates
        .into_iter()
        .map(|c| {
            let v = c.vector.map_or(0.0, |(_, s)| s);
            let k = c.keyword.map_or(0.0, |(_, s)| s);
            (vector_weight * v + keyword_weight * k, c)
        })
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| rank_key(a).cmp(&rank_key(b))));

    scored
        .into_iter()
        .map(|(score, c)| SearchResult {
            id: c.chunk.id,
            content: c.chunk.content,
            score,
            vector_score: c.vector.map(|(_, s)| s),
            keyword_score: c.keyword.map(|(_, s)| s),
            source: c.chunk.metadata.source.clone(),
            metadata: c.chunk.metadata,
            matched_by: match (c.vector, c.keyword) {
                (Some(_), Some(_)) => SearchSource::Hybrid,
                (Some(_), None) => SearchSource::Dense,
                _ => SearchSource::Sparse,
            },
        })
        .collect()
}

fn check_weight(name: &str, weight: f32) -> Result<f32> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "{} must be a non-negative number, got {}",
            name, weight
        )));
    }
    Ok(weight)
}

/// Hybrid retriever combining vector and keyword search
pub struct HybridRetriever {
    config: RetrieverConfig,
    embedder: Arc<dyn Embedder>,
}

impl HybridRetriever {
    pub fn new(config: RetrieverConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Embed the query and search the vector index, each step time-bounded
    async fn search_dense(
        &self,
        query: &str,
        kb: &KnowledgeBase,
        candidates: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vector = tokio::time::timeout(self.config.embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| {
                Error::EmbeddingService(format!(
                    "query embedding timed out after {:?}",
                    self.config.embed_timeout
                ))
            })??;

        tokio::time::timeout(
            self.config.vector_timeout,
            kb.vector_search(&query_vector, candidates),
        )
        .await
        .map_err(|_| {
            Error::VectorIndex(format!(
                "vector search timed out after {:?}",
                self.config.vector_timeout
            ))
        })?
    }

    /// BM25 search off the async executor
    async fn search_sparse(
        &self,
        query: &str,
        kb: &Arc<KnowledgeBase>,
        candidates: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let kb = Arc::clone(kb);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || kb.keyword_search(&query, candidates))
            .await
            .map_err(|e| Error::LexicalIndex(format!("Sparse search task failed: {}", e)))
    }

    /// Hybrid search over one knowledge base
    pub async fn search(
        &self,
        query: &str,
        kb: &Arc<KnowledgeBase>,
        options: &QueryOptions,
    ) -> Result<HybridSearchResponse> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let vector_weight =
            check_weight("vector_weight", options.vector_weight.unwrap_or(self.config.vector_weight))?;
        let keyword_weight = check_weight(
            "keyword_weight",
            options.keyword_weight.unwrap_or(self.config.keyword_weight),
        )?;

        if query.trim().is_empty() || top_k == 0 {
            return Ok(HybridSearchResponse::default());
        }
        let candidates = top_k.saturating_mul(self.config.candidate_multiplier.max(1));

        let (dense_result, sparse_result) = tokio::join!(
            self.search_dense(query, kb, candidates),
            self.search_sparse(query, kb, candidates)
        );

        let (dense, sparse, degraded) = match (dense_result, sparse_result) {
            (Ok(dense), Ok(sparse)) => (dense, sparse, None),
            (Err(e), Ok(sparse)) => {
                tracing::warn!(
                    knowledge_base_id = kb.id(),
                    error = %e,
                    "Vector search unavailable, answering from keyword search only"
                );
                (Vec::new(), sparse, Some(Degradation::VectorUnavailable(e.to_string())))
            },
            (Ok(dense), Err(e)) => {
                tracing::warn!(
                    knowledge_base_id = kb.id(),
                    error = %e,
                    "Keyword search unavailable, answering from vector search only"
                );
                (dense, Vec::new(), Some(Degradation::KeywordUnavailable(e.to_string())))
            },
            (Err(dense_err), Err(sparse_err)) => {
                tracing::error!(
                    knowledge_base_id = kb.id(),
                    vector_error = %dense_err,
                    keyword_error = %sparse_err,
                    "Both sub-searches failed"
                );
                return Err(dense_err);
            },
        };

        let (dense_count, sparse_count) = (dense.len(), sparse.len());
        let min_score = self.config.min_score;
        let results: Vec<SearchResult> = fuse(dense, sparse, vector_weight, keyword_weight)
            .into_iter()
            .filter(|r| r.score >= min_score)
            .take(top_k)
            .collect();

        tracing::debug!(
            knowledge_base_id = kb.id(),
            dense = dense_count,
            sparse = sparse_count,
            returned = results.len(),
            partial = degraded.is_some(),
            "Hybrid search complete"
        );

        Ok(HybridSearchResponse { results, degraded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_engine_core::MetadataMap;

    fn scored(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                content: format!("text {}", id),
                metadata: ChunkMetadata {
                    source: "doc.txt".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    start_char: 0,
                    end_char: 6,
                    word_count: 2,
                    extra: MetadataMap::new(),
                },
            },
            score,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_config_from_rag_config() {
        let rag = RagConfig {
            top_k: 8,
            vector_weight: 0.5,
            ..Default::default()
        };
        let config = RetrieverConfig::from(&rag);
        assert_eq!(config.top_k, 8);
        assert_eq!(config.vector_weight, 0.5);
        assert_eq!(config.keyword_weight, rag::KEYWORD_WEIGHT);
    }

    #[test]
    fn test_normalize_scores() {
        assert_eq!(normalize_scores(&[3.0, 2.0, 1.0]), vec![1.0, 0.5, 0.0]);
        assert_eq!(normalize_scores(&[0.42]), vec![1.0]);
        assert_eq!(normalize_scores(&[2.0, 2.0]), vec![1.0, 1.0]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_fusion_weights_and_sources() {
        let vector = vec![scored("a", 0.9), scored("b", 0.5), scored("c", 0.1)];
        let keyword = vec![scored("c", 7.0), scored("d", 1.0)];

        let fused = fuse(vector, keyword, 0.7, 0.3);
        // a: 0.7, b: 0.35, c: 0.3, d: 0.0
        assert_eq!(ids(&fused), vec!["a", "b", "c", "d"]);
        assert!((fused[0].score - 0.7).abs() < 1e-6);
        assert!((fused[2].score - 0.3).abs() < 1e-6);
        assert_eq!(fused[0].matched_by, SearchSource::Dense);
        assert_eq!(fused[2].matched_by, SearchSource::Hybrid);
        assert_eq!(fused[3].matched_by, SearchSource::Sparse);
        assert_eq!(fused[2].keyword_score, Some(1.0));
        assert_eq!(fused[2].vector_score, Some(0.0));
    }

    #[test]
    fn test_pure_weights_reproduce_single_signal_order() {
        let vector = || vec![scored("a", 0.9), scored("b", 0.8), scored("c", 0.8)];
        let keyword = || vec![scored("c", 5.0), scored("b", 3.0), scored("x", 3.0)];

        let vector_only = fuse(vector(), keyword(), 1.0, 0.0);
        assert_eq!(&ids(&vector_only)[..3], &["a", "b", "c"]);

        let keyword_only = fuse(vector(), keyword(), 0.0, 1.0);
        assert_eq!(&ids(&keyword_only)[..3], &["c", "b", "x"]);
    }

    #[test]
    fn test_single_result_lists_normalize_to_one() {
        let fused = fuse(vec![scored("a", 0.01)], vec![scored("a", 0.2)], 0.7, 0.3);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_weights() {
        assert!(check_weight("vector_weight", -0.1).is_err());
        assert!(check_weight("vector_weight", f32::NAN).is_err());
        assert_eq!(check_weight("keyword_weight", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_degradation_serializes_with_reason() {
        let json = serde_json::to_value(Degradation::VectorUnavailable("timeout".to_string())).unwrap();
        assert_eq!(json["kind"], "vector_unavailable");
        assert_eq!(json["reason"], "timeout");
    }
}
