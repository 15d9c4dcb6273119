//! Text Embeddings
//!
//! Shared embedding configuration, the input truncation policy, and an
//! offline feature-hashing embedder.
//!
//! # Truncation
//!
//! Embedding models reject or silently clip input past their context window.
//! Token counts are approximated from characters: the budget is
//! `max_input_tokens * CHARS_PER_TOKEN` characters with `CHARS_PER_TOKEN = 3`.
//! English averages about four characters per token, so three undercounts and
//! keeps multilingual text and code inside the window. Input is cut on a char
//! boundary, never mid code point.

use async_trait::async_trait;
use knowledge_engine_config::constants::embedding;
use knowledge_engine_config::EmbeddingSettings;
use knowledge_engine_core::{Embedder, Result};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;
use unicode_segmentation::UnicodeSegmentation;

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Model context budget in tokens
    pub max_input_tokens: usize,
    /// Texts per request for bulk embedding
    pub batch_size: usize,
    /// L2-normalize embeddings
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: embedding::DIMENSION,
            max_input_tokens: embedding::MAX_INPUT_TOKENS,
            batch_size: embedding::BATCH_SIZE,
            normalize: true,
        }
    }
}

impl From<&EmbeddingSettings> for EmbeddingConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            embedding_dim: settings.dimension,
            max_input_tokens: settings.max_input_tokens,
            batch_size: settings.batch_size,
            normalize: true,
        }
    }
}

/// Cut `text` to the character budget for `max_input_tokens`
pub fn truncate_for_embedding(text: &str, max_input_tokens: usize) -> &str {
    let budget = max_input_tokens.saturating_mul(embedding::CHARS_PER_TOKEN);
    match text.char_indices().nth(budget) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Scale `v` to unit length in place; zero vectors are left alone
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic bag-of-words embedder
///
/// Each lowercased word is hashed into one of `embedding_dim` buckets. Texts
/// sharing vocabulary land close together under cosine similarity. Needs no
/// model or network, which makes it the default for local runs and tests.
#[derive(Debug, Clone)]
pub struct SimpleEmbedder {
    config: EmbeddingConfig,
}

impl SimpleEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// Generate a hashed embedding
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dim = self.config.embedding_dim.max(1);
        let mut embedding = vec![0.0f32; dim];

        let text = truncate_for_embedding(text, self.config.max_input_tokens);
        for word in text.unicode_words() {
            let mut hasher = XxHash64::with_seed(0);
            word.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() % dim as u64) as usize;
            embedding[idx] += 1.0;
        }

        if self.config.normalize {
            l2_normalize(&mut embedding);
        }
        embedding
    }
}

impl Default for SimpleEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

#[async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }

    fn name(&self) -> &str {
        "simple-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::cosine_similarity;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_for_embedding("short", 10), "short");
        // 2 tokens -> 6 chars
        assert_eq!(truncate_for_embedding("abcdefghij", 2), "abcdef");
        assert_eq!(truncate_for_embedding("ééééééééé", 2), "éééééé");
        assert_eq!(truncate_for_embedding("anything", 0), "");
    }

    #[test]
    fn test_simple_embedder_shape() {
        let embedder = SimpleEmbedder::new(EmbeddingConfig {
            embedding_dim: 64,
            ..Default::default()
        });
        let v = embedder.embed_text("Hello world");
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed_text("");
        assert!(empty.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_simple_embedder_is_deterministic_and_case_insensitive() {
        let embedder = SimpleEmbedder::default();
        assert_eq!(embedder.embed_text("Cats purr"), embedder.embed_text("cats PURR"));
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = SimpleEmbedder::default();
        let query = embedder.embed_text("cats make good pets");
        let related = embedder.embed_text("cats are quiet pets");
        let unrelated = embedder.embed_text("quarterly revenue grew");

        let near = cosine_similarity(&query, &related).unwrap();
        let far = cosine_similarity(&query, &unrelated).unwrap();
        assert!(near > far);
    }

    #[tokio::test]
    async fn test_embed_batch_is_parallel_to_input() {
        let embedder = SimpleEmbedder::default();
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
        assert_eq!(embedder.dim(), embedding::DIMENSION);
    }
}
