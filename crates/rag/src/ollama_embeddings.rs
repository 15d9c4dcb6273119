//! Ollama Embeddings
//!
//! Uses Ollama's `/api/embed` endpoint for generating dense vectors.
//!
//! Texts are truncated with [`truncate_for_embedding`] and sent in batches of
//! `batch_size` as one `input` array per request. Every failure (transport,
//! HTTP status, malformed body, wrong dimension) surfaces as
//! `Error::EmbeddingService` so ingestion can retry or abort the document.

use async_trait::async_trait;
use knowledge_engine_config::constants::{embedding, endpoints};
use knowledge_engine_config::EmbeddingSettings;
use knowledge_engine_core::{Embedder, Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embeddings::truncate_for_embedding;

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Embedding dimension
    pub embedding_dim: usize,
    pub max_input_tokens: usize,
    pub batch_size: usize,
    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            model: embedding::MODEL.to_string(),
            embedding_dim: embedding::DIMENSION,
            max_input_tokens: embedding::MAX_INPUT_TOKENS,
            batch_size: embedding::BATCH_SIZE,
            timeout: Duration::from_millis(embedding::TIMEOUT_MS),
        }
    }
}

impl From<&EmbeddingSettings> for OllamaEmbeddingConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            embedding_dim: settings.dimension,
            max_input_tokens: settings.max_input_tokens,
            batch_size: settings.batch_size.max(1),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

/// Request to Ollama embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: OllamaEmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::EmbeddingService(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            dim = config.embedding_dim,
            "Ollama embedder configured"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaEmbeddingConfig {
        &self.config
    }

    /// One `/api/embed` round trip for an already-sized batch
    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: texts
                .iter()
                .map(|t| truncate_for_embedding(t, self.config.max_input_tokens))
                .collect(),
        };

        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingService(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingService(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let embed_response: EmbedResponse = response.json().await.map_err(|e| {
            Error::EmbeddingService(format!("Failed to parse Ollama response: {}", e))
        })?;

        self.check_response(texts.len(), embed_response.embeddings)
    }

    fn check_response(&self, expected: usize, embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            return Err(Error::EmbeddingService(format!(
                "Ollama returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.config.embedding_dim) {
            return Err(Error::EmbeddingService(format!(
                "model '{}' returned dimension {}, configured {}",
                self.config.model,
                bad.len(),
                self.config.embedding_dim
            )));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_request(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingService("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            embeddings.extend(self.embed_request(batch).await?);
        }
        Ok(embeddings)
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> OllamaEmbedder {
        OllamaEmbedder::new(OllamaEmbeddingConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            embedding_dim: 4,
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_from_settings() {
        let settings = EmbeddingSettings {
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 0,
            timeout_ms: 1500,
            ..Default::default()
        };
        let config = OllamaEmbeddingConfig::from(&settings);
        assert_eq!(config.model, "all-minilm");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_default_model_matches_default_dimension() {
        let config = OllamaEmbeddingConfig::from(&EmbeddingSettings::default());
        assert_eq!(config.model, "all-minilm");
        assert_eq!(config.embedding_dim, 384);
    }

    #[test]
    fn test_request_serializes_input_array() {
        let request = EmbedRequest {
            model: "m",
            input: vec!["a", "b"],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_response_shape_checked() {
        let embedder = unreachable();
        assert!(embedder.check_response(1, vec![vec![0.0; 4]]).is_ok());
        assert!(matches!(
            embedder.check_response(2, vec![vec![0.0; 4]]),
            Err(Error::EmbeddingService(_))
        ));
        assert!(matches!(
            embedder.check_response(1, vec![vec![0.0; 3]]),
            Err(Error::EmbeddingService(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_embedding_error() {
        let err = unreachable().embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let batch = unreachable().embed_batch(&[]).await.unwrap();
        assert!(batch.is_empty());
    }
}
