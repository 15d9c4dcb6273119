//! Vector Store using Qdrant
//!
//! One collection per knowledge base, named `{prefix}_{knowledge_base_id}`.
//! Chunk ids are arbitrary strings while Qdrant point ids must be integers or
//! UUIDs, so each chunk id maps to a UUIDv5 and the original id travels in the
//! payload. Chunk metadata is stored twice: flattened into top-level payload
//! keys so filters run server-side, and as a JSON blob for exact round-trips.

use async_trait::async_trait;
use knowledge_engine_config::constants::{embedding, endpoints, vector_store};
use knowledge_engine_config::VectorStoreSettings;
use knowledge_engine_core::{
    Chunk, ChunkMetadata, Error, MetadataFilter, MetadataValue, Result, ScoredChunk, VectorIndex,
    VectorIndexFactory,
};
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder,
        Distance, Filter, PointId, PointStruct, PointsIdsList, Range, SearchPointsBuilder,
        UpsertPointsBuilder, Value, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::vector_store::check_parallel;

const PAYLOAD_CHUNK_ID: &str = "chunk_id";
const PAYLOAD_CONTENT: &str = "content";
const PAYLOAD_METADATA: &str = "metadata_json";

/// Qdrant connection configuration
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    pub collection_prefix: String,
    /// Vector dimension
    pub vector_dim: usize,
    /// API key (optional)
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection_prefix: vector_store::COLLECTION_PREFIX.to_string(),
            vector_dim: embedding::DIMENSION,
            api_key: None,
            timeout: Duration::from_millis(vector_store::TIMEOUT_MS),
        }
    }
}

impl QdrantConfig {
    pub fn from_settings(settings: &VectorStoreSettings, vector_dim: usize) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            collection_prefix: settings.collection_prefix.clone(),
            vector_dim,
            api_key: settings.api_key.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    pub fn collection_name(&self, knowledge_base_id: &str) -> String {
        format!("{}_{}", self.collection_prefix, knowledge_base_id)
    }
}

fn connect(config: &QdrantConfig) -> Result<Qdrant> {
    let mut builder = Qdrant::from_url(&config.endpoint).timeout(config.timeout);

    if let Some(ref api_key) = config.api_key {
        builder = builder.api_key(api_key.clone());
        tracing::info!("Qdrant connection using API key authentication");
    }

    builder
        .build()
        .map_err(|e| Error::VectorIndex(format!("Qdrant connection failed: {}", e)))
}

/// Stable point id for a chunk id
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// Payload key for a metadata field name
fn payload_key(key: &str) -> &str {
    match key {
        "chunk_index" => "chunkIndex",
        "total_chunks" => "totalChunks",
        "start_char" => "startChar",
        "end_char" => "endChar",
        "word_count" => "wordCount",
        other => other,
    }
}

/// Whole numbers are stored as integers so keyword-style matches work
fn as_integer(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() < 9.0e15).then_some(n as i64)
}

fn to_payload_value(value: &MetadataValue) -> Value {
    match value {
        MetadataValue::Bool(b) => (*b).into(),
        MetadataValue::Number(n) => match as_integer(*n) {
            Some(i) => i.into(),
            None => (*n).into(),
        },
        MetadataValue::String(s) => s.clone().into(),
    }
}

fn build_payload(chunk: &Chunk) -> Result<HashMap<String, Value>> {
    let meta = &chunk.metadata;
    let mut payload: HashMap<String, Value> = HashMap::new();

    // Extension keys first so the fixed fields win on collision
    for (k, v) in &meta.extra {
        payload.insert(k.clone(), to_payload_value(v));
    }
    payload.insert("source".to_string(), meta.source.clone().into());
    payload.insert("chunkIndex".to_string(), (meta.chunk_index as i64).into());
    payload.insert("totalChunks".to_string(), (meta.total_chunks as i64).into());
    payload.insert("startChar".to_string(), (meta.start_char as i64).into());
    payload.insert("endChar".to_string(), (meta.end_char as i64).into());
    payload.insert("wordCount".to_string(), (meta.word_count as i64).into());

    let metadata_json = serde_json::to_string(meta)
        .map_err(|e| Error::VectorIndex(format!("Failed to encode metadata: {}", e)))?;
    payload.insert(PAYLOAD_CHUNK_ID.to_string(), chunk.id.clone().into());
    payload.insert(PAYLOAD_CONTENT.to_string(), chunk.content.clone().into());
    payload.insert(PAYLOAD_METADATA.to_string(), metadata_json.into());

    Ok(payload)
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn chunk_from_payload(payload: &HashMap<String, Value>) -> Result<Chunk> {
    let id = payload_string(payload, PAYLOAD_CHUNK_ID)
        .ok_or_else(|| Error::VectorIndex("point payload missing chunk_id".to_string()))?;
    let content = payload_string(payload, PAYLOAD_CONTENT).unwrap_or_default();
    let metadata_json = payload_string(payload, PAYLOAD_METADATA)
        .ok_or_else(|| Error::VectorIndex(format!("point '{}' missing metadata", id)))?;
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| Error::VectorIndex(format!("Bad metadata on point '{}': {}", id, e)))?;

    Ok(Chunk {
        id,
        content,
        metadata,
    })
}

fn filter_to_qdrant(filter: &MetadataFilter) -> Filter {
    let conditions: Vec<Condition> = filter
        .conditions()
        .map(|(key, value)| {
            let key = payload_key(key).to_string();
            match value {
                MetadataValue::String(s) => Condition::matches(key, s.clone()),
                MetadataValue::Bool(b) => Condition::matches(key, *b),
                MetadataValue::Number(n) => match as_integer(*n) {
                    Some(i) => Condition::matches(key, i),
                    None => Condition::range(
                        key,
                        Range {
                            gte: Some(*n),
                            lte: Some(*n),
                            ..Default::default()
                        },
                    ),
                },
            }
        })
        .collect();
    Filter::must(conditions)
}

/// Vector index backed by one Qdrant collection
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    vector_dim: usize,
}

impl QdrantVectorStore {
    /// Connect and make sure the knowledge base's collection exists
    pub async fn connect(config: &QdrantConfig, knowledge_base_id: &str) -> Result<Self> {
        let store = Self {
            client: connect(config)?,
            collection: config.collection_name(knowledge_base_id),
            vector_dim: config.vector_dim,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create collection if not exists
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| Error::VectorIndex(e.to_string()))?;
            tracing::info!(collection = %self.collection, dim = self.vector_dim, "Created Qdrant collection");
        }

        Ok(())
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len != self.vector_dim {
            return Err(Error::DimensionMismatch {
                expected: self.vector_dim,
                actual: len,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorStore {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_parallel(chunks, vectors)?;
        if chunks.is_empty() {
            return Ok(());
        }
        for vector in vectors {
            self.check_dim(vector.len())?;
        }

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            points.push(PointStruct::new(
                point_id(&chunk.id),
                vector.clone(),
                build_payload(chunk)?,
            ));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.check_dim(query.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        results
            .result
            .into_iter()
            .map(|point| {
                Ok(ScoredChunk {
                    chunk: chunk_from_payload(&point.payload)?,
                    score: point.score,
                })
            })
            .collect()
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let points: Vec<PointId> = ids.iter().map(|id| PointId::from(point_id(id))).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids: points })
                    .wait(true),
            )
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(())
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<()> {
        if filter.is_empty() {
            return Err(Error::InvalidArgument(
                "delete_by_metadata requires at least one condition".to_string(),
            ));
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter_to_qdrant(filter))
                    .wait(true),
            )
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;
        if exists {
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| Error::VectorIndex(e.to_string()))?;
        }
        self.ensure_collection().await
    }

    async fn len(&self) -> Result<usize> {
        let count = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(count.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

/// Creates one Qdrant collection per knowledge base
pub struct QdrantVectorStoreFactory {
    config: QdrantConfig,
}

impl QdrantVectorStoreFactory {
    pub fn new(config: QdrantConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl VectorIndexFactory for QdrantVectorStoreFactory {
    async fn create(&self, knowledge_base_id: &str) -> Result<Arc<dyn VectorIndex>> {
        let store = QdrantVectorStore::connect(&self.config, knowledge_base_id).await?;
        tracing::debug!(knowledge_base_id, collection = %store.collection(), "Qdrant vector index ready");
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_engine_core::MetadataMap;

    fn chunk() -> Chunk {
        let mut extra = MetadataMap::new();
        extra.insert("filename".to_string(), "cats.txt".into());
        extra.insert("size_bytes".to_string(), 2048usize.into());
        extra.insert("ratio".to_string(), 0.5.into());
        Chunk {
            id: "cats.txt#3".to_string(),
            content: "Cats are great pets.".to_string(),
            metadata: ChunkMetadata {
                source: "cats.txt".to_string(),
                chunk_index: 3,
                total_chunks: 4,
                start_char: 120,
                end_char: 140,
                word_count: 4,
                extra,
            },
        }
    }

    #[test]
    fn test_point_id_is_stable_uuid() {
        let a = point_id("cats.txt#0");
        assert_eq!(a, point_id("cats.txt#0"));
        assert_ne!(a, point_id("cats.txt#1"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_collection_name() {
        let config = QdrantConfig::default();
        assert_eq!(config.collection_name("docs"), "knowledge_docs");
    }

    #[test]
    fn test_payload_flattens_metadata() {
        let payload = build_payload(&chunk()).unwrap();
        assert_eq!(payload_string(&payload, "source").as_deref(), Some("cats.txt"));
        assert_eq!(payload_string(&payload, "filename").as_deref(), Some("cats.txt"));
        assert!(matches!(
            payload.get("chunkIndex").and_then(|v| v.kind.as_ref()),
            Some(Kind::IntegerValue(3))
        ));
        assert!(matches!(
            payload.get("size_bytes").and_then(|v| v.kind.as_ref()),
            Some(Kind::IntegerValue(2048))
        ));
        assert!(matches!(
            payload.get("ratio").and_then(|v| v.kind.as_ref()),
            Some(Kind::DoubleValue(_))
        ));
    }

    #[test]
    fn test_chunk_survives_payload() {
        let original = chunk();
        let payload = build_payload(&original).unwrap();
        assert_eq!(chunk_from_payload(&payload).unwrap(), original);

        let mut broken = payload.clone();
        broken.remove(PAYLOAD_CHUNK_ID);
        assert!(matches!(chunk_from_payload(&broken), Err(Error::VectorIndex(_))));
    }

    #[test]
    fn test_filter_conversion() {
        let filter = MetadataFilter::source("cats.txt")
            .eq("chunk_index", 2usize)
            .eq("ratio", 0.5);
        let qdrant = filter_to_qdrant(&filter);
        assert_eq!(qdrant.must.len(), 3);
        assert!(qdrant.should.is_empty());
    }

    #[test]
    fn test_payload_key_aliases() {
        assert_eq!(payload_key("chunk_index"), "chunkIndex");
        assert_eq!(payload_key("source"), "source");
    }
}
