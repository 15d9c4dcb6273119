//! Knowledge Base Registry
//!
//! A knowledge base is an isolated corpus: one lexical index, one vector
//! index, and the set of documents ingested into it. Both indices are only
//! ever written by the ingestion pipeline (and by [`KnowledgeBaseRegistry::delete`]),
//! which holds the knowledge base's write lock for the duration of the
//! update. Everything public on [`KnowledgeBase`] is read-only.
//!
//! Deletion marks the knowledge base as deleted under that same lock; writers
//! that were waiting on it then fail with `NotFound`.

use chrono::{DateTime, Utc};
use knowledge_engine_config::VectorStoreSettings;
use knowledge_engine_core::{Error, Result, ScoredChunk, VectorIndex, VectorIndexFactory};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::retry::RetryPolicy;
use crate::sparse_search::{SparseConfig, SparseIndex};

/// Chunks contributed by one ingested document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub source: String,
    pub chunk_ids: Vec<String>,
    pub ingested_at: DateTime<Utc>,
}

/// Summary returned by [`KnowledgeBaseRegistry::list`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub document_count: usize,
    pub chunk_count: usize,
}

/// One isolated corpus
pub struct KnowledgeBase {
    id: String,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    lexical: SparseIndex,
    vectors: Arc<dyn VectorIndex>,
    documents: RwLock<BTreeMap<String, DocumentRecord>>,
    /// Serializes ingestion, document deletion and teardown
    write_lock: Mutex<()>,
    /// Set by [`KnowledgeBaseRegistry::delete`] while holding `write_lock`
    deleted: AtomicBool,
}

impl KnowledgeBase {
    fn new(
        id: &str,
        name: &str,
        description: &str,
        sparse_config: SparseConfig,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            lexical: SparseIndex::new(sparse_config),
            vectors,
            documents: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn info(&self) -> KnowledgeBaseInfo {
        KnowledgeBaseInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            document_count: self.documents.read().len(),
            chunk_count: self.lexical.len(),
        }
    }

    /// Number of chunks in the lexical index
    pub fn chunk_count(&self) -> usize {
        self.lexical.len()
    }

    /// Number of vectors in the vector index
    pub async fn vector_count(&self) -> Result<usize> {
        self.vectors.len().await
    }

    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.lexical.contains(chunk_id)
    }

    pub fn document(&self, source: &str) -> Option<DocumentRecord> {
        self.documents.read().get(source).cloned()
    }

    /// Ingested document sources, sorted
    pub fn documents(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    /// BM25 search over this knowledge base
    pub fn keyword_search(&self, query: &str, top_k: usize) -> Vec<ScoredChunk> {
        self.lexical.search(query, Some(top_k))
    }

    /// Cosine search over this knowledge base
    pub async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.vectors.search(query, top_k).await
    }

    pub(crate) fn lexical(&self) -> &SparseIndex {
        &self.lexical
    }

    pub(crate) fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    /// Whether the knowledge base has been removed from its registry
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// `NotFound` once deleted; check after taking the write lock
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::NotFound(format!("knowledge base '{}'", self.id)));
        }
        Ok(())
    }

    pub(crate) fn record_document(&self, record: DocumentRecord) {
        self.documents.write().insert(record.source.clone(), record);
    }

    pub(crate) fn forget_document(&self, source: &str) -> Option<DocumentRecord> {
        self.documents.write().remove(source)
    }

    /// Empty both indices; caller holds the write lock
    ///
    /// The vector index is cleared first. If that fails the lexical index
    /// and document map are left as they were.
    async fn purge(&self, retry: &RetryPolicy) -> Result<()> {
        let vectors = &self.vectors;
        retry
            .run("vector clear", Error::VectorIndex, || vectors.clear())
            .await?;
        self.lexical.clear();
        self.documents.write().clear();
        Ok(())
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("chunks", &self.lexical.len())
            .finish()
    }
}

/// Knowledge base ids become collection names, so keep them simple
pub fn validate_knowledge_base_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "knowledge base id '{}' must be 1-64 characters of [A-Za-z0-9_-]",
            id
        )))
    }
}

/// Owns every knowledge base in the process
pub struct KnowledgeBaseRegistry {
    bases: RwLock<HashMap<String, Arc<KnowledgeBase>>>,
    vector_factory: Arc<dyn VectorIndexFactory>,
    sparse_config: SparseConfig,
    /// Bounds the registry's own vector index calls
    vector_retry: RetryPolicy,
    /// Held while a vector index is being created
    create_lock: Mutex<()>,
}

impl KnowledgeBaseRegistry {
    pub fn new(vector_factory: Arc<dyn VectorIndexFactory>, sparse_config: SparseConfig) -> Self {
        Self {
            bases: RwLock::new(HashMap::new()),
            vector_factory,
            sparse_config,
            vector_retry: RetryPolicy::vector_store(&VectorStoreSettings::default()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn with_vector_retry(mut self, policy: RetryPolicy) -> Self {
        self.vector_retry = policy;
        self
    }

    /// Create an empty knowledge base
    pub async fn create(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Arc<KnowledgeBase>> {
        validate_knowledge_base_id(id)?;
        let _guard = self.create_lock.lock().await;

        if self.bases.read().contains_key(id) {
            return Err(Error::AlreadyExists(format!("knowledge base '{}'", id)));
        }
        self.insert_new(id, name, description).await
    }

    /// Look up a knowledge base
    pub fn get(&self, id: &str) -> Result<Arc<KnowledgeBase>> {
        self.bases
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("knowledge base '{}'", id)))
    }

    /// Look up a knowledge base, creating it on first use
    ///
    /// Only ingestion materializes knowledge bases implicitly.
    pub(crate) async fn get_or_create(&self, id: &str) -> Result<Arc<KnowledgeBase>> {
        if let Ok(kb) = self.get(id) {
            return Ok(kb);
        }
        validate_knowledge_base_id(id)?;
        let _guard = self.create_lock.lock().await;

        // Another caller may have won the race
        if let Ok(kb) = self.get(id) {
            return Ok(kb);
        }
        self.insert_new(id, id, "").await
    }

    async fn insert_new(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Arc<KnowledgeBase>> {
        let vectors = self.vector_factory.create(id).await?;

        // A backend collection can outlive the knowledge base that filled it
        let retry = &self.vector_retry;
        let stale = retry
            .run("vector count", Error::VectorIndex, || vectors.len())
            .await?;
        if stale > 0 {
            tracing::warn!(
                knowledge_base_id = id,
                stale,
                "Discarding vectors left from a previous knowledge base"
            );
            retry
                .run("vector clear", Error::VectorIndex, || vectors.clear())
                .await?;
        }

        let kb = Arc::new(KnowledgeBase::new(
            id,
            name,
            description,
            self.sparse_config.clone(),
            vectors,
        ));
        self.bases.write().insert(id.to_string(), Arc::clone(&kb));

        tracing::info!(knowledge_base_id = id, name, "Knowledge base created");
        Ok(kb)
    }

    /// All knowledge bases, sorted by id
    pub fn list(&self) -> Vec<KnowledgeBaseInfo> {
        let mut infos: Vec<KnowledgeBaseInfo> =
            self.bases.read().values().map(|kb| kb.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bases.read().contains_key(id)
    }

    /// Remove a knowledge base and empty both of its indices
    ///
    /// Waits for any in-flight write to the knowledge base to finish first.
    /// If the indices cannot be emptied the knowledge base stays registered
    /// and the delete can be retried.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let kb = self.get(id)?;

        let _guard = kb.lock_writes().await;
        kb.ensure_live()?;

        let chunks = kb.chunk_count();
        if let Err(e) = kb.purge(&self.vector_retry).await {
            tracing::error!(
                knowledge_base_id = id,
                error = %e,
                "Knowledge base purge failed, keeping it registered"
            );
            return Err(e);
        }

        kb.deleted.store(true, Ordering::Release);
        {
            let mut bases = self.bases.write();
            if bases.get(id).is_some_and(|current| Arc::ptr_eq(current, &kb)) {
                bases.remove(id);
            }
        }

        tracing::info!(knowledge_base_id = id, chunks, "Knowledge base deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{InMemoryVectorStore, InMemoryVectorStoreFactory};
    use async_trait::async_trait;
    use knowledge_engine_core::{Chunk, ChunkMetadata, MetadataFilter, MetadataMap};
    use std::time::Duration;

    fn registry() -> KnowledgeBaseRegistry {
        KnowledgeBaseRegistry::new(
            Arc::new(InMemoryVectorStoreFactory::default()),
            SparseConfig::default(),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    fn chunk(id: &str, source: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: format!("stored text of {}", id),
            metadata: ChunkMetadata {
                source: source.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                start_char: 0,
                end_char: 10,
                word_count: 4,
                extra: MetadataMap::new(),
            },
        }
    }

    /// Hands out one store per id, like collections on a vector server
    #[derive(Default)]
    struct SharedStoreFactory {
        stores: parking_lot::Mutex<HashMap<String, Arc<InMemoryVectorStore>>>,
    }

    impl SharedStoreFactory {
        fn store(&self, id: &str) -> Arc<InMemoryVectorStore> {
            Arc::clone(self.stores.lock().entry(id.to_string()).or_default())
        }
    }

    #[async_trait]
    impl VectorIndexFactory for SharedStoreFactory {
        async fn create(&self, knowledge_base_id: &str) -> Result<Arc<dyn VectorIndex>> {
            Ok(self.store(knowledge_base_id))
        }
    }

    /// In-memory store whose `clear` always fails
    #[derive(Default)]
    struct ClearRejectingIndex {
        inner: InMemoryVectorStore,
    }

    #[async_trait]
    impl VectorIndex for ClearRejectingIndex {
        async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
            self.inner.upsert(chunks, vectors).await
        }

        async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
            self.inner.search(query, top_k).await
        }

        async fn delete(&self, ids: &[String]) -> Result<()> {
            self.inner.delete(ids).await
        }

        async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<()> {
            self.inner.delete_by_metadata(filter).await
        }

        async fn clear(&self) -> Result<()> {
            Err(Error::VectorIndex("collection is read-only".to_string()))
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }
    }

    struct ClearRejectingFactory;

    #[async_trait]
    impl VectorIndexFactory for ClearRejectingFactory {
        async fn create(&self, _knowledge_base_id: &str) -> Result<Arc<dyn VectorIndex>> {
            Ok(Arc::new(ClearRejectingIndex::default()))
        }
    }

    async fn fill(kb: &KnowledgeBase, id: &str, source: &str) {
        let chunks = vec![chunk(id, source)];
        kb.vectors().upsert(&chunks, &[vec![1.0, 0.0]]).await.unwrap();
        kb.lexical().add_documents(&chunks).unwrap();
        kb.record_document(DocumentRecord {
            source: source.to_string(),
            chunk_ids: vec![id.to_string()],
            ingested_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let registry = registry();
        registry.create("zeta", "Zeta", "last").await.unwrap();
        registry.create("alpha", "Alpha", "first").await.unwrap();

        let kb = registry.get("alpha").unwrap();
        assert_eq!(kb.name(), "Alpha");
        assert_eq!(kb.description(), "first");

        let ids: Vec<String> = registry.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_ids() {
        let registry = registry();
        registry.create("docs", "Docs", "").await.unwrap();

        assert!(matches!(
            registry.create("docs", "Again", "").await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            registry.create("../etc", "Bad", "").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.create("", "Empty", "").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let registry = registry();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(_))));
        assert!(matches!(registry.delete("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_or_create_materializes_once() {
        let registry = registry();
        let first = registry.get_or_create("default").await.unwrap();
        let second = registry.get_or_create("default").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "default");
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_registry() {
        let registry = registry();
        let kb = registry.create("temp", "Temp", "").await.unwrap();
        registry.delete("temp").await.unwrap();

        assert!(!registry.contains("temp"));
        assert!(kb.is_deleted());
        assert!(matches!(kb.ensure_live(), Err(Error::NotFound(_))));
        assert_eq!(kb.chunk_count(), 0);
        assert_eq!(kb.vector_count().await.unwrap(), 0);

        // A second delete of the same id finds nothing
        assert!(matches!(registry.delete("temp").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_purge_keeps_knowledge_base_intact() {
        let registry = KnowledgeBaseRegistry::new(
            Arc::new(ClearRejectingFactory),
            SparseConfig::default(),
        )
        .with_vector_retry(fast_retry());
        let kb = registry.create("pets", "Pets", "").await.unwrap();
        fill(&kb, "cats.txt#0", "cats.txt").await;

        let err = registry.delete("pets").await.unwrap_err();
        assert!(matches!(err, Error::VectorIndex(_)));

        assert!(registry.contains("pets"));
        assert!(!kb.is_deleted());
        assert_eq!(kb.chunk_count(), 1);
        assert_eq!(kb.vector_count().await.unwrap(), 1);
        assert_eq!(kb.documents(), vec!["cats.txt"]);
    }

    #[tokio::test]
    async fn test_recreated_knowledge_base_discards_stale_vectors() {
        let factory = Arc::new(SharedStoreFactory::default());
        let registry = KnowledgeBaseRegistry::new(
            Arc::clone(&factory) as Arc<dyn VectorIndexFactory>,
            SparseConfig::default(),
        )
        .with_vector_retry(fast_retry());

        // Points left behind in the backend, e.g. by an earlier process
        factory
            .store("pets")
            .upsert(&[chunk("cats.txt#0", "cats.txt")], &[vec![1.0, 0.0]])
            .await
            .unwrap();

        let kb = registry.create("pets", "Pets", "").await.unwrap();
        assert_eq!(kb.vector_count().await.unwrap(), kb.chunk_count());
        assert!(kb.vector_search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
