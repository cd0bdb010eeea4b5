//! ============================================================================
//! In-Memory Index - Process-local vector index
//! ============================================================================
//! Implements the full provider interface (namespaces, exact-match filters,
//! cosine scoring) without any network access. Used for local development
//! and for exercising the store in tests. Nothing is persisted.
//! ============================================================================

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    cosine_similarity, DeleteRequest, IndexConnector, IndexControl, IndexHandle, Metric,
    ProviderShape, QueryMatch, QueryRequest, VectorRecord,
};
use crate::error::{MemoryError, ProviderError};
use crate::memory::types::IndexStats;

/// Key used for the default (un-namespaced) partition
const DEFAULT_NAMESPACE: &str = "";

struct StoredIndex {
    dimension: usize,
    namespaces: HashMap<String, BTreeMap<String, VectorRecord>>,
}

#[derive(Default)]
struct State {
    indexes: RwLock<HashMap<String, StoredIndex>>,
    connects: AtomicUsize,
    control_calls: AtomicUsize,
    creates: AtomicUsize,
    namespace_delete_unsupported: AtomicBool,
}

/// Shared in-process index; clones see the same data
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    state: Arc<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject whole-namespace deletes, like providers without that call
    pub fn without_namespace_delete(self) -> Self {
        self.state
            .namespace_delete_unsupported
            .store(true, Ordering::SeqCst);
        self
    }

    /// Create an index directly, bypassing the control interface
    pub async fn seed_index(&self, name: &str, dimension: usize) {
        self.state.indexes.write().await.insert(
            name.to_string(),
            StoredIndex {
                dimension,
                namespaces: HashMap::new(),
            },
        );
    }

    /// Drop an index directly, bypassing the control interface
    pub async fn drop_index(&self, name: &str) {
        self.state.indexes.write().await.remove(name);
    }

    pub async fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.indexes.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dimension_of(&self, name: &str) -> Option<usize> {
        self.state
            .indexes
            .read()
            .await
            .get(name)
            .map(|index| index.dimension)
    }

    /// Vectors stored in `namespace` (`None` = default namespace)
    pub async fn vector_count(&self, name: &str, namespace: Option<&str>) -> usize {
        let key = namespace.unwrap_or(DEFAULT_NAMESPACE);
        self.state
            .indexes
            .read()
            .await
            .get(name)
            .and_then(|index| index.namespaces.get(key))
            .map(|vectors| vectors.len())
            .unwrap_or(0)
    }

    /// Fetch one stored vector by id
    pub async fn get(&self, name: &str, namespace: Option<&str>, id: &str) -> Option<VectorRecord> {
        let key = namespace.unwrap_or(DEFAULT_NAMESPACE);
        self.state
            .indexes
            .read()
            .await
            .get(name)
            .and_then(|index| index.namespaces.get(key))
            .and_then(|vectors| vectors.get(id))
            .cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of control-plane calls (list/describe/create/delete/bind)
    pub fn control_calls(&self) -> usize {
        self.state.control_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    fn record_control_call(&self) {
        self.state.control_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndexConnector for InMemoryIndex {
    async fn connect(&self) -> Result<Arc<dyn IndexControl>, MemoryError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl IndexControl for InMemoryIndex {
    fn shape(&self) -> ProviderShape {
        ProviderShape::InMemory
    }

    async fn list_index_names(&self) -> Result<Vec<String>, ProviderError> {
        self.record_control_call();
        Ok(self.index_names().await)
    }

    async fn describe_dimension(&self, name: &str) -> Result<Option<usize>, ProviderError> {
        self.record_control_call();
        self.dimension_of(name)
            .await
            .map(Some)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        self.record_control_call();
        let mut indexes = self.state.indexes.write().await;
        if indexes.contains_key(name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        indexes.insert(
            name.to_string(),
            StoredIndex {
                dimension,
                namespaces: HashMap::new(),
            },
        );
        self.state.creates.fetch_add(1, Ordering::SeqCst);
        debug!(
            "In-memory index {} created (dimension {}, metric {})",
            name,
            dimension,
            metric.as_str()
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), ProviderError> {
        self.record_control_call();
        match self.state.indexes.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }

    async fn bind_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>, ProviderError> {
        self.record_control_call();
        if !self.state.indexes.read().await.contains_key(name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        Ok(Arc::new(InMemoryHandle {
            state: self.state.clone(),
            name: name.to_string(),
        }))
    }
}

struct InMemoryHandle {
    state: Arc<State>,
    name: String,
}

#[async_trait]
impl IndexHandle for InMemoryHandle {
    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        namespace: Option<&str>,
    ) -> Result<usize, ProviderError> {
        let mut indexes = self.state.indexes.write().await;
        let index = indexes
            .get_mut(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;

        if let Some(bad) = records.iter().find(|r| r.values.len() != index.dimension) {
            return Err(ProviderError::DimensionMismatch {
                expected: index.dimension,
                actual: bad.values.len(),
            });
        }

        let count = records.len();
        let partition = index
            .namespaces
            .entry(namespace.unwrap_or(DEFAULT_NAMESPACE).to_string())
            .or_default();
        for record in records {
            partition.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, ProviderError> {
        let indexes = self.state.indexes.read().await;
        let index = indexes
            .get(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;

        if request.vector.len() != index.dimension {
            return Err(ProviderError::DimensionMismatch {
                expected: index.dimension,
                actual: request.vector.len(),
            });
        }

        let key = request.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let Some(partition) = index.namespaces.get(key) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = partition
            .values()
            .filter(|record| {
                request
                    .filter
                    .as_ref()
                    .map_or(true, |filter| filter.matches(&record.metadata))
            })
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(&request.vector, &record.values),
                metadata: request.include_metadata.then(|| record.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(request.top_k);
        Ok(matches)
    }

    async fn fetch(
        &self,
        ids: Vec<String>,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorRecord>, ProviderError> {
        let indexes = self.state.indexes.read().await;
        let index = indexes
            .get(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;
        let Some(partition) = index.namespaces.get(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| partition.get(id).cloned()).collect())
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), ProviderError> {
        if request.delete_all
            && self
                .state
                .namespace_delete_unsupported
                .load(Ordering::SeqCst)
        {
            return Err(ProviderError::Unsupported("deleteAll".to_string()));
        }

        let mut indexes = self.state.indexes.write().await;
        let index = indexes
            .get_mut(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;
        let key = request.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);

        if request.delete_all {
            index.namespaces.remove(key);
        } else if let Some(partition) = index.namespaces.get_mut(key) {
            for id in &request.ids {
                partition.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_everywhere(&self, ids: Vec<String>) -> Result<(), ProviderError> {
        let mut indexes = self.state.indexes.write().await;
        let index = indexes
            .get_mut(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;
        for partition in index.namespaces.values_mut() {
            for id in &ids {
                partition.remove(id);
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, ProviderError> {
        let indexes = self.state.indexes.read().await;
        let index = indexes
            .get(&self.name)
            .ok_or_else(|| ProviderError::NotFound(self.name.clone()))?;

        let namespaces: BTreeMap<String, u64> = index
            .namespaces
            .iter()
            .map(|(name, vectors)| (name.clone(), vectors.len() as u64))
            .collect();
        Ok(IndexStats {
            dimension: Some(index.dimension),
            total_vector_count: namespaces.values().sum(),
            namespaces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::provider::MetadataFilter;
    use crate::memory::types::Metadata;

    fn record(id: &str, values: Vec<f32>, kind: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), kind.to_string());
        VectorRecord {
            id: id.to_string(),
            values,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_create_twice_reports_conflict() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        let second = index.create_index("idx", 2, Metric::Cosine).await;
        assert!(matches!(second, Err(ProviderError::AlreadyExists(_))));
        assert_eq!(index.create_count(), 1);
    }

    #[tokio::test]
    async fn test_query_respects_namespace_and_filter() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        let handle = index.bind_index("idx").await.unwrap();

        handle
            .upsert(
                vec![
                    record("a", vec![1.0, 0.0], "message"),
                    record("b", vec![0.9, 0.1], "user_fact"),
                ],
                Some("user:u1"),
            )
            .await
            .unwrap();
        handle
            .upsert(vec![record("c", vec![1.0, 0.0], "message")], Some("user:u2"))
            .await
            .unwrap();

        let matches = handle
            .query(QueryRequest {
                vector: vec![1.0, 0.0],
                top_k: 10,
                include_metadata: true,
                filter: Some(MetadataFilter::new().eq("kind", "message")),
                namespace: Some("user:u1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].metadata.is_some());
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 3, Metric::Cosine).await.unwrap();
        let handle = index.bind_index("idx").await.unwrap();

        let result = handle
            .upsert(vec![record("a", vec![1.0, 0.0], "message")], None)
            .await;
        assert_eq!(
            result,
            Err(ProviderError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn test_namespace_delete_can_be_unsupported() {
        let index = InMemoryIndex::new().without_namespace_delete();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        let handle = index.bind_index("idx").await.unwrap();

        let result = handle.delete(DeleteRequest::all_in("user:u1".to_string())).await;
        assert!(matches!(result, Err(ProviderError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_fetch_and_delete_everywhere() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        let handle = index.bind_index("idx").await.unwrap();
        for namespace in [Some("user:u1"), Some("user:u2"), None] {
            handle
                .upsert(vec![record("memory:m1", vec![1.0, 0.0], "memory")], namespace)
                .await
                .unwrap();
        }

        let fetched = handle
            .fetch(vec!["memory:m1".to_string(), "missing".to_string()], Some("user:u1"))
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].values, vec![1.0, 0.0]);
        assert!(handle
            .fetch(vec!["memory:m1".to_string()], Some("user:u3"))
            .await
            .unwrap()
            .is_empty());

        handle
            .delete_everywhere(vec!["memory:m1".to_string()])
            .await
            .unwrap();
        assert_eq!(index.vector_count("idx", Some("user:u1")).await, 0);
        assert_eq!(index.vector_count("idx", Some("user:u2")).await, 0);
        assert_eq!(index.vector_count("idx", None).await, 0);
    }

    #[tokio::test]
    async fn test_stats_counts_per_namespace() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 2, Metric::Cosine).await.unwrap();
        let handle = index.bind_index("idx").await.unwrap();
        handle
            .upsert(vec![record("a", vec![1.0, 0.0], "message")], Some("user:u1"))
            .await
            .unwrap();
        handle
            .upsert(vec![record("b", vec![1.0, 0.0], "message")], None)
            .await
            .unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total_vector_count, 2);
        assert_eq!(stats.namespaces.get("user:u1"), Some(&1));
        assert_eq!(stats.dimension, Some(2));
    }
}
