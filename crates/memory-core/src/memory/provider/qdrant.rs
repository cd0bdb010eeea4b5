//! ============================================================================
//! Qdrant Provider - Collections as indexes, payload-emulated namespaces
//! ============================================================================
//! Qdrant has no namespaces and only accepts UUID or integer point ids, so:
//! - every point carries a `namespace` payload field ("" = default) that is
//!   always part of the query/delete filter
//! - point ids are UUID v5 over `namespace \0 id`; the original id is kept in
//!   the `vector_id` payload field
//! ============================================================================

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, vectors_config::Config,
    vectors_output::VectorsOptions, Condition, CreateCollectionBuilder, DeleteCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, GetPointsBuilder, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder, VectorsOutput,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    DeleteRequest, IndexConnector, IndexControl, IndexHandle, Metric, MetadataFilter,
    ProviderShape, QueryMatch, QueryRequest, VectorRecord,
};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, ProviderError};
use crate::memory::types::{IndexStats, Metadata};

/// Payload field holding the emulated namespace
const NAMESPACE_FIELD: &str = "namespace";

/// Payload field holding the caller-facing vector id
const VECTOR_ID_FIELD: &str = "vector_id";

fn distance_for(metric: Metric) -> Distance {
    match metric {
        Metric::Cosine => Distance::Cosine,
        Metric::Euclidean => Distance::Euclid,
        Metric::DotProduct => Distance::Dot,
    }
}

/// Deterministic point id for a vector id within a namespace
pub(crate) fn point_uuid(namespace: &str, id: &str) -> Uuid {
    let key = format!("{}\u{0}{}", namespace, id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

fn scoped_filter(namespace: &str, filter: Option<&MetadataFilter>) -> Filter {
    let mut conditions = vec![Condition::matches(NAMESPACE_FIELD, namespace.to_string())];
    if let Some(filter) = filter {
        conditions.extend(
            filter
                .iter()
                .map(|(key, value)| Condition::matches(key.as_str(), value.clone())),
        );
    }
    Filter::must(conditions)
}

fn payload_for(record: &VectorRecord, namespace: &str) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = record
        .metadata
        .iter()
        .map(|(key, value)| (key.clone(), Value::from(value.clone())))
        .collect();
    payload.insert(NAMESPACE_FIELD.to_string(), Value::from(namespace.to_string()));
    payload.insert(VECTOR_ID_FIELD.to_string(), Value::from(record.id.clone()));
    payload
}

/// Strip the emulation fields and keep string values only
fn metadata_from_payload(payload: &HashMap<String, Value>) -> Metadata {
    payload
        .iter()
        .filter(|(key, _)| key.as_str() != NAMESPACE_FIELD && key.as_str() != VECTOR_ID_FIELD)
        .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
        .collect()
}

/// Dense vector of a retrieved point; named vectors are not written here
#[allow(deprecated)]
fn dense_values(vectors: Option<VectorsOutput>) -> Vec<f32> {
    match vectors.and_then(|v| v.vectors_options) {
        Some(VectorsOptions::Vector(vector)) => vector.data,
        _ => Vec::new(),
    }
}

fn point_id_string(point_id: PointId) -> Option<String> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid) => Some(uuid),
        PointIdOptions::Num(num) => Some(num.to_string()),
    }
}

/// Control handle over a Qdrant instance
pub struct QdrantControl {
    client: Arc<Qdrant>,
}

#[async_trait]
impl IndexControl for QdrantControl {
    fn shape(&self) -> ProviderShape {
        ProviderShape::Qdrant
    }

    async fn list_index_names(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.client.list_collections().await?;
        Ok(response
            .collections
            .into_iter()
            .map(|collection| collection.name)
            .collect())
    }

    async fn describe_dimension(&self, name: &str) -> Result<Option<usize>, ProviderError> {
        let info = self.client.collection_info(name).await?;
        let size = info
            .result
            .and_then(|result| result.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config)
            .and_then(|config| match config {
                Config::Params(params) => Some(params.size as usize),
                // Named vectors; not a shape this store writes
                Config::ParamsMap(_) => None,
            });
        Ok(size)
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    dimension as u64,
                    distance_for(metric),
                )),
            )
            .await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), ProviderError> {
        self.client
            .delete_collection(DeleteCollectionBuilder::new(name))
            .await?;
        Ok(())
    }

    async fn bind_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>, ProviderError> {
        if !self.client.collection_exists(name).await? {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        Ok(Arc::new(QdrantIndex {
            client: self.client.clone(),
            collection: name.to_string(),
        }))
    }
}

/// Data-plane handle bound to one Qdrant collection
pub struct QdrantIndex {
    client: Arc<Qdrant>,
    collection: String,
}

#[async_trait]
impl IndexHandle for QdrantIndex {
    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        namespace: Option<&str>,
    ) -> Result<usize, ProviderError> {
        let namespace = namespace.unwrap_or_default();
        let count = records.len();
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let payload = payload_for(&record, namespace);
                PointStruct::new(
                    point_uuid(namespace, &record.id).to_string(),
                    record.values,
                    payload,
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        debug!("Upserted {} points into {}", count, self.collection);
        Ok(count)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, ProviderError> {
        let namespace = request.namespace.as_deref().unwrap_or_default();
        let filter = scoped_filter(namespace, request.filter.as_ref());

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, request.vector, request.top_k as u64)
                    .filter(filter)
                    .with_payload(true),
            )
            .await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let id = payload
                    .get(VECTOR_ID_FIELD)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .or_else(|| point.id.and_then(point_id_string))?;
                Some(QueryMatch {
                    id,
                    score: point.score,
                    metadata: request
                        .include_metadata
                        .then(|| metadata_from_payload(&payload)),
                })
            })
            .collect())
    }

    async fn fetch(
        &self,
        ids: Vec<String>,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorRecord>, ProviderError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let namespace = namespace.unwrap_or_default();
        let point_ids: Vec<PointId> = ids
            .iter()
            .map(|id| PointId::from(point_uuid(namespace, id).to_string()))
            .collect();

        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, point_ids)
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point
                    .payload
                    .get(VECTOR_ID_FIELD)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())?;
                Some(VectorRecord {
                    id,
                    metadata: metadata_from_payload(&point.payload),
                    values: dense_values(point.vectors),
                })
            })
            .collect())
    }

    /// One filter delete on the stored id, across all emulated namespaces
    async fn delete_everywhere(&self, ids: Vec<String>) -> Result<(), ProviderError> {
        if ids.is_empty() {
            return Ok(());
        }
        let filter = Filter::must([Condition::matches(VECTOR_ID_FIELD, ids)]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsSelectorOneOf::Filter(filter))
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), ProviderError> {
        let namespace = request.namespace.as_deref().unwrap_or_default();

        if request.delete_all {
            let filter = scoped_filter(namespace, None);
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsSelectorOneOf::Filter(filter))
                        .wait(true),
                )
                .await?;
            return Ok(());
        }

        let ids: Vec<String> = request
            .ids
            .iter()
            .map(|id| point_uuid(namespace, id).to_string())
            .collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(ids)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, ProviderError> {
        let info = self.client.collection_info(&self.collection).await?;
        let result = info.result;
        let total = result
            .as_ref()
            .and_then(|r| r.points_count)
            .unwrap_or(0);
        let dimension = result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                Config::Params(params) => Some(params.size as usize),
                Config::ParamsMap(_) => None,
            });

        // Per-namespace counts would need one count query per namespace
        Ok(IndexStats {
            dimension,
            total_vector_count: total,
            namespaces: Default::default(),
        })
    }
}

/// Connects to a Qdrant instance by URL
pub struct QdrantConnector {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl QdrantConnector {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            api_key,
            timeout,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.http_timeout,
        )
    }
}

#[async_trait]
impl IndexConnector for QdrantConnector {
    async fn connect(&self) -> Result<Arc<dyn IndexControl>, MemoryError> {
        debug!("Connecting to Qdrant at {}", self.url);

        let client = Qdrant::from_url(&self.url)
            .api_key(self.api_key.clone())
            .timeout(self.timeout)
            .build()
            .map_err(|e| MemoryError::Config(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Arc::new(QdrantControl {
            client: Arc::new(client),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_uuid_is_deterministic_and_namespaced() {
        let a = point_uuid("user:u1", "memory:1");
        let b = point_uuid("user:u1", "memory:1");
        let c = point_uuid("user:u2", "memory:1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_payload_round_trip_strips_emulation_fields() {
        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), "memory".to_string());
        metadata.insert("text".to_string(), "owns a cat".to_string());
        let record = VectorRecord {
            id: "memory:1".to_string(),
            values: vec![0.0; 4],
            metadata: metadata.clone(),
        };

        let payload = payload_for(&record, "user:u1");
        assert_eq!(payload[NAMESPACE_FIELD].as_str().map(|s| s.as_str()), Some("user:u1"));
        assert_eq!(payload[VECTOR_ID_FIELD].as_str().map(|s| s.as_str()), Some("memory:1"));
        assert_eq!(metadata_from_payload(&payload), metadata);
    }

    #[test]
    fn test_metric_mapping() {
        assert_eq!(distance_for(Metric::Cosine), Distance::Cosine);
        assert_eq!(distance_for(Metric::DotProduct), Distance::Dot);
    }

    // Requires a running Qdrant instance
    #[tokio::test]
    #[ignore]
    async fn test_live_round_trip() {
        let control = QdrantConnector::new("http://localhost:6334", None, Duration::from_secs(5))
            .connect()
            .await
            .unwrap();
        let name = "memory_core_live_test";
        let _ = control.delete_index(name).await;
        control.create_index(name, 4, Metric::Cosine).await.unwrap();
        assert_eq!(control.describe_dimension(name).await.unwrap(), Some(4));

        let handle = control.bind_index(name).await.unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), "message".to_string());
        handle
            .upsert(
                vec![VectorRecord {
                    id: "u1:s1:t1:user".to_string(),
                    values: vec![1.0, 0.0, 0.0, 0.0],
                    metadata,
                }],
                Some("user:u1"),
            )
            .await
            .unwrap();

        let matches = handle
            .query(QueryRequest {
                vector: vec![1.0, 0.0, 0.0, 0.0],
                top_k: 1,
                include_metadata: true,
                filter: Some(MetadataFilter::new().eq("kind", "message")),
                namespace: Some("user:u1".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(matches[0].id, "u1:s1:t1:user");

        let fetched = handle
            .fetch(vec!["u1:s1:t1:user".to_string()], Some("user:u1"))
            .await
            .unwrap();
        assert_eq!(fetched[0].values, vec![1.0, 0.0, 0.0, 0.0]);

        handle
            .delete_everywhere(vec!["u1:s1:t1:user".to_string()])
            .await
            .unwrap();
        assert!(handle
            .fetch(vec!["u1:s1:t1:user".to_string()], Some("user:u1"))
            .await
            .unwrap()
            .is_empty());

        control.delete_index(name).await.unwrap();
    }
}
