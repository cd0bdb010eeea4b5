//! ============================================================================
//! Pinecone Provider - REST adapters for both control plane shapes
//! ============================================================================
//! Pinecone exposes two incompatible control planes:
//! - modern: serverless control plane at api.pinecone.io (`/indexes`)
//! - legacy: per-environment controller (`/databases`)
//!
//! `PineconeConnector` probes modern first, then legacy, and hands back
//! whichever answers. Both shapes bind the same data-plane client, since
//! upsert/query/delete are identical once the index host is known.
//! ============================================================================

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    DeleteRequest, IndexConnector, IndexControl, IndexHandle, Metric, MetadataFilter,
    ProviderShape, QueryMatch, QueryRequest, VectorRecord,
};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, ProviderError};
use crate::memory::types::{IndexStats, Metadata};

/// Serverless control plane
pub const MODERN_CONTROL_PLANE: &str = "https://api.pinecone.io";

/// Environment-scoped controller; `{environment}` is substituted
pub const LEGACY_CONTROLLER_TEMPLATE: &str = "https://controller.{environment}.pinecone.io";

/// API version header sent to the modern control plane and data plane
const API_VERSION: &str = "2024-07";

/// Authenticated HTTP client shared by control and data planes
#[derive(Clone)]
struct PineconeHttp {
    client: Client,
    api_key: String,
}

impl PineconeHttp {
    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String, ProviderError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(status.as_u16(), body))
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let body = self.send(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("{} - body: {}", e, body)))
    }
}

fn classify_status(status: u16, body: String) -> ProviderError {
    match status {
        404 => ProviderError::NotFound(body),
        409 => ProviderError::AlreadyExists(body),
        501 => ProviderError::Unsupported(body),
        400 if body.to_lowercase().contains("not supported") => ProviderError::Unsupported(body),
        _ => ProviderError::Http { status, body },
    }
}

/// Probe failures that mean "this endpoint does not speak that shape".
/// Anything else (bad key, outage, timeout) is a real provider error.
fn is_shape_mismatch(error: &ProviderError) -> bool {
    matches!(error, ProviderError::NotFound(_) | ProviderError::Decode(_))
}

fn host_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

fn legacy_controller_url(environment: &str) -> String {
    LEGACY_CONTROLLER_TEMPLATE.replace("{environment}", environment)
}

// ============================================================================
// Modern (serverless) control plane
// ============================================================================

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    dimension: Option<usize>,
    host: Option<String>,
}

/// Control handle for the serverless control plane
pub struct ServerlessControl {
    http: PineconeHttp,
    base_url: String,
    cloud: String,
    region: String,
}

impl ServerlessControl {
    async fn describe(&self, name: &str) -> Result<IndexModel, ProviderError> {
        self.http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/indexes/{}", self.base_url, name)),
            )
            .await
    }
}

fn serverless_create_body(
    name: &str,
    dimension: usize,
    metric: Metric,
    cloud: &str,
    region: &str,
) -> Value {
    json!({
        "name": name,
        "dimension": dimension,
        "metric": metric.as_str(),
        "spec": { "serverless": { "cloud": cloud, "region": region } },
    })
}

#[async_trait]
impl IndexControl for ServerlessControl {
    fn shape(&self) -> ProviderShape {
        ProviderShape::Modern
    }

    async fn list_index_names(&self) -> Result<Vec<String>, ProviderError> {
        let list: IndexList = self
            .http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/indexes", self.base_url)),
            )
            .await?;
        Ok(list.indexes.into_iter().map(|index| index.name).collect())
    }

    async fn describe_dimension(&self, name: &str) -> Result<Option<usize>, ProviderError> {
        Ok(self.describe(name).await?.dimension)
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        let body = serverless_create_body(name, dimension, metric, &self.cloud, &self.region);
        self.http
            .send(
                self.http
                    .request(Method::POST, format!("{}/indexes", self.base_url))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), ProviderError> {
        self.http
            .send(
                self.http
                    .request(Method::DELETE, format!("{}/indexes/{}", self.base_url, name)),
            )
            .await?;
        Ok(())
    }

    async fn bind_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>, ProviderError> {
        let model = self.describe(name).await?;
        let host = model
            .host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProviderError::Backend(format!("Index {} has no host yet", name)))?;
        Ok(Arc::new(PineconeIndex::new(self.http.clone(), host_url(&host))))
    }
}

// ============================================================================
// Legacy (environment controller) control plane
// ============================================================================

#[derive(Debug, Deserialize)]
struct LegacyDescription {
    database: LegacyDatabase,
    #[serde(default)]
    status: Option<LegacyStatus>,
}

#[derive(Debug, Deserialize)]
struct LegacyDatabase {
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LegacyStatus {
    host: Option<String>,
}

/// Control handle for the environment-scoped controller
pub struct LegacyControl {
    http: PineconeHttp,
    base_url: String,
}

impl LegacyControl {
    async fn describe(&self, name: &str) -> Result<LegacyDescription, ProviderError> {
        self.http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/databases/{}", self.base_url, name)),
            )
            .await
    }
}

#[async_trait]
impl IndexControl for LegacyControl {
    fn shape(&self) -> ProviderShape {
        ProviderShape::Legacy
    }

    async fn list_index_names(&self) -> Result<Vec<String>, ProviderError> {
        self.http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/databases", self.base_url)),
            )
            .await
    }

    async fn describe_dimension(&self, name: &str) -> Result<Option<usize>, ProviderError> {
        Ok(self.describe(name).await?.database.dimension)
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        let body = json!({ "name": name, "dimension": dimension, "metric": metric.as_str() });
        self.http
            .send(
                self.http
                    .request(Method::POST, format!("{}/databases", self.base_url))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), ProviderError> {
        self.http
            .send(
                self.http
                    .request(Method::DELETE, format!("{}/databases/{}", self.base_url, name)),
            )
            .await?;
        Ok(())
    }

    async fn bind_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>, ProviderError> {
        let description = self.describe(name).await?;
        let host = description
            .status
            .and_then(|status| status.host)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProviderError::Backend(format!("Index {} has no host yet", name)))?;
        Ok(Arc::new(PineconeIndex::new(self.http.clone(), host_url(&host))))
    }
}

// ============================================================================
// Data plane
// ============================================================================

#[derive(Serialize)]
struct UpsertBody<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: BTreeMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

fn filter_json(filter: &MetadataFilter) -> Value {
    Value::Object(
        filter
            .iter()
            .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
            .collect(),
    )
}

fn query_body(request: &QueryRequest) -> Value {
    let mut body = json!({
        "vector": request.vector,
        "topK": request.top_k,
        "includeMetadata": request.include_metadata,
    });
    if let Some(filter) = request.filter.as_ref().filter(|f| !f.is_empty()) {
        body["filter"] = filter_json(filter);
    }
    if let Some(namespace) = &request.namespace {
        body["namespace"] = json!(namespace);
    }
    body
}

fn delete_body(request: &DeleteRequest) -> Value {
    let mut body = if request.delete_all {
        json!({ "deleteAll": true })
    } else {
        json!({ "ids": request.ids })
    };
    if let Some(namespace) = &request.namespace {
        body["namespace"] = json!(namespace);
    }
    body
}

/// Metadata values may come back as non-strings; keep their JSON rendering
fn flatten_metadata(raw: serde_json::Map<String, Value>) -> Metadata {
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

fn parse_query_response(body: &str) -> Result<Vec<QueryMatch>, ProviderError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Decode(format!("{} - body: {}", e, body)))?;
    Ok(response
        .matches
        .into_iter()
        .map(|m| QueryMatch {
            id: m.id,
            score: m.score,
            metadata: m.metadata.map(flatten_metadata),
        })
        .collect())
}

fn parse_fetch_response(body: &str) -> Result<Vec<VectorRecord>, ProviderError> {
    let response: FetchResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Decode(format!("{} - body: {}", e, body)))?;
    Ok(response
        .vectors
        .into_values()
        .map(|v| VectorRecord {
            id: v.id,
            values: v.values,
            metadata: v.metadata.map(flatten_metadata).unwrap_or_default(),
        })
        .collect())
}

/// Query string for `/vectors/fetch`: repeated `ids`, optional namespace
fn fetch_params(ids: &[String], namespace: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&'static str, String)> =
        ids.iter().map(|id| ("ids", id.clone())).collect();
    if let Some(namespace) = namespace {
        params.push(("namespace", namespace.to_string()));
    }
    params
}

/// Data-plane client bound to one index host
pub struct PineconeIndex {
    http: PineconeHttp,
    base_url: String,
}

impl PineconeIndex {
    fn new(http: PineconeHttp, base_url: String) -> Self {
        debug!("Bound Pinecone data plane at {}", base_url);
        Self { http, base_url }
    }

    /// Host URL this handle talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl IndexHandle for PineconeIndex {
    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        namespace: Option<&str>,
    ) -> Result<usize, ProviderError> {
        let body = UpsertBody {
            vectors: &records,
            namespace,
        };
        let response: UpsertResponse = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/vectors/upsert", self.base_url))
                    .json(&body),
            )
            .await?;
        Ok(response.upserted_count.unwrap_or(records.len()))
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, ProviderError> {
        let body = self
            .http
            .send(
                self.http
                    .request(Method::POST, format!("{}/query", self.base_url))
                    .json(&query_body(&request)),
            )
            .await?;
        parse_query_response(&body)
    }

    async fn fetch(
        &self,
        ids: Vec<String>,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorRecord>, ProviderError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .http
            .send(
                self.http
                    .request(Method::GET, format!("{}/vectors/fetch", self.base_url))
                    .query(&fetch_params(&ids, namespace)),
            )
            .await?;
        parse_fetch_response(&body)
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), ProviderError> {
        self.http
            .send(
                self.http
                    .request(Method::POST, format!("{}/vectors/delete", self.base_url))
                    .json(&delete_body(&request)),
            )
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, ProviderError> {
        let response: StatsResponse = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/describe_index_stats", self.base_url))
                    .json(&json!({})),
            )
            .await?;
        Ok(IndexStats {
            dimension: response.dimension,
            total_vector_count: response.total_vector_count,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, summary)| (name, summary.vector_count))
                .collect(),
        })
    }
}

// ============================================================================
// Connector (shape probing)
// ============================================================================

/// Connects to Pinecone, detecting which control plane shape answers
pub struct PineconeConnector {
    client: Client,
    api_key: Option<String>,
    cloud: String,
    region: String,
    control_plane_url: String,
    legacy_controller_url: String,
}

impl PineconeConnector {
    pub fn new(
        api_key: Option<String>,
        environment: &str,
        cloud: &str,
        region: &str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!("Failed to build Pinecone HTTP client with timeout: {}", e);
            Client::new()
        });

        Self {
            client,
            api_key,
            cloud: cloud.to_string(),
            region: region.to_string(),
            control_plane_url: MODERN_CONTROL_PLANE.to_string(),
            legacy_controller_url: legacy_controller_url(environment),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            config.pinecone_api_key.clone(),
            &config.environment,
            &config.cloud,
            &config.region,
            config.http_timeout,
        )
    }

    /// Override both control plane endpoints (e.g. for a local proxy)
    pub fn with_endpoints(mut self, control_plane_url: &str, legacy_controller_url: &str) -> Self {
        self.control_plane_url = control_plane_url.trim_end_matches('/').to_string();
        self.legacy_controller_url = legacy_controller_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl IndexConnector for PineconeConnector {
    async fn connect(&self) -> Result<Arc<dyn IndexControl>, MemoryError> {
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(MemoryError::MissingCredentials("PINECONE_API_KEY"))?;

        let http = PineconeHttp {
            client: self.client.clone(),
            api_key,
        };

        let modern = ServerlessControl {
            http: http.clone(),
            base_url: self.control_plane_url.clone(),
            cloud: self.cloud.clone(),
            region: self.region.clone(),
        };
        let modern_err = match modern.list_index_names().await {
            Ok(_) => {
                info!("Pinecone modern control plane detected");
                return Ok(Arc::new(modern));
            }
            Err(e) if is_shape_mismatch(&e) => e,
            Err(e) => return Err(MemoryError::Provider(e)),
        };
        debug!("Modern control plane probe failed: {}", modern_err);

        let legacy = LegacyControl {
            http,
            base_url: self.legacy_controller_url.clone(),
        };
        match legacy.list_index_names().await {
            Ok(_) => {
                info!("Pinecone legacy controller detected");
                Ok(Arc::new(legacy))
            }
            Err(legacy_err) => Err(MemoryError::UnrecognizedProvider {
                modern: modern_err.to_string(),
                legacy: legacy_err.to_string(),
            }),
        }
    }
}
