//! ============================================================================
//! Memory Store - Tenant-partitioned semantic memory over a vector index
//! ============================================================================
//! Public operations for writing and recalling messages, user facts, memory
//! items and session summaries. Every operation:
//! 1. makes sure the index is ready (no-op when it is not)
//! 2. embeds its text (no-op when embedding yields nothing)
//! 3. talks to the bound index handle
//!
//! Internally each operation produces a `StoreOutcome`; the public methods
//! collapse it to `()`, `None` or an empty list. Nothing raises.
//! ============================================================================

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::embeddings::{create_embedding_service, EmbeddingChain, EmbeddingProvider};
use super::encoder::{encode, fact_id, memory_vector_id, namespace_for};
use super::lifecycle::IndexLifecycle;
use super::provider::{
    DeleteRequest, IndexHandle, MetadataFilter, QueryMatch, QueryRequest, VectorRecord,
};
use super::types::{
    FactRecord, HealthReport, HealthStatus, IndexStats, LifecycleState, LogicalRecord,
    MemoryItem, MemoryMatch, MessageRecord, Metadata, RecordKind, SessionSummary, StoreOutcome,
};
use crate::config::MemoryConfig;

/// Separator between recalled message texts
pub const MESSAGE_SEPARATOR: &str = "\n---\n";

/// Minimum score for a session summary to count as relevant
pub const SUMMARY_SCORE_THRESHOLD: f32 = 0.75;

/// Default category for user facts
const DEFAULT_FACT_CATEGORY: &str = "generic";

/// Namespace used by the health check probe vector
const HEALTH_NAMESPACE: &str = "__health__";

/// Semantic memory facade; clones share the same index handle
#[derive(Clone)]
pub struct MemoryStore {
    lifecycle: Arc<IndexLifecycle>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemoryStore {
    pub fn new(lifecycle: IndexLifecycle, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            embedder,
        }
    }

    /// Build from configuration. Missing credentials are not an error; the
    /// store stays disabled and every call is a no-op.
    pub fn from_config(config: &MemoryConfig) -> Self {
        let embedder = match create_embedding_service(
            config.xai_api_key.clone(),
            config.openai_api_key.clone(),
            config.http_timeout,
            config.embedding_cooldown,
        ) {
            Ok(chain) => chain,
            Err(e) => {
                warn!("{}; semantic memory writes and queries will be skipped", e);
                EmbeddingChain::new(Vec::new())
            }
        };

        let lifecycle = IndexLifecycle::new(config.connector(), config.index_name.clone());
        Self::new(lifecycle, Arc::new(embedder))
    }

    /// Run index initialization eagerly (startup); safe to call again
    pub async fn initialize(&self) -> bool {
        self.lifecycle.ensure_ready().await
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn upsert_message(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
        role: &str,
        timestamp: &str,
    ) {
        let record = LogicalRecord::Message(MessageRecord {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            role: role.to_string(),
            timestamp: timestamp.to_string(),
        });
        self.try_upsert(record).await;
    }

    /// Content addressed: the same fact text for the same user is one vector
    pub async fn upsert_user_fact(
        &self,
        user_id: &str,
        fact_text: &str,
        timestamp: &str,
        category: Option<&str>,
    ) {
        let record = LogicalRecord::UserFact(FactRecord {
            user_id: user_id.to_string(),
            text: fact_text.to_string(),
            timestamp: timestamp.to_string(),
            category: category
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_FACT_CATEGORY)
                .to_string(),
        });
        self.try_upsert(record).await;
    }

    /// Overwrites any earlier vector for `memory_id`
    pub async fn upsert_memory(
        &self,
        memory_id: &str,
        user_id: &str,
        text: &str,
        lifecycle_state: LifecycleState,
    ) {
        let record = LogicalRecord::Memory(MemoryItem {
            memory_id: memory_id.to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            lifecycle_state,
            timestamp: Utc::now().to_rfc3339(),
        });
        self.try_upsert(record).await;
    }

    /// Stored in the default namespace, keyed by session id
    pub async fn upsert_session_summary(&self, session_id: &str, summary: &str) {
        let record = LogicalRecord::SessionSummary(SessionSummary {
            session_id: session_id.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
        self.try_upsert(record).await;
    }

    /// Embed and write records in one batch; records that cannot be embedded
    /// are skipped individually
    pub async fn bulk_upsert(&self, records: Vec<LogicalRecord>) {
        self.try_bulk_upsert(records).await;
    }

    pub(crate) async fn try_upsert(&self, record: LogicalRecord) -> StoreOutcome<usize> {
        let Some(handle) = self.lifecycle.handle().await else {
            debug!("Index not ready; skipping {} upsert", record.kind());
            return StoreOutcome::Unavailable;
        };

        let Some(values) = self.embedder.embed(record.text()).await else {
            debug!("No embedding for {} record; skipping upsert", record.kind());
            return StoreOutcome::Ok(0);
        };

        let encoded = encode(&record);
        let namespace = encoded.namespace.clone();
        let id = encoded.id.clone();
        match handle
            .upsert(vec![encoded.into_vector(values)], namespace.as_deref())
            .await
        {
            Ok(count) => {
                debug!("Upserted {} {}", record.kind(), id);
                StoreOutcome::Ok(count)
            }
            Err(e) => {
                debug!("Upsert of {} {} failed: {}", record.kind(), id, e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    pub(crate) async fn try_bulk_upsert(&self, records: Vec<LogicalRecord>) -> StoreOutcome<usize> {
        let Some(handle) = self.lifecycle.handle().await else {
            debug!("Index not ready; skipping bulk upsert of {} records", records.len());
            return StoreOutcome::Unavailable;
        };

        let Some(tenant) = records
            .iter()
            .map(LogicalRecord::user_id)
            .find(|user_id| !user_id.is_empty())
            .map(str::to_string)
        else {
            warn!(
                "Bulk upsert of {} records has no user id; refusing to write outside a tenant namespace",
                records.len()
            );
            return StoreOutcome::Failed("batch has no tenant identity".to_string());
        };

        let candidates: Vec<LogicalRecord> = records
            .into_iter()
            .filter_map(|record| batch_member(record, &tenant))
            .collect();

        let embeddings = join_all(
            candidates
                .iter()
                .map(|record| self.embedder.embed(record.text())),
        )
        .await;

        let vectors: Vec<_> = candidates
            .iter()
            .zip(embeddings)
            .filter_map(|(record, values)| match values {
                Some(values) => Some(encode(record).into_vector(values)),
                None => {
                    debug!("No embedding for {} record; skipping it", record.kind());
                    None
                }
            })
            .collect();

        if vectors.is_empty() {
            debug!("Bulk upsert for {} produced no vectors", tenant);
            return StoreOutcome::Ok(0);
        }

        let namespace = namespace_for(&tenant);
        match handle.upsert(vectors, Some(&namespace)).await {
            Ok(count) => {
                debug!("Bulk upserted {} vectors into {}", count, namespace);
                StoreOutcome::Ok(count)
            }
            Err(e) => {
                debug!("Bulk upsert into {} failed: {}", namespace, e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Most similar message texts, best first, joined by `\n---\n`
    pub async fn query_similar_messages(
        &self,
        user_id: &str,
        text: &str,
        top_k: usize,
    ) -> Option<String> {
        let texts: Vec<String> = self
            .try_query_kind(user_id, text, top_k, RecordKind::Message)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| metadata_text(&m))
            .collect();

        if texts.is_empty() {
            None
        } else {
            Some(texts.join(MESSAGE_SEPARATOR))
        }
    }

    /// Distinct fact texts, best first. An empty hint recalls by user id.
    pub async fn query_user_facts(
        &self,
        user_id: &str,
        hint_text: &str,
        top_k: usize,
    ) -> Vec<String> {
        let query_text = if hint_text.trim().is_empty() {
            user_id
        } else {
            hint_text
        };

        let mut seen = HashSet::new();
        self.try_query_kind(user_id, query_text, top_k, RecordKind::UserFact)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| metadata_text(&m))
            .filter(|text| seen.insert(text.clone()))
            .collect()
    }

    /// Recallable memories (active, candidate, distilled), best first
    pub async fn query_user_memories(
        &self,
        user_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Vec<MemoryMatch> {
        self.try_query_kind(user_id, query_text, top_k, RecordKind::Memory)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(memory_match)
            .collect()
    }

    /// Best session summary, only if its score clears the relevance threshold
    pub async fn query_relevant_summary(&self, text: &str, top_k: usize) -> Option<String> {
        let filter = MetadataFilter::new().eq("kind", RecordKind::SessionSummary.as_str());
        let best = self
            .try_query(None, text, top_k.max(1), filter)
            .await
            .unwrap_or_default()
            .into_iter()
            .next()?;

        if best.score > SUMMARY_SCORE_THRESHOLD {
            metadata_text(&best)
        } else {
            debug!(
                "Best summary {} scored {:.3}; below threshold",
                best.id, best.score
            );
            None
        }
    }

    async fn try_query_kind(
        &self,
        user_id: &str,
        text: &str,
        top_k: usize,
        kind: RecordKind,
    ) -> StoreOutcome<Vec<QueryMatch>> {
        let filter = MetadataFilter::new()
            .eq("kind", kind.as_str())
            .eq("user_id", user_id);
        self.try_query(Some(namespace_for(user_id)), text, top_k, filter)
            .await
    }

    pub(crate) async fn try_query(
        &self,
        namespace: Option<String>,
        text: &str,
        top_k: usize,
        filter: MetadataFilter,
    ) -> StoreOutcome<Vec<QueryMatch>> {
        let Some(handle) = self.lifecycle.handle().await else {
            debug!("Index not ready; returning no matches");
            return StoreOutcome::Unavailable;
        };

        let Some(vector) = self.embedder.embed(text).await else {
            debug!("No embedding for query; returning no matches");
            return StoreOutcome::Ok(Vec::new());
        };

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: Some(filter),
            namespace,
        };
        match handle.query(request).await {
            Ok(matches) => StoreOutcome::Ok(matches),
            Err(e) => {
                debug!("Query failed: {}", e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Best-effort delete by id; provider incompatibilities are absorbed
    pub async fn delete_vectors(&self, ids: &[String], namespace: Option<&str>) {
        self.try_delete(DeleteRequest::ids(
            ids.to_vec(),
            namespace.map(str::to_string),
        ))
        .await;
    }

    /// Delete `memory:{memory_id}` from whichever namespace holds it.
    ///
    /// The owning tenant is unknown here, so every namespace is searched;
    /// prefer `delete_user_memory` when the user id is at hand.
    pub async fn delete_memory(&self, memory_id: &str) {
        self.try_delete_everywhere(vec![memory_vector_id(memory_id)])
            .await;
    }

    /// Delete a fact by its text from the user's namespace
    pub async fn delete_user_fact(&self, user_id: &str, fact_text: &str) {
        let namespace = namespace_for(user_id);
        self.delete_vectors(&[fact_id(user_id, fact_text)], Some(&namespace))
            .await;
    }

    /// Delete `memory:{memory_id}` from the user's namespace
    pub async fn delete_user_memory(&self, user_id: &str, memory_id: &str) {
        let namespace = namespace_for(user_id);
        self.delete_vectors(&[memory_vector_id(memory_id)], Some(&namespace))
            .await;
    }

    /// Wipe every vector of a user. Providers without namespace deletes
    /// leave the data in place.
    pub async fn delete_user_namespace(&self, user_id: &str) {
        let namespace = namespace_for(user_id);
        match self.try_delete(DeleteRequest::all_in(namespace.clone())).await {
            StoreOutcome::Ok(()) => info!("Deleted namespace {}", namespace),
            StoreOutcome::Unavailable | StoreOutcome::Failed(_) => {}
        }
    }

    pub(crate) async fn try_delete_everywhere(&self, ids: Vec<String>) -> StoreOutcome<()> {
        let Some(handle) = self.lifecycle.handle().await else {
            debug!("Index not ready; skipping delete");
            return StoreOutcome::Unavailable;
        };

        match handle.delete_everywhere(ids.clone()).await {
            Ok(()) => StoreOutcome::Ok(()),
            Err(e) => {
                debug!("Delete of {:?} across namespaces failed: {}", ids, e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    pub(crate) async fn try_delete(&self, request: DeleteRequest) -> StoreOutcome<()> {
        if !request.delete_all && request.ids.is_empty() {
            return StoreOutcome::Ok(());
        }

        let Some(handle) = self.lifecycle.handle().await else {
            debug!("Index not ready; skipping delete");
            return StoreOutcome::Unavailable;
        };

        match handle.delete(request.clone()).await {
            Ok(()) => StoreOutcome::Ok(()),
            Err(e) if e.is_unsupported() && request.delete_all => {
                info!(
                    "Namespace delete not supported by provider; skipping {:?}",
                    request.namespace
                );
                StoreOutcome::Failed(e.to_string())
            }
            Err(e) if e.is_unsupported() => {
                debug!("Delete call shape not supported by provider: {}", e);
                StoreOutcome::Failed(e.to_string())
            }
            Err(e) => {
                debug!("Delete of {:?} failed: {}", request.ids, e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Stored record for `id`, or `None` when absent or unavailable
    pub async fn read_vector(&self, id: &str, namespace: Option<&str>) -> Option<VectorRecord> {
        let handle = self.lifecycle.handle().await?;
        match handle.fetch(vec![id.to_string()], namespace).await {
            Ok(records) => records.into_iter().find(|record| record.id == id),
            Err(e) => {
                debug!("Fetch of {} failed: {}", id, e);
                None
            }
        }
    }

    /// Vector counts; `None` when the index is unavailable
    pub async fn index_stats(&self) -> Option<IndexStats> {
        let handle = self.lifecycle.handle().await?;
        match handle.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("Index stats failed: {}", e);
                None
            }
        }
    }

    /// Exercise embed, upsert, query and delete with a probe vector
    pub async fn health_check(&self) -> HealthReport {
        let Some(handle) = self.lifecycle.handle().await else {
            return HealthReport::failed(HealthStatus::NotInitialized, "index not ready");
        };

        let started = Instant::now();
        let Some(vector) = self.embedder.embed("health-check").await else {
            return HealthReport::failed(HealthStatus::EmbeddingFailed, "embedding unavailable");
        };
        let embedding_ms = elapsed_ms(started);
        let dimension = vector.len();

        let probe_id = format!("health-check:{}", uuid::Uuid::new_v4());
        let mut report = HealthReport {
            status: HealthStatus::Healthy,
            dimension: Some(dimension),
            embedding_ms: Some(embedding_ms),
            upsert_ms: None,
            query_ms: None,
            error: None,
        };

        if let Err(reason) = probe(handle.as_ref(), &probe_id, vector, &mut report).await {
            warn!("Memory health check failed: {}", reason);
            report.status = HealthStatus::OperationFailed;
            report.error = Some(reason);
        }
        report
    }
}

async fn probe(
    handle: &dyn IndexHandle,
    probe_id: &str,
    vector: Vec<f32>,
    report: &mut HealthReport,
) -> Result<(), String> {
    let mut metadata = Metadata::new();
    metadata.insert("kind".to_string(), "health_probe".to_string());
    metadata.insert("text".to_string(), "health-check".to_string());

    let started = Instant::now();
    handle
        .upsert(
            vec![VectorRecord {
                id: probe_id.to_string(),
                values: vector.clone(),
                metadata,
            }],
            Some(HEALTH_NAMESPACE),
        )
        .await
        .map_err(|e| format!("upsert: {}", e))?;
    report.upsert_ms = Some(elapsed_ms(started));

    let started = Instant::now();
    handle
        .query(QueryRequest {
            vector,
            top_k: 1,
            include_metadata: false,
            filter: None,
            namespace: Some(HEALTH_NAMESPACE.to_string()),
        })
        .await
        .map_err(|e| format!("query: {}", e))?;
    report.query_ms = Some(elapsed_ms(started));

    handle
        .delete(DeleteRequest::ids(
            vec![probe_id.to_string()],
            Some(HEALTH_NAMESPACE.to_string()),
        ))
        .await
        .map_err(|e| format!("delete: {}", e))
}

/// Stamp a batch record with the batch tenant, or drop it
fn batch_member(record: LogicalRecord, tenant: &str) -> Option<LogicalRecord> {
    let owner = record.user_id();
    if matches!(record, LogicalRecord::SessionSummary(_)) {
        warn!("Session summaries cannot be batched per tenant; skipping one");
        return None;
    }
    if !owner.is_empty() && owner != tenant {
        warn!(
            "Skipping batch record for user {} in batch for {}",
            owner, tenant
        );
        return None;
    }
    if record.text().trim().is_empty() {
        debug!("Skipping empty {} record in batch", record.kind());
        return None;
    }

    let mut record = record;
    match &mut record {
        LogicalRecord::Message(m) if m.user_id.is_empty() => m.user_id = tenant.to_string(),
        LogicalRecord::UserFact(f) if f.user_id.is_empty() => f.user_id = tenant.to_string(),
        LogicalRecord::Memory(m) if m.user_id.is_empty() => m.user_id = tenant.to_string(),
        _ => {}
    }
    Some(record)
}

fn metadata_text(m: &QueryMatch) -> Option<String> {
    m.metadata
        .as_ref()
        .and_then(|metadata| metadata.get("text"))
        .filter(|text| !text.is_empty())
        .cloned()
}

fn memory_match(m: QueryMatch) -> Option<MemoryMatch> {
    let metadata = m.metadata.as_ref();

    let lifecycle_state = match metadata.and_then(|md| md.get("lifecycle_state")) {
        None => None,
        Some(raw) => match raw.parse::<LifecycleState>() {
            Ok(state) if state.is_recallable() => Some(state),
            _ => return None,
        },
    };

    let memory_id = metadata
        .and_then(|md| md.get("memory_id"))
        .cloned()
        .unwrap_or_else(|| m.id.strip_prefix("memory:").unwrap_or(&m.id).to_string());

    Some(MemoryMatch {
        text: metadata_text(&m).unwrap_or_default(),
        memory_id,
        similarity: m.score,
        lifecycle_state,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    saturating_ms(started.elapsed())
}

fn saturating_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
