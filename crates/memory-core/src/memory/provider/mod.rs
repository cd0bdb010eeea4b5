//! ============================================================================
//! Vector Index Providers - Capability interface over index backends
//! ============================================================================
//! Every backend is normalized into two traits:
//! - `IndexControl`: index enumeration, dimension introspection, create/delete,
//!   and binding a handle to a named index
//! - `IndexHandle`: upsert / query / delete / stats against one bound index
//!
//! `IndexConnector` produces an `IndexControl`, probing the backend when it
//! exposes more than one API shape. Call sites never branch on shape.
//! ============================================================================

mod in_memory;
mod pinecone;
mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::{IndexStats, Metadata};
use crate::error::{MemoryError, ProviderError};

pub use in_memory::InMemoryIndex;
pub use pinecone::{
    LegacyControl, PineconeConnector, PineconeIndex, ServerlessControl, LEGACY_CONTROLLER_TEMPLATE,
    MODERN_CONTROL_PLANE,
};
pub use qdrant::{QdrantConnector, QdrantControl, QdrantIndex};

/// Similarity metric an index is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::DotProduct => "dotproduct",
        }
    }
}

/// API shape a control handle speaks, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderShape {
    /// Serverless control plane (api.pinecone.io)
    Modern,
    /// Environment-scoped controller (controller.{env}.pinecone.io)
    Legacy,
    Qdrant,
    InMemory,
}

impl std::fmt::Display for ProviderShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderShape::Modern => "modern",
            ProviderShape::Legacy => "legacy",
            ProviderShape::Qdrant => "qdrant",
            ProviderShape::InMemory => "in-memory",
        };
        f.write_str(name)
    }
}

/// One vector with its id and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// Conjunction of exact-match metadata predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.equals.iter()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// Similarity query against a bound index
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub include_metadata: bool,
    pub filter: Option<MetadataFilter>,
    pub namespace: Option<String>,
}

/// One query hit, ordered by descending score
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<Metadata>,
}

/// Delete by id list, or wipe a whole namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
    pub namespace: Option<String>,
    pub delete_all: bool,
}

impl DeleteRequest {
    pub fn ids(ids: Vec<String>, namespace: Option<String>) -> Self {
        Self {
            ids,
            namespace,
            delete_all: false,
        }
    }

    pub fn all_in(namespace: String) -> Self {
        Self {
            ids: Vec::new(),
            namespace: Some(namespace),
            delete_all: true,
        }
    }
}

/// Index lifecycle operations, normalized across provider shapes
#[async_trait]
pub trait IndexControl: Send + Sync {
    fn shape(&self) -> ProviderShape;

    async fn list_index_names(&self) -> Result<Vec<String>, ProviderError>;

    /// Dimension of the named index, `None` when the provider doesn't report it
    async fn describe_dimension(&self, name: &str) -> Result<Option<usize>, ProviderError>;

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError>;

    async fn delete_index(&self, name: &str) -> Result<(), ProviderError>;

    async fn bind_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>, ProviderError>;
}

/// Data-plane operations against one bound index
#[async_trait]
pub trait IndexHandle: Send + Sync {
    /// Upsert vectors, returning how many were written
    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        namespace: Option<&str>,
    ) -> Result<usize, ProviderError>;

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, ProviderError>;

    /// Stored vectors for `ids`; ids that don't exist are left out
    async fn fetch(
        &self,
        ids: Vec<String>,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorRecord>, ProviderError>;

    async fn delete(&self, request: DeleteRequest) -> Result<(), ProviderError>;

    /// Delete `ids` from the default namespace and every tenant namespace.
    ///
    /// Walks the namespaces reported by `stats`; backends that can delete by
    /// stored id in one call override this.
    async fn delete_everywhere(&self, ids: Vec<String>) -> Result<(), ProviderError> {
        let stats = self.stats().await?;
        let mut namespaces: Vec<Option<String>> = vec![None];
        namespaces.extend(
            stats
                .namespaces
                .into_keys()
                .filter(|namespace| !namespace.is_empty())
                .map(Some),
        );
        for namespace in namespaces {
            self.delete(DeleteRequest::ids(ids.clone(), namespace)).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, ProviderError>;
}

/// Produces a control handle for a configured backend
#[async_trait]
pub trait IndexConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn IndexControl>, MemoryError>;
}

/// Cosine similarity; zero-norm vectors score 0
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_all_predicates() {
        let filter = MetadataFilter::new().eq("kind", "message").eq("user_id", "u1");

        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), "message".to_string());
        metadata.insert("user_id".to_string(), "u1".to_string());
        assert!(filter.matches(&metadata));

        metadata.insert("user_id".to_string(), "u2".to_string());
        assert!(!filter.matches(&metadata));

        assert!(MetadataFilter::new().matches(&Metadata::new()));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_delete_request_constructors() {
        let wipe = DeleteRequest::all_in("user:u1".to_string());
        assert!(wipe.delete_all);
        assert!(wipe.ids.is_empty());

        let by_id = DeleteRequest::ids(vec!["memory:1".to_string()], None);
        assert!(!by_id.delete_all);
        assert_eq!(by_id.namespace, None);
    }
}
