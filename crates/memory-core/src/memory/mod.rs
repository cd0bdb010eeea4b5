//! ============================================================================
//! Memory Module - Semantic recall over a multi-tenant vector index
//! ============================================================================
//! Stores conversation turns, durable user facts, distilled memory items and
//! session summaries as embeddings, one namespace per user (`user:{id}`).
//!
//! ## Features
//! - Deterministic vector ids (re-upserting overwrites)
//! - Per-user namespace isolation
//! - Lifecycle filtering of recalled memories
//! - Pinecone (modern and legacy control planes), Qdrant, or in-memory
//! - Graceful degradation: no credentials or no index means no-ops
//!
//! ## Architecture
//! ```text
//! MemoryStore ──► encoder (id, namespace, metadata)
//!      │     └──► EmbeddingProvider (x.ai → OpenAI)
//!      ▼
//! IndexLifecycle ──► IndexConnector ──► IndexControl ──► IndexHandle
//!   (ensure_ready)     (shape probe)     (create/reuse)   (upsert/query/delete)
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use memory_core::{MemoryConfig, MemoryStore};
//!
//! let store = MemoryStore::from_config(&MemoryConfig::from_env()?);
//! store.initialize().await;
//!
//! store.upsert_user_fact("u1", "Prefers concise answers", &now, None).await;
//! let facts = store.query_user_facts("u1", "how should I respond", 5).await;
//! ```
//! ============================================================================

mod embeddings;
mod encoder;
mod lifecycle;
pub mod provider;
mod store;
mod types;

// Re-export public types
pub use embeddings::{
    create_embedding_service, EmbeddingChain, EmbeddingProvider, EmbeddingService,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_PROVIDER_COOLDOWN, REQUIRED_DIMENSION,
};
pub use encoder::{
    encode, fact_digest, fact_id, memory_vector_id, message_id, namespace_for, EncodedRecord,
    NAMESPACE_PREFIX,
};
pub use lifecycle::IndexLifecycle;
pub use provider::{
    IndexConnector, IndexControl, IndexHandle, InMemoryIndex, PineconeConnector, QdrantConnector,
};
pub use store::{MemoryStore, MESSAGE_SEPARATOR, SUMMARY_SCORE_THRESHOLD};
pub use types::{
    FactRecord, HealthReport, HealthStatus, IndexStats, LifecycleState, LogicalRecord,
    MemoryItem, MemoryMatch, MessageRecord, Metadata, RecordKind, SessionSummary, StoreOutcome,
};
