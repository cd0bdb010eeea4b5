//! ============================================================================
//! MEMORY-CORE: Maya's long-term recall
//! ============================================================================
//! This crate handles the semantic memory layer of the Maya agent:
//! - Per-user vector namespaces for messages, facts and memory items
//! - Index lifecycle across Pinecone API shapes, Qdrant and in-memory
//! - Embeddings via x.ai with OpenAI fallback
//! - Fail-soft facade: nothing here ever errors into the caller
//! ============================================================================

pub mod config;
pub mod error;
pub mod memory;

// Re-export main types for convenience
pub use config::{BackendKind, MemoryConfig};
pub use error::{MemoryError, ProviderError};
pub use memory::{
    HealthReport, HealthStatus, IndexLifecycle, IndexStats, LifecycleState, LogicalRecord,
    MemoryMatch, MemoryStore, REQUIRED_DIMENSION,
};
