//! ============================================================================
//! Memory Types - Logical records, query results, and operation outcomes
//! ============================================================================
//! Defines the records callers hand to the store, the shapes queries return,
//! and the internal tri-state outcome used before results are collapsed at
//! the public boundary.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata bag attached to every stored vector
pub type Metadata = BTreeMap<String, String>;

/// Semantic category of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A single conversation turn
    Message,
    /// A durable fact or preference about the user
    UserFact,
    /// A distilled memory item owned by the upstream memory subsystem
    Memory,
    /// A whole-session summary (not tenant-partitioned)
    SessionSummary,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::UserFact => "user_fact",
            RecordKind::Memory => "memory",
            RecordKind::SessionSummary => "session_summary",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" => Ok(RecordKind::Message),
            "user_fact" | "userfact" => Ok(RecordKind::UserFact),
            "memory" => Ok(RecordKind::Memory),
            "session_summary" => Ok(RecordKind::SessionSummary),
            _ => Err(format!("Unknown record kind: {}", s)),
        }
    }
}

/// Business-level status of a memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Candidate,
    Distilled,
    Archived,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Candidate => "candidate",
            LifecycleState::Distilled => "distilled",
            LifecycleState::Archived => "archived",
        }
    }

    /// Whether memories in this state may be returned by similarity recall
    pub fn is_recallable(&self) -> bool {
        matches!(
            self,
            LifecycleState::Active | LifecycleState::Candidate | LifecycleState::Distilled
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(LifecycleState::Active),
            "candidate" => Ok(LifecycleState::Candidate),
            "distilled" => Ok(LifecycleState::Distilled),
            "archived" => Ok(LifecycleState::Archived),
            _ => Err(format!("Unknown lifecycle state: {}", s)),
        }
    }
}

fn default_role() -> String {
    "user".to_string()
}

fn default_category() -> String {
    "generic".to_string()
}

/// A single conversation turn to be embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub text: String,
    /// "user" or "assistant"
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub timestamp: String,
}

/// A durable user fact; identity is derived from the text itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "default_category")]
    pub category: String,
}

/// A memory item whose id is owned by the upstream memory subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub memory_id: String,
    pub user_id: String,
    pub text: String,
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub timestamp: String,
}

/// A session summary keyed by session id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub summary: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Any record the store knows how to encode.
///
/// Deserializes from the tagged payloads an embedding queue produces, e.g.
/// `{"kind": "user_fact", "user_id": "u1", "text": "likes tea"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalRecord {
    Message(MessageRecord),
    UserFact(FactRecord),
    Memory(MemoryItem),
    SessionSummary(SessionSummary),
}

impl LogicalRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            LogicalRecord::Message(_) => RecordKind::Message,
            LogicalRecord::UserFact(_) => RecordKind::UserFact,
            LogicalRecord::Memory(_) => RecordKind::Memory,
            LogicalRecord::SessionSummary(_) => RecordKind::SessionSummary,
        }
    }

    /// Tenant owning the record; empty for session summaries
    pub fn user_id(&self) -> &str {
        match self {
            LogicalRecord::Message(m) => &m.user_id,
            LogicalRecord::UserFact(f) => &f.user_id,
            LogicalRecord::Memory(m) => &m.user_id,
            LogicalRecord::SessionSummary(_) => "",
        }
    }

    /// Text that gets embedded
    pub fn text(&self) -> &str {
        match self {
            LogicalRecord::Message(m) => &m.text,
            LogicalRecord::UserFact(f) => &f.text,
            LogicalRecord::Memory(m) => &m.text,
            LogicalRecord::SessionSummary(s) => &s.summary,
        }
    }
}

/// A memory item returned by similarity recall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub memory_id: String,
    pub similarity: f32,
    pub text: String,
    pub lifecycle_state: Option<LifecycleState>,
}

/// Vector counts reported by the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub dimension: Option<usize>,
    pub total_vector_count: u64,
    /// Per-namespace counts; empty when the backend cannot report them
    pub namespaces: BTreeMap<String, u64>,
}

/// Overall result of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    NotInitialized,
    EmbeddingFailed,
    OperationFailed,
    Healthy,
}

/// Report produced by `MemoryStore::health_check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub dimension: Option<usize>,
    pub embedding_ms: Option<u64>,
    pub upsert_ms: Option<u64>,
    pub query_ms: Option<u64>,
    pub error: Option<String>,
}

impl HealthReport {
    pub(crate) fn failed(status: HealthStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            dimension: None,
            embedding_ms: None,
            upsert_ms: None,
            query_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a store operation before it is collapsed at the public API.
///
/// Callers of `MemoryStore` only ever see the collapsed value; this type lets
/// the store itself (and its tests) tell an unready index apart from a
/// provider failure.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome<T> {
    Ok(T),
    /// The index is not ready; nothing was attempted
    Unavailable,
    /// The provider reported a failure
    Failed(String),
}

impl<T> StoreOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, StoreOutcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            StoreOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreOutcome<U> {
        match self {
            StoreOutcome::Ok(value) => StoreOutcome::Ok(f(value)),
            StoreOutcome::Unavailable => StoreOutcome::Unavailable,
            StoreOutcome::Failed(reason) => StoreOutcome::Failed(reason),
        }
    }
}

impl<T: Default> StoreOutcome<T> {
    /// Collapse to the value, or its empty default when unavailable/failed
    pub fn unwrap_or_default(self) -> T {
        self.ok().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("message".parse::<RecordKind>().unwrap(), RecordKind::Message);
        assert_eq!("user_fact".parse::<RecordKind>().unwrap(), RecordKind::UserFact);
        assert_eq!(RecordKind::Memory.to_string(), "memory");
        assert!("summary_of_things".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_lifecycle_recallable() {
        assert!(LifecycleState::Active.is_recallable());
        assert!(LifecycleState::Candidate.is_recallable());
        assert!(LifecycleState::Distilled.is_recallable());
        assert!(!LifecycleState::Archived.is_recallable());
        assert_eq!("ARCHIVED".parse::<LifecycleState>().unwrap(), LifecycleState::Archived);
    }

    #[test]
    fn test_queue_payload_deserialization() {
        let payload = r#"[
            {"kind": "message", "user_id": "u1", "session_id": "s1", "text": "hi", "timestamp": "t1"},
            {"kind": "user_fact", "user_id": "u1", "text": "likes tea"}
        ]"#;
        let records: Vec<LogicalRecord> = serde_json::from_str(payload).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind(), RecordKind::Message);
        match &records[0] {
            LogicalRecord::Message(m) => assert_eq!(m.role, "user"),
            other => panic!("unexpected record {:?}", other),
        }
        match &records[1] {
            LogicalRecord::UserFact(f) => assert_eq!(f.category, "generic"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_outcome_collapse() {
        let failed: StoreOutcome<Vec<String>> = StoreOutcome::Failed("boom".into());
        assert!(failed.unwrap_or_default().is_empty());

        let unavailable: StoreOutcome<Option<String>> = StoreOutcome::Unavailable;
        assert_eq!(unavailable.unwrap_or_default(), None);

        let ok = StoreOutcome::Ok(2usize).map(|n| n * 2);
        assert_eq!(ok, StoreOutcome::Ok(4));
    }
}
