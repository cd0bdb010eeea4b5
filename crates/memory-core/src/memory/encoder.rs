//! ============================================================================
//! Record Encoder - Logical records to vector ids, namespaces, and metadata
//! ============================================================================
//! Pure functions, no I/O. Ids are derived deterministically so re-upserting
//! the same logical identity overwrites the stored vector:
//! - message:  `{user_id}:{session_id}:{timestamp}:{role}`
//! - fact:     `user:{user_id}:fact:{sha1(text)[..12]}`
//! - memory:   `memory:{memory_id}`
//! - summary:  `{session_id}`
//! ============================================================================

use sha1::{Digest, Sha1};

use super::provider::VectorRecord;
use super::types::{LogicalRecord, Metadata, RecordKind};

/// Prefix of every tenant namespace
pub const NAMESPACE_PREFIX: &str = "user:";

/// Number of hex characters of the fact digest kept in the id
const FACT_DIGEST_LEN: usize = 12;

/// An encoded record, ready to be paired with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub id: String,
    /// `None` for records that live in the default namespace
    pub namespace: Option<String>,
    pub metadata: Metadata,
}

impl EncodedRecord {
    pub fn into_vector(self, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: self.id,
            values,
            metadata: self.metadata,
        }
    }
}

/// Namespace partitioning one tenant's vectors
pub fn namespace_for(user_id: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, user_id)
}

pub fn message_id(user_id: &str, session_id: &str, timestamp: &str, role: &str) -> String {
    format!("{}:{}:{}:{}", user_id, session_id, timestamp, role)
}

/// First 12 hex characters of the SHA-1 of the fact text
pub fn fact_digest(text: &str) -> String {
    let digest = hex::encode(Sha1::digest(text.as_bytes()));
    digest[..FACT_DIGEST_LEN].to_string()
}

pub fn fact_id(user_id: &str, text: &str) -> String {
    format!("user:{}:fact:{}", user_id, fact_digest(text))
}

pub fn memory_vector_id(memory_id: &str) -> String {
    format!("memory:{}", memory_id)
}

/// Encode a logical record into its id, namespace and metadata
pub fn encode(record: &LogicalRecord) -> EncodedRecord {
    let kind = record.kind();
    let mut metadata = Metadata::new();
    metadata.insert("kind".to_string(), kind.as_str().to_string());
    metadata.insert("user_id".to_string(), record.user_id().to_string());
    metadata.insert("text".to_string(), record.text().to_string());

    let id = match record {
        LogicalRecord::Message(m) => {
            metadata.insert("session_id".to_string(), m.session_id.clone());
            metadata.insert("role".to_string(), m.role.clone());
            metadata.insert("timestamp".to_string(), m.timestamp.clone());
            message_id(&m.user_id, &m.session_id, &m.timestamp, &m.role)
        }
        LogicalRecord::UserFact(f) => {
            metadata.insert("session_id".to_string(), String::new());
            metadata.insert("role".to_string(), "fact".to_string());
            metadata.insert("timestamp".to_string(), f.timestamp.clone());
            metadata.insert("category".to_string(), f.category.clone());
            fact_id(&f.user_id, &f.text)
        }
        LogicalRecord::Memory(m) => {
            metadata.insert("memory_id".to_string(), m.memory_id.clone());
            metadata.insert("lifecycle_state".to_string(), m.lifecycle_state.to_string());
            metadata.insert("timestamp".to_string(), m.timestamp.clone());
            memory_vector_id(&m.memory_id)
        }
        LogicalRecord::SessionSummary(s) => {
            metadata.insert("session_id".to_string(), s.session_id.clone());
            metadata.insert("timestamp".to_string(), s.timestamp.clone());
            s.session_id.clone()
        }
    };

    let namespace = match kind {
        RecordKind::SessionSummary => None,
        _ => Some(namespace_for(record.user_id())),
    };

    EncodedRecord {
        id,
        namespace,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{
        FactRecord, LifecycleState, MemoryItem, MessageRecord, SessionSummary,
    };

    fn message() -> LogicalRecord {
        LogicalRecord::Message(MessageRecord {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            text: "hello".to_string(),
            role: "user".to_string(),
            timestamp: "t1".to_string(),
        })
    }

    fn fact(user_id: &str, text: &str) -> LogicalRecord {
        LogicalRecord::UserFact(FactRecord {
            user_id: user_id.to_string(),
            text: text.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            category: "preference".to_string(),
        })
    }

    #[test]
    fn test_message_encoding() {
        let encoded = encode(&message());
        assert_eq!(encoded.id, "u1:s1:t1:user");
        assert_eq!(encoded.namespace.as_deref(), Some("user:u1"));
        assert_eq!(encoded.metadata["kind"], "message");
        assert_eq!(encoded.metadata["session_id"], "s1");
        assert_eq!(encoded.metadata["role"], "user");
        assert_eq!(encoded.metadata["text"], "hello");
    }

    #[test]
    fn test_fact_id_is_content_addressed() {
        let a = encode(&fact("u1", "prefers tea"));
        let b = encode(&fact("u1", "prefers tea"));
        let c = encode(&fact("u1", "prefers coffee"));

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("user:u1:fact:"));
        assert_eq!(a.id.len(), "user:u1:fact:".len() + 12);
        assert_eq!(a.metadata["kind"], "user_fact");
        assert_eq!(a.metadata["session_id"], "");
        assert_eq!(a.metadata["category"], "preference");
    }

    #[test]
    fn test_fact_digest_known_value() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(fact_digest("abc"), "a9993e364706");
    }

    #[test]
    fn test_memory_encoding() {
        let encoded = encode(&LogicalRecord::Memory(MemoryItem {
            memory_id: "m-42".to_string(),
            user_id: "u7".to_string(),
            text: "owns a cat".to_string(),
            lifecycle_state: LifecycleState::Candidate,
            timestamp: "t".to_string(),
        }));
        assert_eq!(encoded.id, "memory:m-42");
        assert_eq!(encoded.namespace.as_deref(), Some("user:u7"));
        assert_eq!(encoded.metadata["lifecycle_state"], "candidate");
        assert_eq!(encoded.metadata["memory_id"], "m-42");
    }

    #[test]
    fn test_summary_uses_default_namespace() {
        let encoded = encode(&LogicalRecord::SessionSummary(SessionSummary {
            session_id: "s9".to_string(),
            summary: "talked about tea".to_string(),
            timestamp: "t".to_string(),
        }));
        assert_eq!(encoded.id, "s9");
        assert_eq!(encoded.namespace, None);
        assert_eq!(encoded.metadata["kind"], "session_summary");
    }
}
