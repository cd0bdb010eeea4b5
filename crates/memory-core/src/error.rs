//! ============================================================================
//! Error Types - Provider and memory layer failures
//! ============================================================================
//! `ProviderError` covers anything a vector index backend can report.
//! `MemoryError` covers lifecycle and configuration failures. Neither type
//! ever crosses the `MemoryStore` boundary; they are logged and collapsed
//! into empty results there.
//! ============================================================================

use thiserror::Error;

/// Failures reported by a vector index backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Index already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend does not accept this call shape (e.g. namespace wipe)
    #[error("Operation not supported by provider: {0}")]
    Unsupported(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl ProviderError {
    /// Whether the error signals a call shape the backend cannot serve
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProviderError::Unsupported(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

impl From<qdrant_client::QdrantError> for ProviderError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        let message = e.to_string();
        if message.to_lowercase().contains("already exists") {
            ProviderError::AlreadyExists(message)
        } else if message.to_lowercase().contains("not found") {
            ProviderError::NotFound(message)
        } else {
            ProviderError::Backend(message)
        }
    }
}

/// Lifecycle and configuration failures of the memory layer
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Soft-disable path: no credential configured for the backend
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error(
        "Unrecognized vector index provider shape. Expected modern (serverless control plane) \
         or legacy (environment controller) API. Modern probe: {modern}; legacy probe: {legacy}"
    )]
    UnrecognizedProvider { modern: String, legacy: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_provider_names_both_shapes() {
        let err = MemoryError::UnrecognizedProvider {
            modern: "HTTP 404".to_string(),
            legacy: "connection refused".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("modern"));
        assert!(message.contains("legacy"));
        assert!(message.contains("HTTP 404"));
    }

    #[test]
    fn test_unsupported_classification() {
        assert!(ProviderError::Unsupported("deleteAll".into()).is_unsupported());
        assert!(!ProviderError::NotFound("x".into()).is_unsupported());
    }
}
