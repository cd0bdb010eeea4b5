//! ============================================================================
//! Memory Configuration - Environment-driven settings
//! ============================================================================
//! Read once at startup (after loading an optional .env file) and never
//! re-read. Absent credentials are not an error here: the store starts
//! disabled and every operation becomes a logged no-op.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::memory::{InMemoryIndex, IndexConnector, PineconeConnector, QdrantConnector};

/// Default index name
pub const DEFAULT_INDEX_NAME: &str = "maya2-session-memory";

/// Default environment for the legacy controller
pub const DEFAULT_ENVIRONMENT: &str = "us-east-1";

/// Default HTTP timeout for index and embedding calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default time a failed embedding provider is skipped
pub const DEFAULT_EMBEDDING_COOLDOWN_SECS: u64 = 60;

/// Which vector index backend to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Pinecone,
    Qdrant,
    InMemory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pinecone" => Ok(BackendKind::Pinecone),
            "qdrant" => Ok(BackendKind::Qdrant),
            "in-memory" | "in_memory" | "memory" => Ok(BackendKind::InMemory),
            _ => Err(format!(
                "Unknown memory backend '{}'. Valid values: pinecone, qdrant, in-memory",
                s
            )),
        }
    }
}

/// Settings for the semantic memory layer
#[derive(Clone)]
pub struct MemoryConfig {
    pub backend: BackendKind,
    pub pinecone_api_key: Option<String>,
    pub index_name: String,
    /// Legacy controller environment
    pub environment: String,
    /// Serverless cloud/region for newly created indexes
    pub cloud: String,
    pub region: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub xai_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub http_timeout: Duration,
    pub embedding_cooldown: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            pinecone_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            xai_api_key: None,
            openai_api_key: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            embedding_cooldown: Duration::from_secs(DEFAULT_EMBEDDING_COOLDOWN_SECS),
        }
    }
}

// Keys are redacted
impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(key: &Option<String>) -> &'static str {
            if key.as_deref().is_some_and(|k| !k.is_empty()) {
                "<set>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("MemoryConfig")
            .field("backend", &self.backend)
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("index_name", &self.index_name)
            .field("environment", &self.environment)
            .field("cloud", &self.cloud)
            .field("region", &self.region)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_api_key", &redact(&self.qdrant_api_key))
            .field("xai_api_key", &redact(&self.xai_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("http_timeout", &self.http_timeout)
            .field("embedding_cooldown", &self.embedding_cooldown)
            .finish()
    }
}

impl MemoryConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let backend = match get("MEMORY_BACKEND") {
            Some(value) => value.parse::<BackendKind>().map_err(|e| anyhow!(e))?,
            None => defaults.backend,
        };

        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(value) => {
                    let secs: u64 = value
                        .trim()
                        .parse()
                        .map_err(|e| anyhow!("Invalid {} '{}': {}", key, value, e))?;
                    Ok(Duration::from_secs(secs))
                }
                None => Ok(default),
            }
        };
        let http_timeout = seconds("MEMORY_HTTP_TIMEOUT_SECS", defaults.http_timeout)?;
        let embedding_cooldown =
            seconds("MEMORY_EMBEDDING_COOLDOWN_SECS", defaults.embedding_cooldown)?;

        Ok(Self {
            backend,
            pinecone_api_key: get("PINECONE_API_KEY"),
            index_name: get("PINECONE_INDEX").unwrap_or(defaults.index_name),
            environment: get("PINECONE_ENVIRONMENT")
                .or_else(|| get("PINECONE_ENV"))
                .unwrap_or(defaults.environment),
            cloud: get("PINECONE_CLOUD").unwrap_or(defaults.cloud),
            region: get("PINECONE_REGION").unwrap_or(defaults.region),
            qdrant_url: get("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: get("QDRANT_API_KEY"),
            xai_api_key: get("VITE_XAI_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            http_timeout,
            embedding_cooldown,
        })
    }

    /// Connector for the configured backend
    pub fn connector(&self) -> Arc<dyn IndexConnector> {
        match self.backend {
            BackendKind::Pinecone => Arc::new(PineconeConnector::from_config(self)),
            BackendKind::Qdrant => Arc::new(QdrantConnector::from_config(self)),
            BackendKind::InMemory => Arc::new(InMemoryIndex::new()),
        }
    }
}
