//! ============================================================================
//! Index Lifecycle - Ensures a correctly shaped index exists before use
//! ============================================================================
//! `ensure_ready()` connects, then creates the index when missing, recreates
//! it when its dimension is wrong, and otherwise reuses it. The bound handle
//! is cached; once cached, readiness never goes back to false.
//!
//! Concurrent first calls may each run the init sequence. A create that loses
//! the race comes back as `AlreadyExists` and counts as success.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::embeddings::REQUIRED_DIMENSION;
use super::provider::{IndexConnector, IndexControl, IndexHandle, Metric};
use crate::error::{MemoryError, ProviderError};

/// Owns readiness and the bound index handle
pub struct IndexLifecycle {
    connector: Arc<dyn IndexConnector>,
    index_name: String,
    dimension: usize,
    metric: Metric,
    ready: AtomicBool,
    handle: RwLock<Option<Arc<dyn IndexHandle>>>,
}

impl IndexLifecycle {
    pub fn new(connector: Arc<dyn IndexConnector>, index_name: impl Into<String>) -> Self {
        Self {
            connector,
            index_name: index_name.into(),
            dimension: REQUIRED_DIMENSION,
            metric: Metric::Cosine,
            ready: AtomicBool::new(false),
            handle: RwLock::new(None),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Readiness without side effects
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Make sure a bound handle is cached. Never fails loudly: errors are
    /// logged and reported as `false`.
    pub async fn ensure_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        match self.initialize().await {
            Ok(handle) => {
                {
                    let mut slot = self.handle.write().await;
                    if slot.is_none() {
                        *slot = Some(handle);
                    }
                }
                self.ready.store(true, Ordering::Release);
                info!("Vector index {} ready", self.index_name);
                true
            }
            Err(MemoryError::MissingCredentials(var)) => {
                warn!("{} not set; semantic memory disabled", var);
                false
            }
            Err(e) => {
                error!("Failed to initialize vector index {}: {}", self.index_name, e);
                false
            }
        }
    }

    /// Bound handle, initializing first if needed
    pub(crate) async fn handle(&self) -> Option<Arc<dyn IndexHandle>> {
        if !self.ensure_ready().await {
            return None;
        }
        self.handle.read().await.clone()
    }

    async fn initialize(&self) -> Result<Arc<dyn IndexHandle>, MemoryError> {
        let control = self.connector.connect().await?;
        debug!(
            "Connected to {} index provider for {}",
            control.shape(),
            self.index_name
        );

        let names = control.list_index_names().await?;
        if !names.iter().any(|name| name == &self.index_name) {
            self.create(control.as_ref()).await?;
        } else {
            match control.describe_dimension(&self.index_name).await? {
                Some(dimension) if dimension == self.dimension => {
                    debug!("Reusing index {} (dimension {})", self.index_name, dimension);
                }
                reported => {
                    warn!(
                        "Index {} has dimension {:?} but {} is required; deleting and \
                         recreating it (all stored vectors are lost)",
                        self.index_name, reported, self.dimension
                    );
                    match control.delete_index(&self.index_name).await {
                        Ok(()) | Err(ProviderError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                    self.create(control.as_ref()).await?;
                }
            }
        }

        Ok(control.bind_index(&self.index_name).await?)
    }

    async fn create(&self, control: &dyn IndexControl) -> Result<(), ProviderError> {
        match control
            .create_index(&self.index_name, self.dimension, self.metric)
            .await
        {
            Ok(()) => {
                info!(
                    "Created index {} (dimension {}, metric {})",
                    self.index_name,
                    self.dimension,
                    self.metric.as_str()
                );
                Ok(())
            }
            Err(ProviderError::AlreadyExists(_)) => {
                debug!("Index {} was created concurrently", self.index_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::provider::{InMemoryIndex, PineconeConnector};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Refuses the first `outages` connects, then hands out the backend
    struct FlakyConnector {
        backend: InMemoryIndex,
        outages: AtomicUsize,
    }

    #[async_trait]
    impl IndexConnector for FlakyConnector {
        async fn connect(&self) -> Result<Arc<dyn IndexControl>, MemoryError> {
            let remaining = self.outages.load(Ordering::SeqCst);
            if remaining > 0 {
                self.outages.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::Transport("connection refused".to_string()).into());
            }
            self.backend.connect().await
        }
    }

    fn lifecycle(backend: &InMemoryIndex) -> IndexLifecycle {
        IndexLifecycle::new(Arc::new(backend.clone()), "idx")
    }

    #[tokio::test]
    async fn test_creates_missing_index() {
        let backend = InMemoryIndex::new();
        let lifecycle = lifecycle(&backend);

        assert!(!lifecycle.is_ready());
        assert!(lifecycle.ensure_ready().await);
        assert!(lifecycle.is_ready());
        assert_eq!(backend.dimension_of("idx").await, Some(REQUIRED_DIMENSION));
        assert_eq!(backend.create_count(), 1);
    }

    #[tokio::test]
    async fn test_reuses_correct_index() {
        let backend = InMemoryIndex::new();
        backend.seed_index("idx", REQUIRED_DIMENSION).await;

        assert!(lifecycle(&backend).ensure_ready().await);
        assert_eq!(backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_recreates_on_dimension_mismatch() {
        let backend = InMemoryIndex::new();
        backend.seed_index("idx", 768).await;

        assert!(lifecycle(&backend).ensure_ready().await);
        assert_eq!(backend.dimension_of("idx").await, Some(REQUIRED_DIMENSION));
        assert_eq!(backend.create_count(), 1);
    }

    #[tokio::test]
    async fn test_ready_is_idempotent() {
        let backend = InMemoryIndex::new();
        let lifecycle = lifecycle(&backend);

        assert!(lifecycle.ensure_ready().await);
        let connects = backend.connect_count();
        let calls = backend.control_calls();

        assert!(lifecycle.ensure_ready().await);
        assert!(lifecycle.handle().await.is_some());
        assert_eq!(backend.connect_count(), connects);
        assert_eq!(backend.control_calls(), calls);
    }

    #[tokio::test]
    async fn test_retries_after_failed_attempt() {
        let backend = InMemoryIndex::new();
        let connector = FlakyConnector {
            backend: backend.clone(),
            outages: AtomicUsize::new(1),
        };
        let lifecycle = IndexLifecycle::new(Arc::new(connector), "idx");

        assert!(!lifecycle.ensure_ready().await);
        assert!(!lifecycle.is_ready());

        assert!(lifecycle.ensure_ready().await);
        assert!(lifecycle.is_ready());
        assert!(lifecycle.handle().await.is_some());
        assert_eq!(backend.dimension_of("idx").await, Some(REQUIRED_DIMENSION));
    }

    #[tokio::test]
    async fn test_missing_credentials_soft_disable() {
        let connector = PineconeConnector::new(
            None,
            "us-east-1",
            "aws",
            "us-east-1",
            Duration::from_secs(1),
        );
        let lifecycle = IndexLifecycle::new(Arc::new(connector), "idx");

        assert!(!lifecycle.ensure_ready().await);
        assert!(!lifecycle.is_ready());
        assert!(lifecycle.handle().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialization_creates_one_index() {
        let backend = InMemoryIndex::new();
        let lifecycle = Arc::new(lifecycle(&backend));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.ensure_ready().await })
            })
            .collect();

        for result in futures_util::future::join_all(tasks).await {
            assert!(result.unwrap());
        }
        assert_eq!(backend.index_names().await, vec!["idx".to_string()]);
        assert_eq!(backend.dimension_of("idx").await, Some(REQUIRED_DIMENSION));
        assert_eq!(backend.create_count(), 1);
    }
}
