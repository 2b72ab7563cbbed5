//! Wiring of the engine components from the CLI configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mnemo_core::search::{HttpVectorBackend, VectorBackend};
use mnemo_core::{ConsolidationScheduler, DriftAnalyzer, HybridRetrieval, RecordStore, SupersessionDetector};
use tracing::debug;

use crate::config::Config;

/// Every component over one shared store.
pub struct Engine {
    pub store: RecordStore,
    pub scheduler: Arc<ConsolidationScheduler>,
    pub retrieval: HybridRetrieval,
    pub drift: DriftAnalyzer,
}

impl Engine {
    /// Open the configured database and build the components.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        let path = config.database_path();
        let store = RecordStore::open(&path)
            .with_context(|| format!("Failed to open memory database at {}", path.display()))?;
        debug!(path = %path.display(), fts = store.fts_available(), "Opened memory database");
        Self::with_store(store, config)
    }

    pub fn with_store(store: RecordStore, config: &Config) -> Result<Self> {
        let engine = config.engine.clone();
        let vector: Option<Arc<dyn VectorBackend>> = match &config.vector.url {
            Some(url) => {
                let timeout = Duration::from_millis(engine.search.backend_timeout_ms);
                let backend =
                    HttpVectorBackend::new(url.as_str(), timeout).context("Failed to create vector client")?;
                Some(Arc::new(backend))
            }
            None => None,
        };

        let mut detector = SupersessionDetector::new(store.clone(), engine.clone());
        let mut retrieval = HybridRetrieval::new(store.clone(), engine.search.clone());
        if let Some(backend) = vector {
            detector = detector.with_vector_backend(backend.clone());
            retrieval = retrieval.with_vector_backend(backend);
        }
        let scheduler = Arc::new(ConsolidationScheduler::new(store.clone(), Arc::new(detector), engine.clone()));

        let drift = DriftAnalyzer::new(store.clone(), engine.drift);

        Ok(Self {
            store,
            scheduler,
            retrieval,
            drift,
        })
    }
}
