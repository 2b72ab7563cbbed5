//! Hybrid Retrieval
//!
//! Answers free-text and filter queries over the record store.
//!
//! # Strategy selection
//!
//! - No query text: filter-only lookup in SQLite (the only path that honors
//!   date ranges).
//! - Vector and keyword backends both present: both run concurrently and
//!   their rankings are fused, 0.6 vector / 0.4 keyword by default.
//! - One backend present: that backend alone. If it fails or times out,
//!   the filter-only lookup answers instead, flagged as a fallback.
//! - No backend: filter-only lookup, flagged as a fallback.
//!
//! Backends are asked for `candidate_pool` hits; the caller's limit is cut
//! once, after fusion and after deprecated rows are dropped.
//!
//! Backend failures never surface as errors. The response carries
//! `fell_back` and `used_vector` so callers can tell a degraded answer from
//! a full one.

mod backend;
pub mod decay;
mod fts;
pub mod fusion;
#[cfg(feature = "http-vector")]
mod http;
mod strategy;

pub use backend::{
    BackendFilter, DocKind, DocRef, KeywordBackend, KeywordHit, VectorBackend, VectorDocument, VectorHit,
    VectorResults,
};
pub use fts::{to_match_expression, FtsKeywordBackend};
#[cfg(feature = "http-vector")]
pub use http::HttpVectorBackend;
pub use strategy::{
    FilterStrategy, HybridBlendStrategy, KeywordStrategy, SearchStrategy, VectorStrategy, DEFAULT_CANDIDATE_POOL,
};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::store::RecordStore;
use crate::types::{Observation, ObservationFilter, ObservationType, SessionSummary, UserPrompt};
use crate::utils::time::now_millis;
use crate::MnemoResult;

/// Limit applied when neither the query nor the configuration sets one
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// A retrieval request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text; blank counts as absent.
    pub text: Option<String>,
    pub project: Option<String>,
    #[serde(default)]
    pub types: Vec<ObservationType>,
    pub concept: Option<String>,
    pub file: Option<String>,
    /// Epoch ms, inclusive. Honored by the filter path only.
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_types(mut self, types: Vec<ObservationType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Trimmed query text, `None` when blank.
    pub fn query_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    /// Filters the search backends can apply.
    pub fn backend_filter(&self) -> BackendFilter {
        BackendFilter {
            project: self.project.clone(),
            types: self.types.clone(),
            kinds: Vec::new(),
        }
    }

    /// Structured filter for the SQLite path.
    pub fn observation_filter(&self) -> ObservationFilter {
        ObservationFilter {
            project: self.project.clone(),
            types: self.types.clone(),
            concept: self.concept.clone(),
            file: self.file.clone(),
            date_from: self.date_from,
            date_to: self.date_to,
            include_deprecated: false,
            limit: Some(self.effective_limit()),
        }
    }
}

/// Retrieval result with degradation metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub observations: Vec<Observation>,
    pub sessions: Vec<SessionSummary>,
    pub prompts: Vec<UserPrompt>,
    /// Name of the strategy that produced the result
    pub strategy: String,
    pub used_vector: bool,
    pub fell_back: bool,
}

impl SearchResponse {
    pub fn empty(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.sessions.is_empty() && self.prompts.is_empty()
    }

    fn degraded(mut self) -> Self {
        self.fell_back = true;
        self
    }
}

/// Search orchestrator over the record store and optional backends
#[derive(Clone)]
pub struct HybridRetrieval {
    store: RecordStore,
    config: SearchConfig,
    vector: Option<Arc<dyn VectorBackend>>,
    keyword: Option<Arc<dyn KeywordBackend>>,
}

impl HybridRetrieval {
    /// Uses the store's full-text index as the keyword backend when it exists.
    pub fn new(store: RecordStore, config: SearchConfig) -> Self {
        let keyword =
            FtsKeywordBackend::new(store.clone()).map(|backend| Arc::new(backend) as Arc<dyn KeywordBackend>);
        Self {
            store,
            config,
            vector: None,
            keyword,
        }
    }

    pub fn with_vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector = Some(backend);
        self
    }

    pub fn with_keyword_backend(mut self, backend: Arc<dyn KeywordBackend>) -> Self {
        self.keyword = Some(backend);
        self
    }

    pub fn without_keyword_backend(mut self) -> Self {
        self.keyword = None;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.config.backend_timeout_ms)
    }

    /// Run a query through the strategy its shape and the available
    /// backends call for.
    ///
    /// Only store errors on the filter path are returned; backend failures
    /// degrade.
    pub async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse> {
        let mut query = query.clone();
        query.limit = Some(query.limit.unwrap_or(self.config.default_limit));

        let filter = FilterStrategy::new(self.store.clone());
        if query.query_text().is_none() {
            return filter.search(&query).await;
        }

        let timeout = self.backend_timeout();
        let pool = self.config.candidate_pool;
        let vector = self.vector.clone().map(|backend| {
            Arc::new(VectorStrategy::new(self.store.clone(), backend).with_candidate_pool(pool))
                as Arc<dyn SearchStrategy>
        });
        let keyword = self.keyword.clone().map(|backend| {
            Arc::new(KeywordStrategy::new(self.store.clone(), backend).with_candidate_pool(pool))
                as Arc<dyn SearchStrategy>
        });

        let response = match (vector, keyword) {
            (Some(vector), Some(keyword)) => {
                let hybrid = HybridBlendStrategy::new(self.store.clone(), vector, keyword)
                    .with_weights(self.config.vector_weight, self.config.keyword_weight)
                    .with_timeout(timeout);
                hybrid.search(&query).await?
            }
            (Some(single), None) | (None, Some(single)) => {
                match tokio::time::timeout(timeout, single.search(&query)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(strategy = single.name(), error = %e, "Search backend failed, using filter-only lookup");
                        filter.search(&query).await?.degraded()
                    }
                    Err(_) => {
                        warn!(
                            strategy = single.name(),
                            timeout_ms = self.config.backend_timeout_ms,
                            "Search backend timed out, using filter-only lookup"
                        );
                        filter.search(&query).await?.degraded()
                    }
                }
            }
            (None, None) => {
                warn!("No search backend available, using filter-only lookup");
                filter.search(&query).await?.degraded()
            }
        };

        debug!(
            strategy = %response.strategy,
            observations = response.observations.len(),
            fell_back = response.fell_back,
            "Search complete"
        );
        Ok(response)
    }

    /// Load observations by id, record the access, and rank them by
    /// temporal decay.
    pub async fn recall_by_decay(&self, ids: &[i64]) -> MnemoResult<Vec<(Observation, f64)>> {
        self.store.record_access(ids).await?;
        let observations = self.store.get_observations(ids).await?;
        Ok(decay::rank_by_decay(observations, now_millis()))
    }

    /// Push observations to the vector backend. Returns how many were
    /// accepted; failures are logged and skipped.
    pub async fn index_observations(&self, observations: &[Observation]) -> usize {
        let Some(ref backend) = self.vector else {
            return 0;
        };
        let mut indexed = 0;
        for observation in observations {
            let document = VectorDocument {
                doc: DocRef::observation(observation.id),
                project: observation.project.clone(),
                obs_type: Some(observation.obs_type),
                text: observation.search_text(),
                created_at_epoch: observation.created_at_epoch,
            };
            match tokio::time::timeout(self.backend_timeout(), backend.add(document)).await {
                Ok(Ok(())) => indexed += 1,
                Ok(Err(e)) => warn!(id = observation.id, backend = backend.name(), error = %e, "Failed to index observation"),
                Err(_) => warn!(id = observation.id, backend = backend.name(), "Indexing timed out"),
            }
        }
        indexed
    }
}
