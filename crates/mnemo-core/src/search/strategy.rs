//! Search strategies.
//!
//! Each strategy ranks document references for a query and hydrates them
//! from the record store. The hybrid strategy composes any two others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::backend::{DocKind, DocRef, KeywordBackend, VectorBackend};
use super::fusion::{blend, merge_unique};
use super::{SearchQuery, SearchResponse};
use crate::store::RecordStore;
use crate::{MnemoError, MnemoResult};

/// Hits requested from a backend when no pool is configured
pub const DEFAULT_CANDIDATE_POOL: usize = 100;

/// One way of answering a query
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Reported as `SearchResponse::strategy`
    fn name(&self) -> &'static str;

    /// Whether this strategy can serve the query at all.
    fn can_handle(&self, query: &SearchQuery) -> bool;

    /// Whether results come from embedding similarity.
    fn uses_vector(&self) -> bool {
        false
    }

    /// Ranked references, best first.
    async fn rank(&self, query: &SearchQuery) -> MnemoResult<Vec<DocRef>>;

    /// Ranked and hydrated results.
    async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse>;
}

/// Load the referenced records, keeping rank order within each kind.
///
/// Deprecated observations and references to missing rows are dropped.
/// Observations are cut to the query limit.
pub(crate) async fn hydrate(
    store: &RecordStore,
    docs: &[DocRef],
    query: &SearchQuery,
    strategy: &str,
    used_vector: bool,
) -> MnemoResult<SearchResponse> {
    let ids_of = |kind: DocKind| -> Vec<i64> { docs.iter().filter(|d| d.kind == kind).map(|d| d.id).collect() };

    let mut observations = store.get_observations(&ids_of(DocKind::Observation)).await?;
    observations.retain(|o| !o.deprecated);
    observations.truncate(query.effective_limit());

    Ok(SearchResponse {
        observations,
        sessions: store.get_summaries(&ids_of(DocKind::Summary)).await?,
        prompts: store.get_user_prompts(&ids_of(DocKind::Prompt)).await?,
        strategy: strategy.to_string(),
        used_vector,
        fell_back: false,
    })
}

/// Backend request size: never below the caller's limit.
fn candidates(query: &SearchQuery, pool: usize) -> usize {
    pool.max(query.effective_limit())
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Structured lookup straight against SQLite
pub struct FilterStrategy {
    store: RecordStore,
}

impl FilterStrategy {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchStrategy for FilterStrategy {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn can_handle(&self, _query: &SearchQuery) -> bool {
        true
    }

    async fn rank(&self, query: &SearchQuery) -> MnemoResult<Vec<DocRef>> {
        let observations = self.store.query_observations(&query.observation_filter()).await?;
        Ok(observations.iter().map(|o| DocRef::observation(o.id)).collect())
    }

    async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse> {
        let observations = self.store.query_observations(&query.observation_filter()).await?;
        Ok(SearchResponse {
            observations,
            strategy: self.name().to_string(),
            ..Default::default()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword
// ─────────────────────────────────────────────────────────────────────────────

/// Text-relevance ranking from a keyword backend
pub struct KeywordStrategy {
    store: RecordStore,
    backend: Arc<dyn KeywordBackend>,
    candidate_pool: usize,
}

impl KeywordStrategy {
    pub fn new(store: RecordStore, backend: Arc<dyn KeywordBackend>) -> Self {
        Self {
            store,
            backend,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }

    pub fn with_candidate_pool(mut self, candidate_pool: usize) -> Self {
        self.candidate_pool = candidate_pool;
        self
    }
}

#[async_trait]
impl SearchStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn can_handle(&self, query: &SearchQuery) -> bool {
        query.query_text().is_some()
    }

    /// The backend is asked for the whole candidate pool; the limit is cut
    /// after hydration.
    async fn rank(&self, query: &SearchQuery) -> MnemoResult<Vec<DocRef>> {
        let Some(text) = query.query_text() else {
            return Ok(Vec::new());
        };
        let hits = self
            .backend
            .query(text, &query.backend_filter(), candidates(query, self.candidate_pool))
            .await?;
        Ok(hits.into_iter().map(|hit| hit.doc).collect())
    }

    async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse> {
        let docs = self.rank(query).await?;
        hydrate(&self.store, &docs, query, self.name(), false).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding-similarity ranking from a vector backend
pub struct VectorStrategy {
    store: RecordStore,
    backend: Arc<dyn VectorBackend>,
    candidate_pool: usize,
}

impl VectorStrategy {
    pub fn new(store: RecordStore, backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            store,
            backend,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }

    pub fn with_candidate_pool(mut self, candidate_pool: usize) -> Self {
        self.candidate_pool = candidate_pool;
        self
    }
}

#[async_trait]
impl SearchStrategy for VectorStrategy {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn can_handle(&self, query: &SearchQuery) -> bool {
        query.query_text().is_some()
    }

    fn uses_vector(&self) -> bool {
        true
    }

    /// A result the backend marks unusable is an error here.
    async fn rank(&self, query: &SearchQuery) -> MnemoResult<Vec<DocRef>> {
        let Some(text) = query.query_text() else {
            return Ok(Vec::new());
        };
        let results = self
            .backend
            .query(text, &query.backend_filter(), candidates(query, self.candidate_pool))
            .await?;
        if !results.usable {
            return Err(MnemoError::backend(self.backend.name(), "results marked unusable"));
        }
        Ok(results.hits.into_iter().map(|hit| hit.doc).collect())
    }

    async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse> {
        let docs = self.rank(query).await?;
        hydrate(&self.store, &docs, query, self.name(), true).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hybrid blend
// ─────────────────────────────────────────────────────────────────────────────

/// Concurrent vector + keyword ranking fused by weighted positional score
pub struct HybridBlendStrategy {
    store: RecordStore,
    vector: Arc<dyn SearchStrategy>,
    keyword: Arc<dyn SearchStrategy>,
    vector_weight: f64,
    keyword_weight: f64,
    timeout: Duration,
}

/// Which sides of a hybrid query produced a ranking
struct Blended {
    docs: Vec<DocRef>,
    strategy: &'static str,
    used_vector: bool,
    fell_back: bool,
}

impl HybridBlendStrategy {
    pub fn new(store: RecordStore, vector: Arc<dyn SearchStrategy>, keyword: Arc<dyn SearchStrategy>) -> Self {
        Self {
            store,
            vector,
            keyword,
            vector_weight: 0.6,
            keyword_weight: 0.4,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_weights(mut self, vector_weight: f64, keyword_weight: f64) -> Self {
        self.vector_weight = vector_weight;
        self.keyword_weight = keyword_weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded(&self, strategy: &dyn SearchStrategy, query: &SearchQuery) -> MnemoResult<Vec<DocRef>> {
        match tokio::time::timeout(self.timeout, strategy.rank(query)).await {
            Ok(result) => result,
            Err(_) => Err(MnemoError::timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Fuse observation rankings and merge the unscored kinds.
    ///
    /// Nothing is cut here: deprecated rows drop out during hydration, which
    /// then applies the limit.
    fn fuse(&self, vector: &[DocRef], keyword: &[DocRef]) -> Vec<DocRef> {
        let of_kind = |docs: &[DocRef], kind: DocKind| -> Vec<DocRef> {
            docs.iter().copied().filter(|d| d.kind == kind).collect()
        };

        let mut fused: Vec<DocRef> = blend(
            &of_kind(vector, DocKind::Observation),
            &of_kind(keyword, DocKind::Observation),
            self.vector_weight,
            self.keyword_weight,
        )
        .into_iter()
        .map(|(doc, _)| doc)
        .collect();

        for kind in [DocKind::Summary, DocKind::Prompt] {
            fused.extend(merge_unique(of_kind(vector, kind), of_kind(keyword, kind), |d| d.id));
        }
        fused
    }

    async fn blend_rankings(&self, query: &SearchQuery) -> Blended {
        let (vector, keyword) = tokio::join!(
            self.bounded(self.vector.as_ref(), query),
            self.bounded(self.keyword.as_ref(), query),
        );

        match (vector, keyword) {
            (Ok(vector), Ok(keyword)) => Blended {
                docs: self.fuse(&vector, &keyword),
                strategy: self.name(),
                used_vector: true,
                fell_back: false,
            },
            (Err(e), Ok(keyword)) => {
                warn!(backend = self.vector.name(), error = %e, "Vector search unavailable, using keyword results");
                Blended {
                    docs: keyword,
                    strategy: self.keyword.name(),
                    used_vector: false,
                    fell_back: true,
                }
            }
            (Ok(vector), Err(e)) => {
                warn!(backend = self.keyword.name(), error = %e, "Keyword search unavailable, using vector results");
                Blended {
                    docs: vector,
                    strategy: self.vector.name(),
                    used_vector: true,
                    fell_back: true,
                }
            }
            (Err(vector_err), Err(keyword_err)) => {
                warn!(
                    vector_error = %vector_err,
                    keyword_error = %keyword_err,
                    "Both search backends unavailable"
                );
                Blended {
                    docs: Vec::new(),
                    strategy: self.name(),
                    used_vector: false,
                    fell_back: true,
                }
            }
        }
    }
}

#[async_trait]
impl SearchStrategy for HybridBlendStrategy {
    fn name(&self) -> &'static str {
        "hybrid-blend"
    }

    fn can_handle(&self, query: &SearchQuery) -> bool {
        self.vector.can_handle(query) && self.keyword.can_handle(query)
    }

    fn uses_vector(&self) -> bool {
        true
    }

    async fn rank(&self, query: &SearchQuery) -> MnemoResult<Vec<DocRef>> {
        Ok(self.blend_rankings(query).await.docs)
    }

    async fn search(&self, query: &SearchQuery) -> MnemoResult<SearchResponse> {
        let blended = self.blend_rankings(query).await;
        debug!(
            strategy = blended.strategy,
            docs = blended.docs.len(),
            fell_back = blended.fell_back,
            "Hybrid ranking complete"
        );
        let mut response = hydrate(&self.store, &blended.docs, query, blended.strategy, blended.used_vector).await?;
        response.fell_back = blended.fell_back;
        Ok(response)
    }
}
