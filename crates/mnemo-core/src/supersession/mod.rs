//! Supersession Detector
//!
//! Finds pairs where a newer observation replaces an older one and applies
//! the link through the record store. Also owns the follow-up steps of a
//! sleep cycle that work on supersession links: chain consolidation,
//! deprecation and memory-tier reclassification.
//!
//! ## Pair evaluation
//!
//! A pair is skipped unless it passes, in order: same type (if required),
//! same project (if required), creation gap within the limit and semantic
//! similarity at or above the minimum. Surviving pairs are scored by
//! [`scoring::confidence`] and kept when the score reaches the
//! priority-adjusted threshold.

pub mod scoring;
pub mod tiers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{CycleConfig, EngineConfig, PriorityConfig};
use crate::search::{BackendFilter, DocKind, VectorBackend, VectorHit};
use crate::store::{ChainReport, RecordStore, TierUpdate};
use crate::types::{MemoryTier, Observation, ObservationType, PriorityTier};
use crate::utils::time::{days_ago, now_millis};
use crate::MnemoResult;

pub use scoring::{ConfidenceWeights, PairSignals};
pub use tiers::{classify_memory_tier, TierClassification};

/// Vector hits fetched per newer observation
const SIMILARITY_QUERY_LIMIT: usize = 50;

/// A proposed supersession
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersessionCandidate {
    pub older_id: i64,
    pub newer_id: i64,
    pub confidence: f64,
    pub reason: String,
    pub signals: PairSignals,
    pub older_type: ObservationType,
    pub newer_type: ObservationType,
    /// Type weight of the newer observation
    pub priority: f64,
    pub priority_tier: PriorityTier,
}

/// Output of one detection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Highest priority first, then highest confidence.
    pub candidates: Vec<SupersessionCandidate>,
    pub processed_count: usize,
    pub duration_ms: u64,
}

/// Output of [`SupersessionDetector::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub by_priority_tier: BTreeMap<PriorityTier, usize>,
}

/// Output of [`SupersessionDetector::reclassify_tiers`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierReport {
    /// Observations whose tier differs from the stored one.
    pub updates: Vec<TierUpdate>,
    /// Rows written; zero on a dry run.
    pub changed: usize,
    /// Distribution after classification.
    pub by_tier: BTreeMap<MemoryTier, i64>,
}

/// Base threshold and per-priority reduction
#[derive(Debug, Clone, Copy)]
struct ThresholdPolicy {
    base: f64,
    boost_factor: f64,
    priority_enabled: bool,
}

impl ThresholdPolicy {
    fn threshold_for(&self, priority: f64) -> f64 {
        if self.priority_enabled {
            scoring::effective_threshold(self.base, priority, self.boost_factor)
        } else {
            self.base
        }
    }
}

/// Detects and applies supersession links
pub struct SupersessionDetector {
    store: RecordStore,
    config: RwLock<EngineConfig>,
    weights: ConfidenceWeights,
    vector: Option<Arc<dyn VectorBackend>>,
}

impl SupersessionDetector {
    pub fn new(store: RecordStore, config: EngineConfig) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            weights: ConfidenceWeights::default(),
            vector: None,
        }
    }

    /// Use a vector backend for semantic similarity.
    pub fn with_vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector = Some(backend);
        self
    }

    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: EngineConfig) {
        *self.config.write().await = config;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detection
    // ─────────────────────────────────────────────────────────────────────────

    /// Compare every pair among a project's recent observations.
    pub async fn detect_batch(&self, project: &str, cycle: &CycleConfig) -> MnemoResult<DetectionResult> {
        let started = Instant::now();
        let config = self.config().await;
        let since = days_ago(now_millis(), cycle.supersession_lookback_days);

        let mut observations = self
            .store
            .consolidation_candidates(project, since, cycle.max_observations_per_cycle)
            .await?;

        debug!(
            project,
            lookback_days = cycle.supersession_lookback_days,
            observation_count = observations.len(),
            "Starting supersession detection batch"
        );

        if observations.len() < 2 {
            return Ok(DetectionResult {
                processed_count: observations.len(),
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        if config.priority.enabled && config.priority.priority_ordering {
            sort_by_priority(&mut observations, &config.priority);
        }

        let policy = ThresholdPolicy {
            base: cycle.supersession_threshold,
            boost_factor: cycle.priority_boost_factor,
            priority_enabled: config.priority.enabled,
        };

        let mut similarity_cache = HashMap::new();
        let mut candidates = Vec::new();
        for older in observations.iter().filter(|o| o.superseded_by.is_none()) {
            for newer in observations
                .iter()
                .filter(|n| n.id > older.id && n.created_at_epoch >= older.created_at_epoch)
            {
                if let Some(candidate) = self
                    .check_pair(older, newer, &config, &mut similarity_cache)
                    .await
                {
                    self.keep_if_confident(candidate, &policy, &mut candidates);
                }
            }
        }

        sort_candidates(&mut candidates);
        let result = DetectionResult {
            candidates,
            processed_count: observations.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            project,
            candidates_found = result.candidates.len(),
            duration_ms = result.duration_ms,
            "Supersession detection batch complete"
        );
        Ok(result)
    }

    /// Compare one session's observations against the project's recent
    /// observations from other sessions.
    pub async fn detect_for_session(
        &self,
        memory_session_id: &str,
        lookback_days: u32,
        max_observations: usize,
    ) -> MnemoResult<DetectionResult> {
        let started = Instant::now();
        let config = self.config().await;

        let mut session_observations: Vec<Observation> = self
            .store
            .observations_for_session(memory_session_id)
            .await?
            .into_iter()
            .filter(|o| !o.deprecated && o.superseded_by.is_none())
            .collect();

        let Some(project) = session_observations.first().map(|o| o.project.clone()) else {
            return Ok(DetectionResult {
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        };

        if config.priority.enabled && config.priority.priority_ordering {
            sort_by_priority(&mut session_observations, &config.priority);
        }

        let session_ids: HashSet<i64> = session_observations.iter().map(|o| o.id).collect();
        let since = days_ago(now_millis(), lookback_days);
        let existing: Vec<Observation> = self
            .store
            .consolidation_candidates(&project, since, max_observations)
            .await?
            .into_iter()
            .filter(|o| o.superseded_by.is_none() && !session_ids.contains(&o.id))
            .collect();

        debug!(
            memory_session_id,
            project = %project,
            session_observations = session_observations.len(),
            existing_observations = existing.len(),
            "Starting session supersession detection"
        );

        let policy = ThresholdPolicy {
            base: config.supersession.min_confidence,
            boost_factor: config.priority.confidence_boost_factor,
            priority_enabled: config.priority.enabled,
        };

        let mut similarity_cache = HashMap::new();
        let mut candidates = Vec::new();
        for newer in &session_observations {
            for older in existing
                .iter()
                .filter(|o| o.id < newer.id && o.created_at_epoch <= newer.created_at_epoch)
            {
                if let Some(candidate) = self
                    .check_pair(older, newer, &config, &mut similarity_cache)
                    .await
                {
                    self.keep_if_confident(candidate, &policy, &mut candidates);
                }
            }
        }

        sort_candidates(&mut candidates);
        Ok(DetectionResult {
            candidates,
            processed_count: session_observations.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn keep_if_confident(
        &self,
        candidate: SupersessionCandidate,
        policy: &ThresholdPolicy,
        candidates: &mut Vec<SupersessionCandidate>,
    ) {
        let threshold = policy.threshold_for(candidate.priority);
        let keep = candidate.confidence >= threshold;
        debug!(
            older_id = candidate.older_id,
            newer_id = candidate.newer_id,
            confidence = candidate.confidence,
            threshold,
            keep,
            "Evaluated supersession pair"
        );
        if keep {
            candidates.push(candidate);
        }
    }

    /// Score a pair, or `None` when a gate rejects it.
    async fn check_pair(
        &self,
        older: &Observation,
        newer: &Observation,
        config: &EngineConfig,
        cache: &mut HashMap<i64, Option<Vec<VectorHit>>>,
    ) -> Option<SupersessionCandidate> {
        let gates = &config.supersession;
        if gates.same_type_required && older.obs_type != newer.obs_type {
            return None;
        }
        if gates.same_project_required && older.project != newer.project {
            return None;
        }

        let age_difference_hours = scoring::age_difference_hours(older, newer);
        if age_difference_hours > gates.max_age_difference_hours as f64 {
            return None;
        }

        let semantic_similarity = self.semantic_similarity(older, newer, config, cache).await;
        if semantic_similarity < gates.min_semantic_similarity {
            return None;
        }

        let signals = PairSignals {
            semantic_similarity,
            topic_match: scoring::topic_match(&older.concepts, &newer.concepts),
            file_overlap: scoring::file_overlap(&older.files_modified, &newer.files_modified),
            type_match: older.obs_type == newer.obs_type,
            age_difference_hours,
        };
        let confidence = scoring::confidence(&signals, &self.weights, gates.max_age_difference_hours as f64);
        let priority = config.priority.weight(newer.obs_type);
        let priority_tier = PriorityConfig::tier(priority);

        Some(SupersessionCandidate {
            older_id: older.id,
            newer_id: newer.id,
            confidence,
            reason: scoring::describe(&signals, newer.obs_type.as_str(), priority_tier.as_str()),
            signals,
            older_type: older.obs_type,
            newer_type: newer.obs_type,
            priority,
            priority_tier,
        })
    }

    /// Vector similarity when a backend answers, text similarity otherwise.
    async fn semantic_similarity(
        &self,
        older: &Observation,
        newer: &Observation,
        config: &EngineConfig,
        cache: &mut HashMap<i64, Option<Vec<VectorHit>>>,
    ) -> f64 {
        let Some(backend) = &self.vector else {
            return scoring::text_similarity(older, newer);
        };

        if !cache.contains_key(&newer.id) {
            let hits = self.query_similar(backend.as_ref(), newer, config).await;
            cache.insert(newer.id, hits);
        }

        match cache.get(&newer.id) {
            Some(Some(hits)) => hits
                .iter()
                .find(|hit| hit.doc.kind == DocKind::Observation && hit.doc.id == older.id)
                .map(|hit| scoring::distance_to_similarity(hit.distance))
                .unwrap_or(0.0),
            Some(None) if newer.narrative.is_none() && newer.title.is_none() => 0.0,
            _ => scoring::text_similarity(older, newer),
        }
    }

    /// Hits for the newer observation's text, `None` when the backend fails.
    async fn query_similar(
        &self,
        backend: &dyn VectorBackend,
        newer: &Observation,
        config: &EngineConfig,
    ) -> Option<Vec<VectorHit>> {
        let text = newer
            .narrative
            .as_deref()
            .or(newer.title.as_deref())
            .filter(|t| !t.trim().is_empty())?;

        let filter = BackendFilter {
            kinds: vec![DocKind::Observation],
            ..Default::default()
        };
        let timeout = Duration::from_millis(config.search.backend_timeout_ms);
        match tokio::time::timeout(timeout, backend.query(text, &filter, SIMILARITY_QUERY_LIMIT)).await {
            Ok(Ok(results)) if results.usable => Some(results.hits),
            Ok(Ok(_)) => {
                debug!(backend = backend.name(), "Vector backend not usable, using text similarity");
                None
            }
            Ok(Err(e)) => {
                debug!(backend = backend.name(), error = %e, "Vector query failed, using text similarity");
                None
            }
            Err(_) => {
                debug!(backend = backend.name(), "Vector query timed out, using text similarity");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply candidates in order. An older observation is superseded at most
    /// once; later candidates for it are skipped.
    pub async fn apply(&self, candidates: &[SupersessionCandidate], dry_run: bool) -> MnemoResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut seen = HashSet::new();

        for candidate in candidates {
            if !seen.insert(candidate.older_id) {
                continue;
            }
            let applied = if dry_run {
                debug!(
                    older_id = candidate.older_id,
                    newer_id = candidate.newer_id,
                    confidence = candidate.confidence,
                    reason = %candidate.reason,
                    "Dry run: would apply supersession"
                );
                true
            } else {
                self.store
                    .apply_supersession(candidate.older_id, candidate.newer_id)
                    .await?
            };

            if applied {
                outcome.applied += 1;
                *outcome.by_priority_tier.entry(candidate.priority_tier).or_default() += 1;
            }
        }
        Ok(outcome)
    }

    /// Deprecate observations superseded for more than `after_days`.
    pub async fn deprecate(&self, project: &str, after_days: u32, dry_run: bool) -> MnemoResult<usize> {
        let cutoff = days_ago(now_millis(), after_days);
        let reason = format!("Superseded for more than {after_days} days");
        let count = self
            .store
            .deprecate_superseded(project, cutoff, &reason, dry_run)
            .await?;
        if count > 0 {
            info!(project, count, dry_run, "Deprecated superseded observations");
        }
        Ok(count)
    }

    /// Relink supersession chains so every link points at the newest
    /// observation.
    pub async fn consolidate_chains(&self, project: &str, dry_run: bool) -> MnemoResult<ChainReport> {
        self.store.consolidate_chains(project, dry_run).await
    }

    /// Reclassify every observation of a project into a memory tier.
    pub async fn reclassify_tiers(&self, project: &str, dry_run: bool) -> MnemoResult<TierReport> {
        let config = self.config().await;
        let now = now_millis();
        let observations = self.store.tier_inputs(project).await?;

        let mut report = TierReport {
            by_tier: MemoryTier::ALL.iter().map(|t| (*t, 0)).collect(),
            ..Default::default()
        };
        for observation in &observations {
            let classification = classify_memory_tier(observation, &config.memory_tiers, now);
            *report.by_tier.entry(classification.tier).or_default() += 1;
            if classification.tier != observation.memory_tier {
                report.updates.push(TierUpdate {
                    id: observation.id,
                    from: observation.memory_tier,
                    to: classification.tier,
                });
            }
        }

        if !dry_run {
            report.changed = self.store.update_memory_tiers(&report.updates).await?;
        }
        debug!(project, updates = report.updates.len(), changed = report.changed, "Reclassified memory tiers");
        Ok(report)
    }
}

/// Highest type weight first, newest first within a weight.
fn sort_by_priority(observations: &mut [Observation], priority: &PriorityConfig) {
    observations.sort_by(|a, b| {
        priority
            .weight(b.obs_type)
            .total_cmp(&priority.weight(a.obs_type))
            .then(b.created_at_epoch.cmp(&a.created_at_epoch))
    });
}

fn sort_candidates(candidates: &mut [SupersessionCandidate]) {
    candidates.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then(b.confidence.total_cmp(&a.confidence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{VectorDocument, VectorResults};
    use crate::store::BatchWrite;
    use crate::types::ParsedObservation;
    use crate::utils::time::MS_PER_DAY;
    use crate::MnemoError;
    use async_trait::async_trait;

    async fn store_with_session(content: &str) -> RecordStore {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_or_fetch_session(content, "alpha", None).await.unwrap();
        store
    }

    fn decision(title: &str, concepts: &[&str]) -> ParsedObservation {
        ParsedObservation::new(ObservationType::Decision, title).with_concepts(concepts.iter().copied())
    }

    async fn write(store: &RecordStore, session: &str, observation: ParsedObservation, at: i64) -> i64 {
        store
            .store_batch(BatchWrite::new(session, "alpha").observation(observation).at(at))
            .await
            .unwrap()
            .observation_ids[0]
    }

    #[tokio::test]
    async fn test_detect_and_apply_batch() {
        let store = store_with_session("s1").await;
        let now = now_millis();
        let old = write(&store, "s1", decision("Use REST for the API", &["api", "transport"]), now - 2 * MS_PER_DAY).await;
        let new = write(&store, "s1", decision("Use gRPC for the API", &["api", "transport"]), now - MS_PER_DAY).await;
        let unrelated = write(&store, "s1", decision("Pick a logo", &["branding"]), now).await;

        let detector = SupersessionDetector::new(store.clone(), EngineConfig::default());
        let deep = EngineConfig::default().cycles.deep;
        let result = detector.detect_batch("alpha", &deep).await.unwrap();

        assert_eq!(result.processed_count, 3);
        assert_eq!(result.candidates.len(), 1);
        let candidate = &result.candidates[0];
        assert_eq!((candidate.older_id, candidate.newer_id), (old, new));
        assert_eq!(candidate.priority_tier, PriorityTier::Critical);
        assert!(candidate.reason.contains("matching topics/concepts"));

        let preview = detector.apply(&result.candidates, true).await.unwrap();
        assert_eq!(preview.applied, 1);
        assert!(store.get_observation(old).await.unwrap().unwrap().superseded_by.is_none());

        let outcome = detector.apply(&result.candidates, false).await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.by_priority_tier[&PriorityTier::Critical], 1);
        assert_eq!(store.get_observation(old).await.unwrap().unwrap().superseded_by, Some(new));
        assert!(store.get_observation(unrelated).await.unwrap().unwrap().superseded_by.is_none());

        // already superseded observations are not candidates again
        let again = detector.detect_batch("alpha", &deep).await.unwrap();
        assert!(again.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_gates_reject_pairs() {
        let store = store_with_session("s1").await;
        let now = now_millis();
        write(&store, "s1", decision("Use REST", &["api"]), now - MS_PER_DAY).await;
        write(
            &store,
            "s1",
            ParsedObservation::new(ObservationType::Bugfix, "Fix REST").with_concepts(["api"]),
            now,
        )
        .await;
        // same concepts but beyond the 720 hour gap
        write(&store, "s1", decision("Use SOAP", &["soap"]), now - 60 * MS_PER_DAY).await;
        write(&store, "s1", decision("Drop SOAP", &["soap"]), now).await;

        let detector = SupersessionDetector::new(store, EngineConfig::default());
        let manual = EngineConfig::default().cycles.manual;
        let result = detector.detect_batch("alpha", &manual).await.unwrap();
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        // weights chosen so the arithmetic is exact: identical concepts,
        // same type, same instant, no files gives confidence 1.0
        let store = store_with_session("s1").await;
        let now = now_millis();
        let fix = |title: &str| ParsedObservation::new(ObservationType::Bugfix, title).with_concepts(["x"]);
        write(&store, "s1", fix("a"), now).await;
        write(&store, "s1", fix("b"), now).await;
        let detector = SupersessionDetector::new(store, EngineConfig::default()).with_weights(ConfidenceWeights {
            semantic: 0.5,
            topic: 0.25,
            file: 0.0,
            type_match: 0.125,
            recency: 0.125,
        });

        // bugfix priority 1.0, boost 0.5: threshold = base - 0.5
        let at_threshold = CycleConfig {
            supersession_threshold: 1.5,
            priority_boost_factor: 0.5,
            ..EngineConfig::default().cycles.manual
        };
        assert_eq!(detector.detect_batch("alpha", &at_threshold).await.unwrap().candidates.len(), 1);

        let above = CycleConfig {
            supersession_threshold: 1.5625,
            ..at_threshold
        };
        assert!(detector.detect_batch("alpha", &above).await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn test_detect_for_session() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_or_fetch_session("s1", "alpha", None).await.unwrap();
        store.create_or_fetch_session("s2", "alpha", None).await.unwrap();
        let now = now_millis();
        let old = write(&store, "s1", decision("Cache with Redis", &["cache"]), now - MS_PER_DAY).await;
        let new = write(&store, "s2", decision("Cache in process", &["cache"]), now).await;

        let detector = SupersessionDetector::new(store, EngineConfig::default());
        let result = detector.detect_for_session("s2", 7, 50).await.unwrap();
        assert_eq!(result.processed_count, 1);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!((result.candidates[0].older_id, result.candidates[0].newer_id), (old, new));

        let empty = detector.detect_for_session("unknown", 7, 50).await.unwrap();
        assert_eq!(empty.processed_count, 0);
    }

    struct FixedVector {
        hits: Vec<VectorHit>,
        fail: bool,
    }

    #[async_trait]
    impl VectorBackend for FixedVector {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn add(&self, _document: VectorDocument) -> MnemoResult<()> {
            Ok(())
        }

        async fn query(&self, _text: &str, _filter: &BackendFilter, _limit: usize) -> MnemoResult<VectorResults> {
            if self.fail {
                return Err(MnemoError::backend("fixed", "unreachable"));
            }
            Ok(VectorResults::usable(self.hits.clone()))
        }
    }

    #[tokio::test]
    async fn test_vector_similarity_and_fallback() {
        let store = store_with_session("s1").await;
        let now = now_millis();
        // no shared concepts, so text similarity would reject the pair
        let old = write(&store, "s1", decision("Store sessions in files", &["files"]), now - MS_PER_DAY).await;
        write(&store, "s1", decision("Store sessions in SQLite", &["sqlite"]), now).await;
        let deep = EngineConfig::default().cycles.deep;

        let close = SupersessionDetector::new(store.clone(), EngineConfig::default()).with_vector_backend(Arc::new(
            FixedVector {
                hits: vec![VectorHit { doc: crate::search::DocRef::observation(old), distance: 0.1 }],
                fail: false,
            },
        ));
        let result = close.detect_batch("alpha", &deep).await.unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert!((result.candidates[0].signals.semantic_similarity - 0.95).abs() < 1e-9);

        let broken = SupersessionDetector::new(store, EngineConfig::default())
            .with_vector_backend(Arc::new(FixedVector { hits: vec![], fail: true }));
        assert!(broken.detect_batch("alpha", &deep).await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn test_deprecate_and_reclassify() {
        let store = store_with_session("s1").await;
        let now = now_millis();
        let old = write(&store, "s1", decision("v1", &["x"]), now - 2 * MS_PER_DAY).await;
        let new = write(&store, "s1", decision("v2", &["x"]), now).await;
        store.apply_supersession(old, new).await.unwrap();

        let detector = SupersessionDetector::new(store.clone(), EngineConfig::default());
        // superseded just now, inside the grace period
        assert_eq!(detector.deprecate("alpha", 30, false).await.unwrap(), 0);

        let preview = detector.reclassify_tiers("alpha", true).await.unwrap();
        assert_eq!(preview.updates.len(), 1);
        assert_eq!(preview.updates[0].to, MemoryTier::Archive);
        assert_eq!(preview.changed, 0);
        assert_eq!(store.get_observation(old).await.unwrap().unwrap().memory_tier, MemoryTier::Working);

        let report = detector.reclassify_tiers("alpha", false).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.by_tier[&MemoryTier::Archive], 1);
        assert_eq!(report.by_tier[&MemoryTier::Working], 1);
        assert_eq!(store.get_observation(old).await.unwrap().unwrap().memory_tier, MemoryTier::Archive);
    }
}
