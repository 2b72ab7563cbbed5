//! Concept Drift Analysis
//!
//! Groups live observations by (project, concept) and flags clusters whose
//! memories look stale or abandoned. Read-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DriftConfig;
use crate::store::RecordStore;
use crate::types::{Observation, ObservationFilter};
use crate::utils::time::{days_ago, now_millis};
use crate::MnemoResult;

/// Why a cluster was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftSignal {
    /// Too many stale observations
    HighStale,
    /// Recent activity exists while most old observations were never read
    LikelyOutdated,
    /// Nothing alarming
    Monitor,
}

impl DriftSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighStale => "high-stale",
            Self::LikelyOutdated => "likely-outdated",
            Self::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for DriftSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counts for one (project, concept) cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptCluster {
    pub project: String,
    pub concept: String,
    pub total: usize,
    pub recent: usize,
    pub old: usize,
    pub unaccessed_old: usize,
    pub stale: usize,
    /// stale / total, 0..=1
    pub stale_ratio: f64,
    pub signal: DriftSignal,
}

impl ConceptCluster {
    pub fn stale_pct(&self) -> f64 {
        self.stale_ratio * 100.0
    }
}

/// Flagged clusters and a one-line summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub clusters: Vec<ConceptCluster>,
    /// Clusters large enough to be analyzed
    pub analyzed: usize,
    pub summary: String,
}

#[derive(Default)]
struct Tally {
    total: usize,
    recent: usize,
    old: usize,
    unaccessed_old: usize,
    stale: usize,
}

pub struct DriftAnalyzer {
    store: RecordStore,
    config: DriftConfig,
}

impl DriftAnalyzer {
    pub fn new(store: RecordStore, config: DriftConfig) -> Self {
        Self { store, config }
    }

    /// Analyze one project, or every project.
    pub async fn detect(&self, project: Option<&str>) -> MnemoResult<DriftReport> {
        self.detect_at(project, now_millis()).await
    }

    pub async fn detect_at(&self, project: Option<&str>, now_ms: i64) -> MnemoResult<DriftReport> {
        let filter = ObservationFilter {
            project: project.map(str::to_string),
            ..Default::default()
        };
        let observations = self.store.query_observations(&filter).await?;
        let report = analyze(&observations, &self.config, now_ms);
        debug!(
            project = project.unwrap_or("*"),
            observations = observations.len(),
            analyzed = report.analyzed,
            flagged = report.clusters.len(),
            "Drift analysis complete"
        );
        Ok(report)
    }
}

/// Cluster and classify. Deprecated observations are skipped.
pub fn analyze(observations: &[Observation], config: &DriftConfig, now_ms: i64) -> DriftReport {
    let recent_cutoff = days_ago(now_ms, config.recent_window_days);
    let mut tallies: BTreeMap<(String, String), Tally> = BTreeMap::new();

    for observation in observations.iter().filter(|o| !o.deprecated) {
        let mut concepts: Vec<String> = observation
            .concepts
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        concepts.sort();
        concepts.dedup();

        let is_recent = observation.created_at_epoch >= recent_cutoff;
        for concept in concepts {
            let tally = tallies.entry((observation.project.clone(), concept)).or_default();
            tally.total += 1;
            if is_recent {
                tally.recent += 1;
            } else {
                tally.old += 1;
                if observation.access_count == 0 {
                    tally.unaccessed_old += 1;
                }
            }
            if observation.is_stale {
                tally.stale += 1;
            }
        }
    }

    let mut analyzed = 0;
    let mut clusters: Vec<ConceptCluster> = tallies
        .into_iter()
        .filter(|(_, tally)| tally.total >= config.min_cluster_size.max(1))
        .map(|((project, concept), tally)| {
            analyzed += 1;
            let stale_ratio = tally.stale as f64 / tally.total as f64;
            let unaccessed_ratio = if tally.old > 0 {
                tally.unaccessed_old as f64 / tally.old as f64
            } else {
                0.0
            };
            let signal = if stale_ratio > config.high_stale_ratio {
                DriftSignal::HighStale
            } else if tally.recent > 0 && tally.old > 0 && unaccessed_ratio > config.unaccessed_old_ratio {
                DriftSignal::LikelyOutdated
            } else {
                DriftSignal::Monitor
            };
            ConceptCluster {
                project,
                concept,
                total: tally.total,
                recent: tally.recent,
                old: tally.old,
                unaccessed_old: tally.unaccessed_old,
                stale: tally.stale,
                stale_ratio,
                signal,
            }
        })
        .filter(|cluster| cluster.signal != DriftSignal::Monitor)
        .collect();

    clusters.sort_by(|a, b| {
        a.signal
            .cmp(&b.signal)
            .then(b.stale_ratio.total_cmp(&a.stale_ratio))
            .then(b.total.cmp(&a.total))
    });

    let summary = summarize(&clusters, analyzed);
    DriftReport {
        clusters,
        analyzed,
        summary,
    }
}

fn summarize(clusters: &[ConceptCluster], analyzed: usize) -> String {
    if clusters.is_empty() {
        return format!("No concept drift detected across {analyzed} concept clusters.");
    }
    let high_stale = clusters.iter().filter(|c| c.signal == DriftSignal::HighStale).count();
    let outdated = clusters.len() - high_stale;
    format!(
        "Drift detected in {} of {analyzed} concept clusters: {high_stale} high-stale, {outdated} likely-outdated.",
        clusters.len()
    )
}

/// Summary followed by a markdown table of the flagged clusters.
pub fn render_table(report: &DriftReport) -> String {
    let mut text = format!("{}\n", report.summary);
    if report.clusters.is_empty() {
        return text;
    }
    text.push_str("\n| Signal | Project | Concept | Stale% | Total | Recent | Old | Unaccessed |\n");
    text.push_str("|--------|---------|---------|--------|-------|--------|-----|------------|\n");
    for c in &report.clusters {
        text.push_str(&format!(
            "| {} | {} | {} | {:.1}% | {} | {} | {} | {} |\n",
            c.signal,
            c.project,
            c.concept,
            c.stale_pct(),
            c.total,
            c.recent,
            c.old,
            c.unaccessed_old
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BatchWrite;
    use crate::types::{ObservationType, ParsedObservation};
    use crate::utils::time::MS_PER_DAY;

    fn note(concepts: &[&str]) -> ParsedObservation {
        ParsedObservation::new(ObservationType::Discovery, "note").with_concepts(concepts.iter().copied())
    }

    async fn write(store: &RecordStore, concepts: &[&str], at: i64) -> i64 {
        store
            .store_batch(BatchWrite::new("s1", "alpha").observation(note(concepts)).at(at))
            .await
            .unwrap()
            .observation_ids[0]
    }

    #[tokio::test]
    async fn test_flags_high_stale_and_likely_outdated() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_or_fetch_session("s1", "alpha", None).await.unwrap();
        let now = now_millis();

        // auth: 1 of 2 stale
        let stale = write(&store, &["auth"], now - MS_PER_DAY).await;
        let fresh = write(&store, &["auth"], now).await;
        store.mark_stale(stale, fresh).await.unwrap();

        // cache: two old and never read, one recent
        write(&store, &["cache"], now - 90 * MS_PER_DAY).await;
        write(&store, &["cache"], now - 60 * MS_PER_DAY).await;
        write(&store, &["cache"], now).await;

        // logging: old but read
        let read = write(&store, &["logging"], now - 90 * MS_PER_DAY).await;
        write(&store, &["logging"], now).await;
        store.record_access(&[read]).await.unwrap();

        // singleton concept is ignored
        write(&store, &["solo"], now - 90 * MS_PER_DAY).await;

        let analyzer = DriftAnalyzer::new(store, DriftConfig::default());
        let report = analyzer.detect_at(Some("alpha"), now).await.unwrap();

        assert_eq!(report.analyzed, 3);
        assert_eq!(report.clusters.len(), 2);
        assert_eq!(report.clusters[0].concept, "auth");
        assert_eq!(report.clusters[0].signal, DriftSignal::HighStale);
        assert_eq!(report.clusters[1].concept, "cache");
        assert_eq!(report.clusters[1].signal, DriftSignal::LikelyOutdated);
        assert_eq!((report.clusters[1].recent, report.clusters[1].old), (1, 2));
        assert_eq!(report.clusters[1].unaccessed_old, 2);
        assert!(report.summary.contains("1 high-stale, 1 likely-outdated"));

        let table = render_table(&report);
        assert!(table.contains("| high-stale | alpha | auth | 50.0% | 2 | 2 | 0 | 0 |"));
        assert!(table.contains("| likely-outdated | alpha | cache | 0.0% | 3 | 1 | 2 | 2 |"));
    }

    #[tokio::test]
    async fn test_deprecated_observations_are_excluded() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_or_fetch_session("s1", "alpha", None).await.unwrap();
        let now = now_millis();
        let old = write(&store, &["db"], now - 90 * MS_PER_DAY).await;
        let new = write(&store, &["db"], now).await;
        store.apply_supersession(old, new).await.unwrap();
        store.deprecate_superseded("alpha", i64::MAX, "test", false).await.unwrap();

        let report = DriftAnalyzer::new(store, DriftConfig::default()).detect(None).await.unwrap();
        assert_eq!(report.analyzed, 0);
        assert!(report.clusters.is_empty());
        assert_eq!(render_table(&report), "No concept drift detected across 0 concept clusters.\n");
    }

    #[test]
    fn test_concepts_are_normalized_per_observation() {
        let now = 100 * MS_PER_DAY;
        let make = |id: i64, concepts: Vec<String>| Observation {
            id,
            memory_session_id: "m".into(),
            project: "alpha".into(),
            obs_type: ObservationType::Change,
            title: None,
            subtitle: None,
            narrative: None,
            facts: vec![],
            concepts,
            files_read: vec![],
            files_modified: vec![],
            prompt_number: None,
            discovery_tokens: 0,
            created_at: String::new(),
            created_at_epoch: now,
            superseded_by: None,
            superseded_at: None,
            deprecated: false,
            deprecated_at: None,
            deprecation_reason: None,
            is_stale: true,
            access_count: 0,
            last_accessed_at: None,
            reference_count: 0,
            memory_tier: Default::default(),
            importance: 5,
        };
        let observations = vec![
            make(1, vec!["API".into(), " api ".into()]),
            make(2, vec!["api".into()]),
        ];
        let report = analyze(&observations, &DriftConfig::default(), now);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].concept, "api");
        assert_eq!(report.clusters[0].total, 2);
    }
}
