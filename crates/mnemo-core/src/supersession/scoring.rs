//! Supersession scoring.
//!
//! Pure functions from a pair of observations to similarity signals and a
//! confidence score. Nothing here touches the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::Observation;

/// Floor for the priority-adjusted confidence threshold.
pub const MIN_EFFECTIVE_THRESHOLD: f64 = 0.3;

/// Signals measured for one (older, newer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairSignals {
    /// Semantic similarity in [0, 1].
    pub semantic_similarity: f64,
    /// The two observations share at least one concept.
    pub topic_match: bool,
    /// Jaccard overlap of modified files in [0, 1].
    pub file_overlap: f64,
    pub type_match: bool,
    /// Hours between the two creation times.
    pub age_difference_hours: f64,
}

/// Coefficients of the confidence sum. They add up to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub semantic: f64,
    pub topic: f64,
    pub file: f64,
    pub type_match: f64,
    pub recency: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.45,
            topic: 0.2,
            file: 0.15,
            type_match: 0.1,
            recency: 0.1,
        }
    }
}

/// Linear recency score: 1.0 for simultaneous observations, 0.0 at the
/// maximum allowed age difference.
pub fn recency_score(age_difference_hours: f64, max_age_difference_hours: f64) -> f64 {
    if max_age_difference_hours <= 0.0 {
        return if age_difference_hours <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - age_difference_hours / max_age_difference_hours).clamp(0.0, 1.0)
}

/// Confidence in [0, 1] that the newer observation supersedes the older.
pub fn confidence(signals: &PairSignals, weights: &ConfidenceWeights, max_age_difference_hours: f64) -> f64 {
    let indicator = |b: bool| if b { 1.0 } else { 0.0 };
    let score = weights.semantic * signals.semantic_similarity.clamp(0.0, 1.0)
        + weights.topic * indicator(signals.topic_match)
        + weights.file * signals.file_overlap.clamp(0.0, 1.0)
        + weights.type_match * indicator(signals.type_match)
        + weights.recency * recency_score(signals.age_difference_hours, max_age_difference_hours);
    score.clamp(0.0, 1.0)
}

/// `max(0.3, base - priority * boost)`
pub fn effective_threshold(base: f64, priority: f64, boost_factor: f64) -> f64 {
    (base - priority * boost_factor).max(MIN_EFFECTIVE_THRESHOLD)
}

/// Similarity from a vector-store distance. Distance 0 is identical, 2 or
/// more is unrelated.
pub fn distance_to_similarity(distance: f64) -> f64 {
    (1.0 - distance / 2.0).max(0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Set similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Jaccard index of two sets, 0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn lowercase_set(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

/// Case-insensitive Jaccard overlap of concept lists.
pub fn concept_similarity(older: &[String], newer: &[String]) -> f64 {
    jaccard(&lowercase_set(older), &lowercase_set(newer))
}

/// Whether the lists share any concept, ignoring case.
pub fn topic_match(older: &[String], newer: &[String]) -> bool {
    if older.is_empty() || newer.is_empty() {
        return false;
    }
    let older = lowercase_set(older);
    newer.iter().any(|c| older.contains(&c.to_lowercase()))
}

/// Strip a leading `./` and lowercase.
pub fn normalize_path(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_lowercase()
}

/// Jaccard overlap of normalized file paths, 0 if either side is empty.
pub fn file_overlap(older: &[String], newer: &[String]) -> f64 {
    if older.is_empty() || newer.is_empty() {
        return 0.0;
    }
    let older: HashSet<String> = older.iter().map(|p| normalize_path(p)).collect();
    let newer: HashSet<String> = newer.iter().map(|p| normalize_path(p)).collect();
    jaccard(&older, &newer)
}

fn significant_words(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .map(str::to_string)
        .collect()
}

/// Share of significant title words (longer than three characters) the two
/// titles have in common, relative to the larger set.
pub fn title_similarity(older: Option<&str>, newer: Option<&str>) -> f64 {
    let (Some(older), Some(newer)) = (older, newer) else {
        return 0.0;
    };
    let older = significant_words(older);
    let newer = significant_words(newer);
    if older.is_empty() || newer.is_empty() {
        return 0.0;
    }
    let overlap = older.intersection(&newer).count();
    overlap as f64 / older.len().max(newer.len()) as f64
}

/// Similarity without a vector backend: concept overlap when either side
/// has concepts, otherwise title word overlap.
pub fn text_similarity(older: &Observation, newer: &Observation) -> f64 {
    if older.concepts.is_empty() && newer.concepts.is_empty() {
        title_similarity(older.title.as_deref(), newer.title.as_deref())
    } else {
        concept_similarity(&older.concepts, &newer.concepts)
    }
}

/// Hours from the older creation time to the newer.
pub fn age_difference_hours(older: &Observation, newer: &Observation) -> f64 {
    (newer.created_at_epoch - older.created_at_epoch) as f64 / (60.0 * 60.0 * 1000.0)
}

/// Human-readable explanation of a candidate.
pub fn describe(signals: &PairSignals, newer_type: &str, priority_tier: &str) -> String {
    let mut reasons = Vec::new();
    if signals.semantic_similarity >= 0.8 {
        reasons.push("high semantic similarity".to_string());
    } else if signals.semantic_similarity >= 0.7 {
        reasons.push("moderate semantic similarity".to_string());
    }
    if signals.topic_match {
        reasons.push("matching topics/concepts".to_string());
    }
    if signals.file_overlap >= 0.5 {
        reasons.push("overlapping files".to_string());
    }
    if signals.type_match {
        reasons.push(format!("same type ({newer_type})"));
    }
    if priority_tier == "critical" || priority_tier == "high" {
        reasons.push(format!("{priority_tier} priority"));
    }
    reasons.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_confidence_bounds() {
        let weights = ConfidenceWeights::default();
        let total = weights.semantic + weights.topic + weights.file + weights.type_match + weights.recency;
        assert!((total - 1.0).abs() < 1e-9);

        let perfect = PairSignals {
            semantic_similarity: 1.0,
            topic_match: true,
            file_overlap: 1.0,
            type_match: true,
            age_difference_hours: 0.0,
        };
        assert!((confidence(&perfect, &weights, 720.0) - 1.0).abs() < 1e-9);

        let nothing = PairSignals {
            semantic_similarity: 0.0,
            topic_match: false,
            file_overlap: 0.0,
            type_match: false,
            age_difference_hours: 720.0,
        };
        assert_eq!(confidence(&nothing, &weights, 720.0), 0.0);
    }

    #[test]
    fn test_confidence_is_monotonic_in_similarity() {
        let weights = ConfidenceWeights::default();
        let low = PairSignals {
            semantic_similarity: 0.7,
            topic_match: true,
            file_overlap: 0.0,
            type_match: true,
            age_difference_hours: 24.0,
        };
        let high = PairSignals { semantic_similarity: 0.9, ..low };
        assert!(confidence(&high, &weights, 720.0) > confidence(&low, &weights, 720.0));
    }

    #[test]
    fn test_effective_threshold() {
        assert!((effective_threshold(0.7, 1.0, 0.1) - 0.6).abs() < 1e-9);
        assert!((effective_threshold(0.8, 0.4, 0.05) - 0.78).abs() < 1e-9);
        assert_eq!(effective_threshold(0.4, 1.0, 0.5), MIN_EFFECTIVE_THRESHOLD);
    }

    #[test]
    fn test_recency_score() {
        assert_eq!(recency_score(0.0, 720.0), 1.0);
        assert!((recency_score(360.0, 720.0) - 0.5).abs() < 1e-9);
        assert_eq!(recency_score(1000.0, 720.0), 0.0);
        assert_eq!(recency_score(0.0, 0.0), 1.0);
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!((distance_to_similarity(0.5) - 0.75).abs() < 1e-9);
        assert_eq!(distance_to_similarity(2.0), 0.0);
        assert_eq!(distance_to_similarity(3.5), 0.0);
    }

    #[test]
    fn test_set_similarities() {
        assert!((concept_similarity(&strings(&["Auth", "jwt"]), &strings(&["auth", "oauth"])) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(concept_similarity(&[], &[]), 0.0);

        assert!(topic_match(&strings(&["Auth"]), &strings(&["AUTH", "db"])));
        assert!(!topic_match(&strings(&["auth"]), &[]));

        assert_eq!(normalize_path("./Src/Main.rs"), "src/main.rs");
        assert_eq!(file_overlap(&strings(&["./src/a.rs", "src/b.rs"]), &strings(&["src/A.rs"])), 0.5);
        assert_eq!(file_overlap(&strings(&["src/a.rs"]), &[]), 0.0);
    }

    #[test]
    fn test_title_similarity() {
        // "use" and "for" are too short to count
        let score = title_similarity(Some("Use SQLite for session storage"), Some("Use Postgres for session storage"));
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(title_similarity(None, Some("anything here")), 0.0);
        assert_eq!(title_similarity(Some("a b c"), Some("a b c")), 0.0);
    }

    #[test]
    fn test_describe() {
        let signals = PairSignals {
            semantic_similarity: 0.85,
            topic_match: true,
            file_overlap: 0.0,
            type_match: true,
            age_difference_hours: 1.0,
        };
        assert_eq!(
            describe(&signals, "decision", "critical"),
            "high semantic similarity, matching topics/concepts, same type (decision), critical priority"
        );
    }
}
