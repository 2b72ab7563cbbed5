//! Memory-tier classification

use serde::{Deserialize, Serialize};

use crate::config::MemoryTierConfig;
use crate::types::{MemoryTier, Observation};
use crate::utils::time::days_since;

/// Tier decision for one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierClassification {
    pub observation_id: i64,
    pub tier: MemoryTier,
    pub reason: String,
}

/// Classify an observation at `now_ms`.
///
/// Rules apply in order: heavily referenced observations are core;
/// deprecated or long-unaccessed ones are ephemeral; superseded or idle ones
/// are archive; everything else is working. An observation never accessed
/// counts its idle time from creation.
pub fn classify_memory_tier(observation: &Observation, config: &MemoryTierConfig, now_ms: i64) -> TierClassification {
    let idle_days = days_since(
        observation.last_accessed_at.unwrap_or(observation.created_at_epoch),
        now_ms,
    );
    let superseded = observation.superseded_by.is_some();

    let (tier, reason) = if observation.reference_count >= config.core_reference_threshold {
        (
            MemoryTier::Core,
            format!("Referenced {}+ times", observation.reference_count),
        )
    } else if observation.deprecated || idle_days > config.archive_to_ephemeral_days as f64 {
        let reason = if observation.deprecated {
            "Marked as deprecated".to_string()
        } else {
            format!("Not accessed for {} days", idle_days.floor() as i64)
        };
        (MemoryTier::Ephemeral, reason)
    } else if superseded || idle_days > config.working_to_archive_days as f64 {
        let reason = if superseded {
            "Superseded by newer observation".to_string()
        } else {
            format!("Idle for {} days", idle_days.floor() as i64)
        };
        (MemoryTier::Archive, reason)
    } else {
        (MemoryTier::Working, "Actively used".to_string())
    };

    TierClassification {
        observation_id: observation.id,
        tier,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObservationType;
    use crate::utils::time::MS_PER_DAY;

    const NOW: i64 = 1_000 * MS_PER_DAY;

    fn observation(age_days: i64) -> Observation {
        Observation {
            id: 1,
            memory_session_id: "mem".into(),
            project: "alpha".into(),
            obs_type: ObservationType::Decision,
            title: Some("t".into()),
            subtitle: None,
            narrative: None,
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            prompt_number: None,
            discovery_tokens: 0,
            created_at: String::new(),
            created_at_epoch: NOW - age_days * MS_PER_DAY,
            superseded_by: None,
            superseded_at: None,
            deprecated: false,
            deprecated_at: None,
            deprecation_reason: None,
            is_stale: false,
            access_count: 0,
            last_accessed_at: None,
            reference_count: 0,
            memory_tier: MemoryTier::Working,
            importance: 5,
        }
    }

    #[test]
    fn test_tier_rules_in_order() {
        let config = MemoryTierConfig::default();

        assert_eq!(classify_memory_tier(&observation(1), &config, NOW).tier, MemoryTier::Working);

        let idle = observation(45);
        let result = classify_memory_tier(&idle, &config, NOW);
        assert_eq!(result.tier, MemoryTier::Archive);
        assert_eq!(result.reason, "Idle for 45 days");

        let mut recently_read = observation(45);
        recently_read.last_accessed_at = Some(NOW - MS_PER_DAY);
        assert_eq!(classify_memory_tier(&recently_read, &config, NOW).tier, MemoryTier::Working);

        let mut superseded = observation(1);
        superseded.superseded_by = Some(2);
        assert_eq!(classify_memory_tier(&superseded, &config, NOW).tier, MemoryTier::Archive);

        assert_eq!(classify_memory_tier(&observation(200), &config, NOW).tier, MemoryTier::Ephemeral);

        let mut deprecated = observation(1);
        deprecated.deprecated = true;
        let result = classify_memory_tier(&deprecated, &config, NOW);
        assert_eq!(result.tier, MemoryTier::Ephemeral);
        assert_eq!(result.reason, "Marked as deprecated");

        // core wins over every other rule
        let mut core = observation(400);
        core.deprecated = true;
        core.reference_count = 5;
        assert_eq!(classify_memory_tier(&core, &config, NOW).tier, MemoryTier::Core);
    }
}
