//! Engine Configuration
//!
//! Defines configuration options for the memory engine. Every group carries
//! `#[serde(default)]` so a partial TOML table fills in from the defaults.

use serde::{Deserialize, Serialize};

use crate::types::{CycleType, ObservationType, PriorityTier};

/// Engine configuration options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pair gates for supersession detection
    pub supersession: SupersessionConfig,

    /// Type-based priority weighting
    pub priority: PriorityConfig,

    /// Memory-tier classification
    pub memory_tiers: MemoryTierConfig,

    /// Idle detection for the scheduler
    pub idle: IdleConfig,

    /// Per cycle-type settings
    pub cycles: CycleConfigs,

    /// Hybrid retrieval
    pub search: SearchConfig,

    /// Concept drift analysis
    pub drift: DriftConfig,
}

/// Supersession pair gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupersessionConfig {
    /// Minimum semantic similarity for a pair to be scored (default: 0.7)
    pub min_semantic_similarity: f64,

    /// Base confidence threshold when a cycle does not override it (default: 0.6)
    pub min_confidence: f64,

    /// Only compare observations of the same type (default: true)
    pub same_type_required: bool,

    /// Only compare observations of the same project (default: true)
    pub same_project_required: bool,

    /// Maximum creation-time gap in hours (default: 720 = 30 days)
    pub max_age_difference_hours: u32,
}

impl Default for SupersessionConfig {
    fn default() -> Self {
        Self {
            min_semantic_similarity: 0.7,
            min_confidence: 0.6,
            same_type_required: true,
            same_project_required: true,
            max_age_difference_hours: 720,
        }
    }
}

/// Priority weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub enabled: bool,

    /// Threshold reduction per unit of priority (default: 0.1)
    pub confidence_boost_factor: f64,

    /// Process high-priority observations first (default: true)
    pub priority_ordering: bool,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_boost_factor: 0.1,
            priority_ordering: true,
        }
    }
}

impl PriorityConfig {
    /// Weight of an observation type in [0, 1].
    pub fn weight(&self, obs_type: ObservationType) -> f64 {
        match obs_type {
            ObservationType::Bugfix => 1.0,
            ObservationType::Decision => 0.9,
            ObservationType::Feature => 0.7,
            ObservationType::Refactor => 0.6,
            ObservationType::Change => 0.5,
            ObservationType::Discovery => 0.4,
        }
    }

    /// Tier for a priority weight.
    pub fn tier(weight: f64) -> PriorityTier {
        if weight >= 0.9 {
            PriorityTier::Critical
        } else if weight >= 0.7 {
            PriorityTier::High
        } else if weight >= 0.5 {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }
}

/// Memory-tier classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    pub enabled: bool,

    /// Days without access before working becomes archive (default: 30)
    pub working_to_archive_days: u32,

    /// Days without access before archive becomes ephemeral (default: 180)
    pub archive_to_ephemeral_days: u32,

    /// Reference count at which an observation is core (default: 5)
    pub core_reference_threshold: i64,

    /// Reclassify during sleep cycles (default: true)
    pub reclassify_on_sleep_cycle: bool,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            working_to_archive_days: 30,
            archive_to_ephemeral_days: 180,
            core_reference_threshold: 5,
            reclassify_on_sleep_cycle: true,
        }
    }
}

/// Idle detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub enabled: bool,

    /// Idle time before a light cycle (default: 300000 = 5 minutes)
    pub light_sleep_after_ms: u64,

    /// Idle time before a deep cycle (default: 1800000 = 30 minutes)
    pub deep_sleep_after_ms: u64,

    /// Tick interval (default: 60000 = 1 minute)
    pub check_interval_ms: u64,

    /// Skip idle cycles while any session is active (default: true)
    pub require_no_active_sessions: bool,

    /// Minimum gap between two light cycles (default: 300000)
    pub min_light_interval_ms: u64,

    /// Minimum gap between two deep cycles (default: 1800000)
    pub min_deep_interval_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            light_sleep_after_ms: 5 * 60 * 1000,
            deep_sleep_after_ms: 30 * 60 * 1000,
            check_interval_ms: 60 * 1000,
            require_no_active_sessions: true,
            min_light_interval_ms: 5 * 60 * 1000,
            min_deep_interval_ms: 30 * 60 * 1000,
        }
    }
}

/// Settings for one cycle type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Base confidence threshold
    pub supersession_threshold: f64,

    /// Only observations newer than this are candidates
    pub supersession_lookback_days: u32,

    pub deprecation_enabled: bool,

    /// Grace period after supersession before deprecation
    pub deprecate_after_days: u32,

    /// Candidate cap per project
    pub max_observations_per_cycle: usize,

    /// Overrides `PriorityConfig::confidence_boost_factor` for this cycle
    pub priority_boost_factor: f64,

    pub reclassify_memory_tiers: bool,
}

/// Settings for every cycle type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfigs {
    pub micro: CycleConfig,
    pub light: CycleConfig,
    pub deep: CycleConfig,
    pub manual: CycleConfig,
}

impl Default for CycleConfigs {
    fn default() -> Self {
        Self {
            micro: CycleConfig {
                supersession_threshold: 0.7,
                supersession_lookback_days: 7,
                deprecation_enabled: false,
                deprecate_after_days: 0,
                max_observations_per_cycle: 50,
                priority_boost_factor: 0.1,
                reclassify_memory_tiers: false,
            },
            light: CycleConfig {
                supersession_threshold: 0.8,
                supersession_lookback_days: 30,
                deprecation_enabled: false,
                deprecate_after_days: 0,
                max_observations_per_cycle: 100,
                priority_boost_factor: 0.05,
                reclassify_memory_tiers: true,
            },
            deep: CycleConfig {
                supersession_threshold: 0.7,
                supersession_lookback_days: 90,
                deprecation_enabled: true,
                deprecate_after_days: 180,
                max_observations_per_cycle: 500,
                priority_boost_factor: 0.1,
                reclassify_memory_tiers: true,
            },
            manual: CycleConfig {
                supersession_threshold: 0.6,
                supersession_lookback_days: 365,
                deprecation_enabled: true,
                deprecate_after_days: 90,
                max_observations_per_cycle: 1000,
                priority_boost_factor: 0.15,
                reclassify_memory_tiers: true,
            },
        }
    }
}

impl CycleConfigs {
    pub fn for_type(&self, cycle_type: CycleType) -> &CycleConfig {
        match cycle_type {
            CycleType::Micro => &self.micro,
            CycleType::Light => &self.light,
            CycleType::Deep => &self.deep,
            CycleType::Manual => &self.manual,
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Bound on each backend call (default: 5000)
    pub backend_timeout_ms: u64,

    pub vector_weight: f64,
    pub keyword_weight: f64,

    /// Limit when the query carries none (default: 20)
    pub default_limit: usize,

    /// Hits requested from each backend before fusion and the limit cut (default: 100)
    pub candidate_pool: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 5000,
            vector_weight: 0.6,
            keyword_weight: 0.4,
            default_limit: 20,
            candidate_pool: 100,
        }
    }
}

/// Drift analysis thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Observations younger than this count as recent (default: 30)
    pub recent_window_days: u32,

    /// Stale share above which a cluster is high-stale (default: 0.3)
    pub high_stale_ratio: f64,

    /// Unaccessed share of old observations above which a cluster is likely outdated (default: 0.5)
    pub unaccessed_old_ratio: f64,

    /// Minimum observations per concept (default: 2)
    pub min_cluster_size: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            recent_window_days: 30,
            high_stale_ratio: 0.3,
            unaccessed_old_ratio: 0.5,
            min_cluster_size: 2,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set supersession gates
    pub fn with_supersession(mut self, supersession: SupersessionConfig) -> Self {
        self.supersession = supersession;
        self
    }

    /// Set priority configuration
    pub fn with_priority(mut self, priority: PriorityConfig) -> Self {
        self.priority = priority;
        self
    }

    /// Set memory-tier configuration
    pub fn with_memory_tiers(mut self, memory_tiers: MemoryTierConfig) -> Self {
        self.memory_tiers = memory_tiers;
        self
    }

    /// Set idle detection configuration
    pub fn with_idle(mut self, idle: IdleConfig) -> Self {
        self.idle = idle;
        self
    }

    /// Set per-cycle configuration
    pub fn with_cycles(mut self, cycles: CycleConfigs) -> Self {
        self.cycles = cycles;
        self
    }

    /// Set retrieval configuration
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    /// Set drift configuration
    pub fn with_drift(mut self, drift: DriftConfig) -> Self {
        self.drift = drift;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_unit("supersession.min_semantic_similarity", self.supersession.min_semantic_similarity)?;
        check_unit("supersession.min_confidence", self.supersession.min_confidence)?;
        check_unit("priority.confidence_boost_factor", self.priority.confidence_boost_factor)?;
        check_unit("search.vector_weight", self.search.vector_weight)?;
        check_unit("search.keyword_weight", self.search.keyword_weight)?;
        check_unit("drift.high_stale_ratio", self.drift.high_stale_ratio)?;
        check_unit("drift.unaccessed_old_ratio", self.drift.unaccessed_old_ratio)?;

        for (name, cycle) in [
            ("micro", &self.cycles.micro),
            ("light", &self.cycles.light),
            ("deep", &self.cycles.deep),
            ("manual", &self.cycles.manual),
        ] {
            check_unit(&format!("cycles.{name}.supersession_threshold"), cycle.supersession_threshold)?;
            if cycle.max_observations_per_cycle == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: format!("cycles.{name}.max_observations_per_cycle"),
                    message: "must be greater than 0".into(),
                });
            }
        }

        if self.idle.check_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "idle.check_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.idle.deep_sleep_after_ms < self.idle.light_sleep_after_ms {
            return Err(ConfigValidationError::InvalidValue {
                field: "idle.deep_sleep_after_ms".into(),
                message: "must not be shorter than idle.light_sleep_after_ms".into(),
            });
        }

        if self.search.backend_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "search.backend_timeout_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.search.candidate_pool == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "search.candidate_pool".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.memory_tiers.archive_to_ephemeral_days < self.memory_tiers.working_to_archive_days {
            return Err(ConfigValidationError::InvalidValue {
                field: "memory_tiers.archive_to_ephemeral_days".into(),
                message: "must not be shorter than memory_tiers.working_to_archive_days".into(),
            });
        }

        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: "must be between 0 and 1".into(),
        });
    }
    Ok(())
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.idle.light_sleep_after_ms, 300_000);
        assert_eq!(config.idle.deep_sleep_after_ms, 1_800_000);
        assert_eq!(config.idle.check_interval_ms, 60_000);
        assert!(config.idle.require_no_active_sessions);
        assert_eq!(config.cycles.deep.deprecate_after_days, 180);
        assert_eq!(config.cycles.for_type(CycleType::Micro).max_observations_per_cycle, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_priority_weights_and_tiers() {
        let priority = PriorityConfig::default();
        assert_eq!(PriorityConfig::tier(priority.weight(ObservationType::Bugfix)), PriorityTier::Critical);
        assert_eq!(PriorityConfig::tier(priority.weight(ObservationType::Decision)), PriorityTier::Critical);
        assert_eq!(PriorityConfig::tier(priority.weight(ObservationType::Feature)), PriorityTier::High);
        assert_eq!(PriorityConfig::tier(priority.weight(ObservationType::Change)), PriorityTier::Medium);
        assert_eq!(PriorityConfig::tier(priority.weight(ObservationType::Discovery)), PriorityTier::Low);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_search(SearchConfig {
                backend_timeout_ms: 250,
                ..Default::default()
            })
            .with_drift(DriftConfig {
                recent_window_days: 14,
                ..Default::default()
            });

        assert_eq!(config.search.backend_timeout_ms, 250);
        assert_eq!(config.search.default_limit, 20);
        assert_eq!(config.drift.recent_window_days, 14);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.search.vector_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search.vector_weight"));

        let mut config = EngineConfig::default();
        config.idle.deep_sleep_after_ms = 1000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cycles.light.max_observations_per_cycle = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.search.candidate_pool = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search.candidate_pool"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"idle":{"check_interval_ms":1000},"search":{"default_limit":5}}"#).unwrap();
        assert_eq!(config.idle.check_interval_ms, 1000);
        assert_eq!(config.idle.light_sleep_after_ms, 300_000);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.cycles.light.supersession_threshold, 0.8);
    }
}
