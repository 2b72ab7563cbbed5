//! Record Type Definitions
//!
//! Sessions, observations, summaries and sleep-cycle rows as they are stored
//! and handed to callers.

use serde::{Deserialize, Serialize};

use crate::utils::time::MS_PER_DAY;

/// Observation type tag (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Discovery,
    Bugfix,
    Feature,
    Refactor,
    Change,
    Decision,
}

impl ObservationType {
    pub const ALL: [ObservationType; 6] = [
        Self::Discovery,
        Self::Bugfix,
        Self::Feature,
        Self::Refactor,
        Self::Change,
        Self::Decision,
    ];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "bugfix" => Some(Self::Bugfix),
            "feature" => Some(Self::Feature),
            "refactor" => Some(Self::Refactor),
            "change" => Some(Self::Change),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Bugfix => "bugfix",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
            Self::Change => "change",
            Self::Decision => "decision",
        }
    }
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retention tier of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Core,
    Working,
    Archive,
    Ephemeral,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] = [Self::Core, Self::Working, Self::Archive, Self::Ephemeral];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "core" => Some(Self::Core),
            "working" => Some(Self::Working),
            "archive" => Some(Self::Archive),
            "ephemeral" => Some(Self::Ephemeral),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Working => "working",
            Self::Archive => "archive",
            Self::Ephemeral => "ephemeral",
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::Working
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority tier of a supersession candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Critical,
    High,
    Medium,
    Low,
}

impl PriorityTier {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Consolidation pass kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    Light,
    Deep,
    Micro,
    Manual,
}

impl CycleType {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "deep" => Some(Self::Deep),
            "micro" => Some(Self::Micro),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Deep => "deep",
            Self::Micro => "micro",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CycleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sleep-cycle row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
    Failed,
}

impl CycleStatus {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One assistant conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub content_session_id: String,
    /// Equal to `content_session_id` until the real memory id is assigned.
    pub memory_session_id: String,
    pub project: String,
    pub user_prompt: Option<String>,
    pub prompt_counter: i64,
    pub status: SessionStatus,
    pub started_at: String,
    pub started_at_epoch: i64,
    pub completed_at: Option<String>,
    pub completed_at_epoch: Option<i64>,
}

impl Session {
    /// Whether the memory session id has moved off its placeholder.
    pub fn has_memory_session(&self) -> bool {
        self.memory_session_id != self.content_session_id
    }
}

/// Observation as produced by an upstream parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedObservation {
    #[serde(rename = "type")]
    pub obs_type: ObservationType,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

impl ParsedObservation {
    pub fn new(obs_type: ObservationType, title: impl Into<String>) -> Self {
        Self {
            obs_type,
            title: Some(title.into()),
            subtitle: None,
            narrative: None,
            facts: Vec::new(),
            concepts: Vec::new(),
            files_read: Vec::new(),
            files_modified: Vec::new(),
        }
    }

    pub fn with_narrative(mut self, narrative: impl Into<String>) -> Self {
        self.narrative = Some(narrative.into());
        self
    }

    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts = concepts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_files_modified<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_modified = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Summary as produced by an upstream parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSummary {
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

/// Stored observation with consolidation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub memory_session_id: String,
    pub project: String,
    #[serde(rename = "type")]
    pub obs_type: ObservationType,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub prompt_number: Option<i64>,
    pub discovery_tokens: i64,
    pub created_at: String,
    pub created_at_epoch: i64,
    pub superseded_by: Option<i64>,
    pub superseded_at: Option<i64>,
    pub deprecated: bool,
    pub deprecated_at: Option<i64>,
    pub deprecation_reason: Option<String>,
    pub is_stale: bool,
    pub access_count: i64,
    pub last_accessed_at: Option<i64>,
    pub reference_count: i64,
    pub memory_tier: MemoryTier,
    /// 1..=10, default 5
    pub importance: i64,
}

impl Observation {
    /// Title and narrative joined, used as the similarity query text.
    pub fn search_text(&self) -> String {
        [self.title.as_deref(), self.narrative.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Fractional days between creation and `now_ms`, never negative.
    pub fn age_days(&self, now_ms: i64) -> f64 {
        ((now_ms - self.created_at_epoch).max(0)) as f64 / MS_PER_DAY as f64
    }
}

/// Stored session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub memory_session_id: String,
    pub project: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub prompt_number: Option<i64>,
    pub discovery_tokens: i64,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// One user prompt within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPrompt {
    pub id: i64,
    pub content_session_id: String,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// One consolidation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepCycleRecord {
    pub id: i64,
    pub cycle_type: CycleType,
    pub status: CycleStatus,
    pub started_at_epoch: i64,
    pub completed_at_epoch: Option<i64>,
    pub duration_ms: Option<i64>,
    pub observations_processed: i64,
    pub supersessions_detected: i64,
    pub chains_consolidated: i64,
    pub memories_deprecated: i64,
    pub error_message: Option<String>,
}

/// Structured observation filter.
///
/// Date bounds are epoch milliseconds, inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationFilter {
    pub project: Option<String>,
    #[serde(default)]
    pub types: Vec<ObservationType>,
    pub concept: Option<String>,
    pub file: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    #[serde(default)]
    pub include_deprecated: bool,
    pub limit: Option<usize>,
}

impl ObservationFilter {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_forms() {
        for t in ObservationType::ALL {
            assert_eq!(ObservationType::from_str(t.as_str()), Some(t));
        }
        for t in MemoryTier::ALL {
            assert_eq!(MemoryTier::from_str(t.as_str()), Some(t));
        }
        assert_eq!(ObservationType::from_str("note"), None);
        assert_eq!(CycleType::from_str("deep"), Some(CycleType::Deep));
        assert_eq!(CycleStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_parsed_observation_json_shape() {
        let json = r#"{"type":"bugfix","title":"Fix race","narrative":null,"subtitle":null,"concepts":["locking"]}"#;
        let parsed: ParsedObservation = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.obs_type, ObservationType::Bugfix);
        assert_eq!(parsed.concepts, vec!["locking"]);
        assert!(parsed.facts.is_empty());
    }
}
