//! Search backend interfaces.
//!
//! A vector backend ranks documents by embedding distance, a keyword backend
//! by text relevance. Both may be remote and unavailable; callers treat every
//! error as a reason to degrade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ObservationType;
use crate::MnemoResult;

/// Kind of record a search hit points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Observation,
    Summary,
    Prompt,
}

impl DocKind {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Summary => "summary",
            Self::Prompt => "prompt",
        }
    }
}

/// Reference to a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocRef {
    pub kind: DocKind,
    pub id: i64,
}

impl DocRef {
    pub fn observation(id: i64) -> Self {
        Self { kind: DocKind::Observation, id }
    }

    pub fn summary(id: i64) -> Self {
        Self { kind: DocKind::Summary, id }
    }

    pub fn prompt(id: i64) -> Self {
        Self { kind: DocKind::Prompt, id }
    }
}

/// Filters a backend can apply itself. Date ranges are not among them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendFilter {
    pub project: Option<String>,
    #[serde(default)]
    pub types: Vec<ObservationType>,
    /// Empty means every kind.
    #[serde(default)]
    pub kinds: Vec<DocKind>,
}

impl BackendFilter {
    pub fn accepts(&self, kind: DocKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Document handed to a vector backend for indexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    #[serde(flatten)]
    pub doc: DocRef,
    pub project: String,
    pub obs_type: Option<ObservationType>,
    pub text: String,
    pub created_at_epoch: i64,
}

/// One vector hit; lower distance is closer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    #[serde(flatten)]
    pub doc: DocRef,
    pub distance: f64,
}

/// Ranked vector hits, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorResults {
    pub hits: Vec<VectorHit>,
    /// False when the backend answered but could not search properly,
    /// e.g. its collection is still being built.
    pub usable: bool,
}

impl VectorResults {
    pub fn usable(hits: Vec<VectorHit>) -> Self {
        Self { hits, usable: true }
    }

    pub fn unusable() -> Self {
        Self {
            hits: Vec::new(),
            usable: false,
        }
    }
}

/// One keyword hit; higher score is more relevant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeywordHit {
    #[serde(flatten)]
    pub doc: DocRef,
    pub score: f64,
}

/// Embedding similarity search
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name used in logs and errors
    fn name(&self) -> &str;

    /// Index a document.
    async fn add(&self, document: VectorDocument) -> MnemoResult<()>;

    /// Closest documents to `text`, best first.
    async fn query(&self, text: &str, filter: &BackendFilter, limit: usize) -> MnemoResult<VectorResults>;
}

/// Text relevance search
#[async_trait]
pub trait KeywordBackend: Send + Sync {
    /// Backend name used in logs and errors
    fn name(&self) -> &str;

    /// Most relevant documents for `text`, best first.
    async fn query(&self, text: &str, filter: &BackendFilter, limit: usize) -> MnemoResult<Vec<KeywordHit>>;
}
