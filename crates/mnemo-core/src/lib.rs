//! mnemo Core - Memory Engine for Coding-Assistant Sessions
//!
//! Durable memory for assistant sessions: observations of work done and
//! session summaries are recorded, consolidated while the engine is idle,
//! and served back through hybrid search.
//!
//! # Modules
//!
//! - **store** - SQLite record store (sessions, observations, summaries,
//!   prompts, sleep-cycle history) with versioned migrations
//! - **supersession** - detects newer observations that replace older ones,
//!   deprecates long-superseded entries, classifies memory tiers
//! - **scheduler** - idle-triggered light/deep cycles and per-session micro
//!   cycles
//! - **search** - keyword + vector retrieval with rank fusion, graceful
//!   degradation and temporal-decay re-ranking
//! - **drift** - advisory report of stale or abandoned concept clusters
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mnemo_core::{
//!     ConsolidationScheduler, EngineConfig, HybridRetrieval, RecordStore, SearchQuery,
//!     SupersessionDetector,
//! };
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = EngineConfig::default();
//!     let store = RecordStore::open("mnemo.db")?;
//!
//!     let detector = Arc::new(SupersessionDetector::new(store.clone(), config.clone()));
//!     let scheduler = Arc::new(ConsolidationScheduler::new(store.clone(), detector, config.clone()));
//!     scheduler.start().await;
//!
//!     let retrieval = HybridRetrieval::new(store, config.search.clone());
//!     let results = retrieval.search(&SearchQuery::text("token refresh")).await?;
//!     println!("{} observations via {}", results.observations.len(), results.strategy);
//!
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod drift;
pub mod error;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod supersession;
pub mod types;
pub mod utils;

pub use config::{
    ConfigValidationError, CycleConfig, CycleConfigs, DriftConfig, EngineConfig, IdleConfig, MemoryTierConfig,
    PriorityConfig, SearchConfig, SupersessionConfig,
};
pub use drift::{render_table, ConceptCluster, DriftAnalyzer, DriftReport, DriftSignal};
pub use error::{MnemoError, MnemoResult};
pub use scheduler::{ConsolidationScheduler, CycleSummary, IdleState, RunOptions, SchedulerStatus, TickOutcome};
pub use search::{HybridRetrieval, SearchQuery, SearchResponse};
pub use store::{BatchWrite, RecordStore, StoredBatch};
pub use supersession::{DetectionResult, SupersessionCandidate, SupersessionDetector};
pub use types::{
    CycleStatus, CycleType, MemoryTier, Observation, ObservationFilter, ObservationType, ParsedObservation,
    ParsedSummary, PriorityTier, Session, SessionStatus, SessionSummary, SleepCycleRecord, UserPrompt,
};
