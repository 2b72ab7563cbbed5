//! Consolidation Scheduler
//!
//! Runs sleep cycles over the record store when the engine goes idle.
//!
//! # Idle state machine
//!
//! - Any activity (a session registering, finishing or calling
//!   [`ConsolidationScheduler::record_activity`]) resets the idle timer.
//! - Idle past the light threshold: a light cycle runs unless one ran within
//!   the minimum light interval. The timer keeps running so the engine can
//!   escalate.
//! - Idle past the deep threshold: a deep cycle runs under the same rule
//!   with its own interval, then the idle timer resets.
//! - A completed session triggers a micro cycle scoped to that session.
//!
//! Every cycle writes a history row when it starts and finalizes it as
//! `completed` or `failed`. Errors inside a cycle are recorded, never
//! propagated to the tick loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{CycleConfig, EngineConfig};
use crate::store::{CycleCounts, CycleTotals, RecordStore};
use crate::supersession::SupersessionDetector;
use crate::types::{CycleType, MemoryTier, PriorityTier, SleepCycleRecord};
use crate::utils::time::now_millis;
use crate::MnemoResult;

/// Options for a forced cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Compute everything, write nothing but the history row.
    pub dry_run: bool,
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: i64,
    pub cycle_type: CycleType,
    pub dry_run: bool,
    pub started_at_epoch: i64,
    pub completed_at_epoch: i64,
    pub duration_ms: i64,
    pub counts: CycleCounts,
    pub by_priority_tier: BTreeMap<PriorityTier, usize>,
    /// Tier distribution after reclassification, summed over projects
    pub by_memory_tier: BTreeMap<MemoryTier, i64>,
    pub memory_tier_updates: usize,
    pub error: Option<String>,
    /// Whether the history row was finalized with this outcome
    pub recorded: bool,
}

impl CycleSummary {
    fn new(cycle_id: i64, cycle_type: CycleType, dry_run: bool, started_at_epoch: i64) -> Self {
        Self {
            cycle_id,
            cycle_type,
            dry_run,
            started_at_epoch,
            completed_at_epoch: started_at_epoch,
            duration_ms: 0,
            counts: CycleCounts::default(),
            by_priority_tier: [PriorityTier::Critical, PriorityTier::High, PriorityTier::Medium, PriorityTier::Low]
                .into_iter()
                .map(|t| (t, 0))
                .collect(),
            by_memory_tier: MemoryTier::ALL.iter().map(|t| (*t, 0)).collect(),
            memory_tier_updates: 0,
            error: None,
            recorded: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Idle snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleState {
    /// No registered session is active
    pub is_idle: bool,
    pub last_activity_at: i64,
    pub idle_duration_ms: i64,
    pub active_sessions: usize,
}

/// Scheduler snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Tick loop is running
    pub running: bool,
    pub idle_detection_enabled: bool,
    pub idle_state: IdleState,
    pub last_cycle: Option<CycleSummary>,
    /// Persisted over every completed cycle
    pub totals: CycleTotals,
}

/// What one idle check decided
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Idle detection is switched off
    Disabled,
    /// Sessions are active and the config requires none
    SessionsActive,
    /// Idle time below the light threshold
    NotIdle,
    /// A cycle of this type ran within its minimum interval
    Throttled(CycleType),
    Ran(CycleSummary),
}

#[derive(Debug)]
struct SchedulerState {
    last_activity_ms: i64,
    active_sessions: HashSet<String>,
    /// Finish time of the last cycle of each type
    last_finished: HashMap<CycleType, i64>,
    last_cycle: Option<CycleSummary>,
}

impl SchedulerState {
    fn fresh(now_ms: i64) -> Self {
        Self {
            last_activity_ms: now_ms,
            active_sessions: HashSet::new(),
            last_finished: HashMap::new(),
            last_cycle: None,
        }
    }
}

/// Work a tracked cycle performs
enum CycleWork<'a> {
    /// Every project, with the given cycle settings
    Projects(&'a CycleConfig),
    /// One session against recent observations
    Session(&'a str),
}

/// Idle-triggered consolidation.
///
/// One instance per process; share it behind an `Arc`.
pub struct ConsolidationScheduler {
    store: RecordStore,
    detector: Arc<SupersessionDetector>,
    config: RwLock<EngineConfig>,
    state: Mutex<SchedulerState>,
    tick_handle: Mutex<Option<tokio::task::AbortHandle>>,
}

impl ConsolidationScheduler {
    pub fn new(store: RecordStore, detector: Arc<SupersessionDetector>, config: EngineConfig) -> Self {
        Self {
            store,
            detector,
            config: RwLock::new(config),
            state: Mutex::new(SchedulerState::fresh(now_millis())),
            tick_handle: Mutex::new(None),
        }
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration for this scheduler and its detector.
    ///
    /// A new check interval applies from the next `start`.
    pub async fn update_config(&self, config: EngineConfig) -> MnemoResult<()> {
        config.validate()?;
        self.detector.update_config(config.clone()).await;
        *self.config.write().await = config;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn the idle-check loop. No-op when already running.
    ///
    /// Cycles a previous process left `running` are failed first.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.tick_handle.lock().await;
        if handle.is_some() {
            return;
        }

        match self.store.recover_orphaned_cycles().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Marked orphaned sleep cycles as failed"),
            Err(e) => error!(error = %e, "Failed to recover orphaned sleep cycles"),
        }

        let idle = self.config.read().await.idle.clone();
        self.record_activity().await;

        info!(
            light_sleep_after_ms = idle.light_sleep_after_ms,
            deep_sleep_after_ms = idle.deep_sleep_after_ms,
            check_interval_ms = idle.check_interval_ms,
            "Starting idle detection"
        );

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(idle.check_interval_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match scheduler.tick().await {
                    Ok(TickOutcome::Ran(summary)) => debug!(
                        cycle_id = summary.cycle_id,
                        cycle_type = %summary.cycle_type,
                        "Idle check ran a cycle"
                    ),
                    Ok(outcome) => debug!(?outcome, "Idle check"),
                    Err(e) => error!(error = %e, "Idle check failed"),
                }
            }
        });
        *handle = Some(task.abort_handle());
    }

    /// Abort the idle-check loop. A cycle in flight is abandoned and its
    /// history row recovered as orphaned on the next start.
    pub async fn stop(&self) {
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
            info!("Stopped idle detection");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tick_handle.lock().await.is_some()
    }

    /// Stop the loop and forget all in-memory state.
    pub async fn reset(&self) {
        self.stop().await;
        *self.state.lock().await = SchedulerState::fresh(now_millis());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activity
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn record_activity(&self) {
        self.record_activity_at(now_millis()).await;
    }

    pub async fn record_activity_at(&self, at_ms: i64) {
        self.state.lock().await.last_activity_ms = at_ms;
    }

    pub async fn register_session(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        state.active_sessions.insert(session_id.to_string());
        state.last_activity_ms = now_millis();
    }

    pub async fn unregister_session(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        state.active_sessions.remove(session_id);
        state.last_activity_ms = now_millis();
    }

    pub async fn idle_state(&self) -> IdleState {
        self.idle_state_at(now_millis()).await
    }

    pub async fn idle_state_at(&self, now_ms: i64) -> IdleState {
        let state = self.state.lock().await;
        IdleState {
            is_idle: state.active_sessions.is_empty(),
            last_activity_at: state.last_activity_ms,
            idle_duration_ms: (now_ms - state.last_activity_ms).max(0),
            active_sessions: state.active_sessions.len(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Idle checks
    // ─────────────────────────────────────────────────────────────────────────

    /// One idle check at the current time.
    pub async fn tick(&self) -> MnemoResult<TickOutcome> {
        self.tick_at(now_millis()).await
    }

    /// One idle check as if the clock read `now_ms`.
    pub async fn tick_at(&self, now_ms: i64) -> MnemoResult<TickOutcome> {
        let idle = self.config.read().await.idle.clone();
        if !idle.enabled {
            return Ok(TickOutcome::Disabled);
        }

        let state = self.idle_state_at(now_ms).await;
        if idle.require_no_active_sessions && state.active_sessions > 0 {
            return Ok(TickOutcome::SessionsActive);
        }

        let idle_ms = state.idle_duration_ms as u64;
        if idle_ms >= idle.deep_sleep_after_ms {
            let outcome = self.trigger_at(CycleType::Deep, now_ms).await?;
            // keeps the next check from starting another deep cycle at once
            self.record_activity_at(now_ms).await;
            return Ok(outcome);
        }
        if idle_ms >= idle.light_sleep_after_ms {
            return self.trigger_at(CycleType::Light, now_ms).await;
        }
        Ok(TickOutcome::NotIdle)
    }

    /// Run a cycle unless one of the same type finished within its minimum
    /// interval.
    pub async fn trigger(&self, cycle_type: CycleType) -> MnemoResult<TickOutcome> {
        self.trigger_at(cycle_type, now_millis()).await
    }

    async fn trigger_at(&self, cycle_type: CycleType, now_ms: i64) -> MnemoResult<TickOutcome> {
        let min_interval = {
            let config = self.config.read().await;
            match cycle_type {
                CycleType::Light => config.idle.min_light_interval_ms,
                CycleType::Deep => config.idle.min_deep_interval_ms,
                CycleType::Micro | CycleType::Manual => 0,
            }
        };

        let last_finished = self.state.lock().await.last_finished.get(&cycle_type).copied();
        if let Some(finished) = last_finished {
            let since = now_ms - finished;
            if since < min_interval as i64 {
                debug!(cycle_type = %cycle_type, since_ms = since, min_interval_ms = min_interval, "Skipping cycle");
                return Ok(TickOutcome::Throttled(cycle_type));
            }
        }

        Ok(TickOutcome::Ran(self.run_cycle(cycle_type, RunOptions::default()).await?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cycles
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a cycle now over every project.
    ///
    /// Fails only when the history row cannot be written; errors inside the
    /// cycle are recorded on the summary and the row.
    pub async fn run_cycle(&self, cycle_type: CycleType, options: RunOptions) -> MnemoResult<CycleSummary> {
        let cycle = self.config.read().await.cycles.for_type(cycle_type).clone();
        self.run_tracked(cycle_type, options.dry_run, CycleWork::Projects(&cycle))
            .await
    }

    /// Micro cycle for a finished session. Always applies its results.
    pub async fn on_session_completed(&self, memory_session_id: &str) -> MnemoResult<CycleSummary> {
        self.record_activity().await;
        self.run_tracked(CycleType::Micro, false, CycleWork::Session(memory_session_id))
            .await
    }

    async fn run_tracked(&self, cycle_type: CycleType, dry_run: bool, work: CycleWork<'_>) -> MnemoResult<CycleSummary> {
        let started = Instant::now();
        let started_at = now_millis();
        let cycle_id = self.store.begin_cycle(cycle_type).await?;
        info!(cycle_id, cycle_type = %cycle_type, dry_run, "Starting sleep cycle");

        let mut summary = CycleSummary::new(cycle_id, cycle_type, dry_run, started_at);
        let result = match work {
            CycleWork::Projects(cycle) => self.consolidate_projects(cycle, dry_run, &mut summary).await,
            CycleWork::Session(memory_session_id) => self.consolidate_session(memory_session_id, &mut summary).await,
        };

        summary.completed_at_epoch = now_millis();
        summary.duration_ms = started.elapsed().as_millis() as i64;

        let finalized = match result {
            Ok(()) => {
                info!(
                    cycle_id,
                    cycle_type = %cycle_type,
                    duration_ms = summary.duration_ms,
                    processed = summary.counts.observations_processed,
                    supersessions = summary.counts.supersessions_detected,
                    deprecated = summary.counts.memories_deprecated,
                    "Completed sleep cycle"
                );
                self.store.complete_cycle(cycle_id, &summary.counts).await
            }
            Err(e) => {
                let message = e.to_string();
                warn!(cycle_id, cycle_type = %cycle_type, error = %message, "Sleep cycle failed");
                summary.error = Some(message.clone());
                self.store.fail_cycle(cycle_id, &message, &summary.counts).await
            }
        };
        match finalized {
            Ok(true) => summary.recorded = true,
            Ok(false) => warn!(
                cycle_id,
                cycle_type = %cycle_type,
                "Cycle record was no longer running, outcome not recorded"
            ),
            Err(e) => error!(cycle_id, error = %e, "Failed to finalize cycle record"),
        }

        let mut state = self.state.lock().await;
        state.last_finished.insert(cycle_type, summary.completed_at_epoch);
        state.last_cycle = Some(summary.clone());
        Ok(summary)
    }

    /// Supersession, chains, deprecation and tiering for every project in
    /// turn.
    async fn consolidate_projects(
        &self,
        cycle: &CycleConfig,
        dry_run: bool,
        summary: &mut CycleSummary,
    ) -> MnemoResult<()> {
        let config = self.config.read().await.clone();
        let reclassify = config.memory_tiers.enabled
            && config.memory_tiers.reclassify_on_sleep_cycle
            && cycle.reclassify_memory_tiers;

        for project in self.store.active_projects().await? {
            let detection = self.detector.detect_batch(&project, cycle).await?;
            summary.counts.observations_processed += detection.processed_count as i64;

            let outcome = self.detector.apply(&detection.candidates, dry_run).await?;
            summary.counts.supersessions_detected += outcome.applied as i64;
            for (tier, count) in outcome.by_priority_tier {
                *summary.by_priority_tier.entry(tier).or_default() += count;
            }

            let chains = self.detector.consolidate_chains(&project, dry_run).await?;
            let consolidated = if dry_run { chains.links_found } else { chains.relinked };
            summary.counts.chains_consolidated += consolidated as i64;

            if cycle.deprecation_enabled {
                let deprecated = self
                    .detector
                    .deprecate(&project, cycle.deprecate_after_days, dry_run)
                    .await?;
                summary.counts.memories_deprecated += deprecated as i64;
            }

            if reclassify {
                let report = self.detector.reclassify_tiers(&project, dry_run).await?;
                summary.memory_tier_updates += report.updates.len();
                for (tier, count) in report.by_tier {
                    *summary.by_memory_tier.entry(tier).or_default() += count;
                }
            }

            debug!(project = %project, processed = detection.processed_count, applied = outcome.applied, "Project consolidated");
        }
        Ok(())
    }

    async fn consolidate_session(&self, memory_session_id: &str, summary: &mut CycleSummary) -> MnemoResult<()> {
        let micro = self.config.read().await.cycles.micro.clone();
        let detection = self
            .detector
            .detect_for_session(
                memory_session_id,
                micro.supersession_lookback_days,
                micro.max_observations_per_cycle,
            )
            .await?;
        summary.counts.observations_processed = detection.processed_count as i64;

        let outcome = self.detector.apply(&detection.candidates, false).await?;
        summary.counts.supersessions_detected = outcome.applied as i64;
        for (tier, count) in outcome.by_priority_tier {
            *summary.by_priority_tier.entry(tier).or_default() += count;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn status(&self) -> MnemoResult<SchedulerStatus> {
        let idle_detection_enabled = self.config.read().await.idle.enabled;
        let running = self.is_running().await;
        let idle_state = self.idle_state().await;
        let last_cycle = self.state.lock().await.last_cycle.clone();
        Ok(SchedulerStatus {
            running,
            idle_detection_enabled: idle_detection_enabled && running,
            idle_state,
            last_cycle,
            totals: self.store.cycle_totals().await?,
        })
    }

    /// Newest first.
    pub async fn history(&self, limit: usize) -> MnemoResult<Vec<SleepCycleRecord>> {
        self.store.cycle_history(limit).await
    }
}
