//! Consolidation queries
//!
//! Reads and writes used by sleep cycles: candidate selection, supersession
//! links, chain relinking, deprecation and memory-tier bookkeeping. None of
//! these delete rows.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::observations::{map_observation, OBSERVATION_COLUMNS};
use super::RecordStore;
use crate::types::{MemoryTier, Observation};
use crate::MnemoResult;

/// Upper bound on relinking passes for one project
const MAX_CHAIN_PASSES: usize = 32;

/// Outcome of a chain consolidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Links pointing at an observation that is itself superseded.
    pub links_found: usize,
    /// Rows repointed at the end of their chain.
    pub relinked: usize,
    pub passes: usize,
}

/// Planned tier change for one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUpdate {
    pub id: i64,
    pub from: MemoryTier,
    pub to: MemoryTier,
}

impl RecordStore {
    /// Projects with at least one live observation
    pub async fn active_projects(&self) -> MnemoResult<Vec<String>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(
            "SELECT DISTINCT project FROM observations WHERE deprecated = 0 ORDER BY project",
        )?;
        let projects = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(projects)
    }

    /// Live observations of a project created at or after `since_epoch`,
    /// newest first.
    pub async fn consolidation_candidates(
        &self,
        project: &str,
        since_epoch: i64,
        limit: usize,
    ) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project = ?1 AND created_at_epoch >= ?2 AND deprecated = 0
             ORDER BY created_at_epoch DESC, id DESC LIMIT ?3"
        ))?;
        let observations = stmt
            .query_map(params![project, since_epoch, limit as i64], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    /// Mark `older_id` superseded by `newer_id`.
    ///
    /// Returns false when the older observation is already superseded or
    /// missing. The newer observation gains a reference and both get their
    /// access time refreshed.
    pub async fn apply_supersession(&self, older_id: i64, newer_id: i64) -> MnemoResult<bool> {
        if older_id == newer_id {
            return Ok(false);
        }
        let now = Utc::now().timestamp_millis();
        let mut db = self.conn().await;
        let tx = db.transaction()?;

        let changed = tx.execute(
            "UPDATE observations
             SET superseded_by = ?2, superseded_at = ?3, last_accessed_at = ?3
             WHERE id = ?1 AND superseded_by IS NULL",
            params![older_id, newer_id, now],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE observations
             SET reference_count = reference_count + 1, last_accessed_at = ?2
             WHERE id = ?1",
            params![newer_id, now],
        )?;
        tx.commit()?;

        debug!(older_id, newer_id, "Applied supersession");
        Ok(true)
    }

    /// Number of supersession links whose target is itself superseded.
    pub async fn count_chain_links(&self, project: &str) -> MnemoResult<usize> {
        let db = self.conn().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM observations a
             JOIN observations b ON a.superseded_by = b.id
             WHERE a.project = ?1 AND b.superseded_by IS NOT NULL AND b.superseded_by != a.id",
            params![project],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Repoint every A -> B -> C link at C until no chain remains.
    pub async fn consolidate_chains(&self, project: &str, dry_run: bool) -> MnemoResult<ChainReport> {
        let links_found = self.count_chain_links(project).await?;
        let mut report = ChainReport {
            links_found,
            ..Default::default()
        };
        if dry_run || links_found == 0 {
            return Ok(report);
        }

        let db = self.conn().await;
        let tx = db.unchecked_transaction()?;
        while report.passes < MAX_CHAIN_PASSES {
            let changed = tx.execute(
                "UPDATE observations
                 SET superseded_by = (
                     SELECT b.superseded_by FROM observations b WHERE b.id = observations.superseded_by
                 )
                 WHERE project = ?1
                   AND superseded_by IN (
                       SELECT b.id FROM observations b
                       WHERE b.superseded_by IS NOT NULL AND b.superseded_by != observations.id
                   )",
                params![project],
            )?;
            report.passes += 1;
            if changed == 0 {
                break;
            }
            report.relinked += changed;
        }
        tx.commit()?;

        debug!(project, relinked = report.relinked, passes = report.passes, "Consolidated chains");
        Ok(report)
    }

    /// Deprecate superseded observations whose supersession predates
    /// `cutoff_epoch`. With `dry_run` only counts them.
    pub async fn deprecate_superseded(
        &self,
        project: &str,
        cutoff_epoch: i64,
        reason: &str,
        dry_run: bool,
    ) -> MnemoResult<usize> {
        let db = self.conn().await;
        const ELIGIBLE: &str = "project = ?1 AND superseded_by IS NOT NULL AND deprecated = 0
             AND COALESCE(superseded_at, created_at_epoch) < ?2";

        if dry_run {
            let count: i64 = db.query_row(
                &format!("SELECT COUNT(*) FROM observations WHERE {ELIGIBLE}"),
                params![project, cutoff_epoch],
                |row| row.get(0),
            )?;
            return Ok(count as usize);
        }

        let changed = db.execute(
            &format!(
                "UPDATE observations SET deprecated = 1, deprecated_at = ?3, deprecation_reason = ?4
                 WHERE {ELIGIBLE}"
            ),
            params![project, cutoff_epoch, Utc::now().timestamp_millis(), reason],
        )?;
        Ok(changed)
    }

    /// Every observation of a project, deprecated ones included, for tier
    /// classification.
    pub async fn tier_inputs(&self, project: &str) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE project = ?1 ORDER BY id"
        ))?;
        let observations = stmt
            .query_map(params![project], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    /// Write tier changes in one transaction. Returns rows changed.
    pub async fn update_memory_tiers(&self, updates: &[TierUpdate]) -> MnemoResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp_millis();
        let mut db = self.conn().await;
        let tx = db.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE observations SET memory_tier = ?2, memory_tier_updated_at = ?3 WHERE id = ?1",
            )?;
            for update in updates {
                changed += stmt.execute(params![update.id, update.to.as_str(), now])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Observation count per tier. Every tier is present.
    pub async fn memory_tier_stats(&self, project: Option<&str>) -> MnemoResult<BTreeMap<MemoryTier, i64>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(
            "SELECT memory_tier, COUNT(*) FROM observations
             WHERE (?1 IS NULL OR project = ?1)
             GROUP BY memory_tier",
        )?;
        let rows = stmt
            .query_map(params![project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats: BTreeMap<MemoryTier, i64> = MemoryTier::ALL.iter().map(|t| (*t, 0)).collect();
        for (tier, count) in rows {
            if let Some(tier) = MemoryTier::from_str(&tier) {
                *stats.entry(tier).or_default() += count;
            }
        }
        Ok(stats)
    }

    /// Observations in one tier, newest first
    pub async fn observations_by_tier(
        &self,
        tier: MemoryTier,
        project: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE memory_tier = ?1 AND (?2 IS NULL OR project = ?2)
             ORDER BY created_at_epoch DESC, id DESC LIMIT ?3"
        ))?;
        let observations = stmt
            .query_map(params![tier.as_str(), project, limit as i64], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    /// Superseded observations, most recently superseded first
    pub async fn superseded_observations(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NOT NULL AND (?1 IS NULL OR project = ?1)
             ORDER BY superseded_at DESC, id DESC LIMIT ?2"
        ))?;
        let observations = stmt
            .query_map(params![project, limit as i64], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BatchWrite;
    use crate::types::{ObservationType, ParsedObservation};
    use crate::utils::time::MS_PER_DAY;

    async fn seeded(titles: &[&str]) -> (RecordStore, Vec<i64>) {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        let mut batch = BatchWrite::new("content-a", "alpha");
        for title in titles {
            batch = batch.observation(ParsedObservation::new(ObservationType::Decision, *title));
        }
        let stored = store.store_batch(batch).await.unwrap();
        (store, stored.observation_ids)
    }

    #[tokio::test]
    async fn test_apply_supersession_once() {
        let (store, ids) = seeded(&["old", "new", "newest"]).await;

        assert!(store.apply_supersession(ids[0], ids[1]).await.unwrap());
        assert!(!store.apply_supersession(ids[0], ids[2]).await.unwrap());
        assert!(!store.apply_supersession(ids[1], ids[1]).await.unwrap());

        let older = store.get_observation(ids[0]).await.unwrap().unwrap();
        let newer = store.get_observation(ids[1]).await.unwrap().unwrap();
        assert_eq!(older.superseded_by, Some(ids[1]));
        assert!(older.superseded_at.is_some());
        assert!(older.last_accessed_at.is_some());
        assert_eq!(newer.reference_count, 1);
        assert!(newer.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_chain_consolidation() {
        let (store, ids) = seeded(&["a", "b", "c", "d"]).await;
        store.apply_supersession(ids[0], ids[1]).await.unwrap();
        store.apply_supersession(ids[1], ids[2]).await.unwrap();
        store.apply_supersession(ids[2], ids[3]).await.unwrap();

        let preview = store.consolidate_chains("alpha", true).await.unwrap();
        assert_eq!(preview.links_found, 2);
        assert_eq!(preview.relinked, 0);
        assert_eq!(store.get_observation(ids[0]).await.unwrap().unwrap().superseded_by, Some(ids[1]));

        let report = store.consolidate_chains("alpha", false).await.unwrap();
        assert!(report.relinked >= 2);
        for id in &ids[..3] {
            let observation = store.get_observation(*id).await.unwrap().unwrap();
            assert_eq!(observation.superseded_by, Some(ids[3]));
        }
        assert_eq!(store.count_chain_links("alpha").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deprecation_respects_grace_period() {
        let (store, ids) = seeded(&["a", "b", "c"]).await;
        store.apply_supersession(ids[0], ids[2]).await.unwrap();
        store.apply_supersession(ids[1], ids[2]).await.unwrap();
        {
            let db = store.conn().await;
            let long_ago = Utc::now().timestamp_millis() - 200 * MS_PER_DAY;
            db.execute("UPDATE observations SET superseded_at = ?2 WHERE id = ?1", params![ids[0], long_ago])
                .unwrap();
        }
        let cutoff = Utc::now().timestamp_millis() - 180 * MS_PER_DAY;

        assert_eq!(store.deprecate_superseded("alpha", cutoff, "test", true).await.unwrap(), 1);
        assert!(!store.get_observation(ids[0]).await.unwrap().unwrap().deprecated);

        assert_eq!(store.deprecate_superseded("alpha", cutoff, "Superseded for more than 180 days", false).await.unwrap(), 1);
        let deprecated = store.get_observation(ids[0]).await.unwrap().unwrap();
        assert!(deprecated.deprecated);
        assert_eq!(deprecated.deprecation_reason.as_deref(), Some("Superseded for more than 180 days"));
        assert!(!store.get_observation(ids[1]).await.unwrap().unwrap().deprecated);

        // rows are kept
        assert_eq!(store.tier_inputs("alpha").await.unwrap().len(), 3);
        assert_eq!(store.active_projects().await.unwrap(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_tier_updates_and_stats() {
        let (store, ids) = seeded(&["a", "b", "c"]).await;
        let changed = store
            .update_memory_tiers(&[
                TierUpdate { id: ids[0], from: MemoryTier::Working, to: MemoryTier::Core },
                TierUpdate { id: ids[1], from: MemoryTier::Working, to: MemoryTier::Archive },
            ])
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let stats = store.memory_tier_stats(Some("alpha")).await.unwrap();
        assert_eq!(stats[&MemoryTier::Core], 1);
        assert_eq!(stats[&MemoryTier::Archive], 1);
        assert_eq!(stats[&MemoryTier::Working], 1);
        assert_eq!(stats[&MemoryTier::Ephemeral], 0);

        let other = store.memory_tier_stats(Some("beta")).await.unwrap();
        assert!(other.values().all(|count| *count == 0));

        let core = store.observations_by_tier(MemoryTier::Core, None, 10).await.unwrap();
        assert_eq!(core.len(), 1);
        assert_eq!(core[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_candidates_window() {
        let (store, ids) = seeded(&["a", "b"]).await;
        store.apply_supersession(ids[0], ids[1]).await.unwrap();
        let since = Utc::now().timestamp_millis() - MS_PER_DAY;

        let candidates = store.consolidation_candidates("alpha", since, 10).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, ids[1]);

        let future = Utc::now().timestamp_millis() + MS_PER_DAY;
        assert!(store.consolidation_candidates("alpha", future, 10).await.unwrap().is_empty());

        let superseded = store.superseded_observations(Some("alpha"), 10).await.unwrap();
        assert_eq!(superseded.len(), 1);
    }
}
