//! Sleep-cycle history
//!
//! A row is inserted as `running` when a cycle starts and finalized exactly
//! once. Finalizing only touches rows still `running`, so a record is never
//! rewritten after it completes or fails.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::codec::invalid_column;
use super::RecordStore;
use crate::types::{CycleStatus, CycleType, SleepCycleRecord};
use crate::MnemoResult;

const CYCLE_COLUMNS: &str = "id, cycle_type, status, started_at_epoch, completed_at_epoch, duration_ms, \
     observations_processed, supersessions_detected, chains_consolidated, memories_deprecated, error_message";

const ORPHANED_MESSAGE: &str = "orphaned: process exited before cycle finished";

/// Counters recorded when a cycle finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    pub observations_processed: i64,
    pub supersessions_detected: i64,
    pub chains_consolidated: i64,
    pub memories_deprecated: i64,
}

/// Totals over completed cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTotals {
    pub total_cycles: i64,
    pub total_supersessions: i64,
    pub total_deprecated: i64,
}

fn map_cycle(row: &Row) -> rusqlite::Result<SleepCycleRecord> {
    let cycle_type: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(SleepCycleRecord {
        id: row.get(0)?,
        cycle_type: CycleType::from_str(&cycle_type)
            .ok_or_else(|| invalid_column(1, format!("invalid cycle type: {cycle_type}")))?,
        status: CycleStatus::from_str(&status)
            .ok_or_else(|| invalid_column(2, format!("invalid cycle status: {status}")))?,
        started_at_epoch: row.get(3)?,
        completed_at_epoch: row.get(4)?,
        duration_ms: row.get(5)?,
        observations_processed: row.get(6)?,
        supersessions_detected: row.get(7)?,
        chains_consolidated: row.get(8)?,
        memories_deprecated: row.get(9)?,
        error_message: row.get(10)?,
    })
}

/// Fail every cycle left `running` by a previous process.
fn recover_orphaned(conn: &Connection) -> rusqlite::Result<usize> {
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "UPDATE sleep_cycles
         SET status = 'failed', completed_at_epoch = ?1, duration_ms = ?1 - started_at_epoch,
             error_message = ?2
         WHERE status = 'running'",
        params![now, ORPHANED_MESSAGE],
    )
}

impl RecordStore {
    /// Insert a `running` cycle row and return its id.
    pub async fn begin_cycle(&self, cycle_type: CycleType) -> MnemoResult<i64> {
        let db = self.conn().await;
        db.execute(
            "INSERT INTO sleep_cycles (cycle_type, status, started_at_epoch) VALUES (?1, 'running', ?2)",
            params![cycle_type.as_str(), Utc::now().timestamp_millis()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Finalize a running cycle as completed. Returns false if the row was
    /// already finalized.
    pub async fn complete_cycle(&self, id: i64, counts: &CycleCounts) -> MnemoResult<bool> {
        let now = Utc::now().timestamp_millis();
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE sleep_cycles
             SET status = 'completed', completed_at_epoch = ?2, duration_ms = ?2 - started_at_epoch,
                 observations_processed = ?3, supersessions_detected = ?4,
                 chains_consolidated = ?5, memories_deprecated = ?6
             WHERE id = ?1 AND status = 'running'",
            params![
                id,
                now,
                counts.observations_processed,
                counts.supersessions_detected,
                counts.chains_consolidated,
                counts.memories_deprecated,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Finalize a running cycle as failed, keeping whatever was counted.
    pub async fn fail_cycle(&self, id: i64, message: &str, counts: &CycleCounts) -> MnemoResult<bool> {
        let now = Utc::now().timestamp_millis();
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE sleep_cycles
             SET status = 'failed', completed_at_epoch = ?2, duration_ms = ?2 - started_at_epoch,
                 observations_processed = ?3, supersessions_detected = ?4,
                 chains_consolidated = ?5, memories_deprecated = ?6, error_message = ?7
             WHERE id = ?1 AND status = 'running'",
            params![
                id,
                now,
                counts.observations_processed,
                counts.supersessions_detected,
                counts.chains_consolidated,
                counts.memories_deprecated,
                message,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Most recent cycles first
    pub async fn cycle_history(&self, limit: usize) -> MnemoResult<Vec<SleepCycleRecord>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {CYCLE_COLUMNS} FROM sleep_cycles ORDER BY started_at_epoch DESC, id DESC LIMIT ?1"
        ))?;
        let cycles = stmt
            .query_map(params![limit as i64], map_cycle)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cycles)
    }

    pub async fn get_cycle(&self, id: i64) -> MnemoResult<Option<SleepCycleRecord>> {
        let db = self.conn().await;
        let cycle = db
            .query_row(
                &format!("SELECT {CYCLE_COLUMNS} FROM sleep_cycles WHERE id = ?1"),
                params![id],
                map_cycle,
            )
            .optional()?;
        Ok(cycle)
    }

    pub async fn last_cycle(&self) -> MnemoResult<Option<SleepCycleRecord>> {
        Ok(self.cycle_history(1).await?.into_iter().next())
    }

    pub async fn cycle_totals(&self) -> MnemoResult<CycleTotals> {
        let db = self.conn().await;
        let totals = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(supersessions_detected), 0), COALESCE(SUM(memories_deprecated), 0)
             FROM sleep_cycles WHERE status = 'completed'",
            [],
            |row| {
                Ok(CycleTotals {
                    total_cycles: row.get(0)?,
                    total_supersessions: row.get(1)?,
                    total_deprecated: row.get(2)?,
                })
            },
        )?;
        Ok(totals)
    }

    /// Fail cycles left `running` by a process that died mid-cycle.
    ///
    /// Only safe while no other process may be running a cycle on the same
    /// database, so the scheduler calls it on start rather than every open.
    pub async fn recover_orphaned_cycles(&self) -> MnemoResult<usize> {
        let db = self.conn().await;
        Ok(recover_orphaned(&db)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_cycle_lifecycle() {
        let store = RecordStore::open_in_memory().unwrap();
        let id = store.begin_cycle(CycleType::Light).await.unwrap();

        let running = store.get_cycle(id).await.unwrap().unwrap();
        assert_eq!(running.status, CycleStatus::Running);
        assert!(running.completed_at_epoch.is_none());

        let counts = CycleCounts {
            observations_processed: 10,
            supersessions_detected: 2,
            chains_consolidated: 1,
            memories_deprecated: 3,
        };
        assert!(store.complete_cycle(id, &counts).await.unwrap());
        // finalized rows are never rewritten
        assert!(!store.fail_cycle(id, "late failure", &CycleCounts::default()).await.unwrap());

        let done = store.get_cycle(id).await.unwrap().unwrap();
        assert_eq!(done.status, CycleStatus::Completed);
        assert_eq!(done.supersessions_detected, 2);
        assert!(done.duration_ms.unwrap() >= 0);
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_history_and_totals() {
        let store = RecordStore::open_in_memory().unwrap();
        let first = store.begin_cycle(CycleType::Light).await.unwrap();
        store
            .complete_cycle(first, &CycleCounts { supersessions_detected: 4, memories_deprecated: 1, ..Default::default() })
            .await
            .unwrap();
        let second = store.begin_cycle(CycleType::Deep).await.unwrap();
        store.fail_cycle(second, "boom", &CycleCounts::default()).await.unwrap();

        let history = store.cycle_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second);
        assert_eq!(history[0].error_message.as_deref(), Some("boom"));
        assert_eq!(store.last_cycle().await.unwrap().map(|c| c.id), Some(second));

        let totals = store.cycle_totals().await.unwrap();
        assert_eq!(totals.total_cycles, 1);
        assert_eq!(totals.total_supersessions, 4);
        assert_eq!(totals.total_deprecated, 1);
    }

    #[test]
    fn test_orphaned_cycles_fail_on_explicit_recovery() {
        let file = NamedTempFile::new().unwrap();
        let id = {
            let store = RecordStore::open(file.path()).unwrap();
            tokio_test::block_on(store.begin_cycle(CycleType::Deep)).unwrap()
        };

        let reopened = RecordStore::open(file.path()).unwrap();
        let cycle = tokio_test::block_on(reopened.get_cycle(id)).unwrap().unwrap();
        assert_eq!(cycle.status, CycleStatus::Running);

        assert_eq!(tokio_test::block_on(reopened.recover_orphaned_cycles()).unwrap(), 1);
        let cycle = tokio_test::block_on(reopened.get_cycle(id)).unwrap().unwrap();
        assert_eq!(cycle.status, CycleStatus::Failed);
        assert_eq!(cycle.error_message.as_deref(), Some(ORPHANED_MESSAGE));
        assert_eq!(tokio_test::block_on(reopened.recover_orphaned_cycles()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_open_leaves_live_cycle_running() {
        let file = NamedTempFile::new().unwrap();
        let daemon = RecordStore::open(file.path()).unwrap();
        let id = daemon.begin_cycle(CycleType::Light).await.unwrap();

        let cli = RecordStore::open(file.path()).unwrap();
        let cycle = cli.get_cycle(id).await.unwrap().unwrap();
        assert_eq!(cycle.status, CycleStatus::Running);

        assert!(daemon.complete_cycle(id, &CycleCounts::default()).await.unwrap());
        let cycle = cli.get_cycle(id).await.unwrap().unwrap();
        assert_eq!(cycle.status, CycleStatus::Completed);
    }
}
