//! Session lifecycle and user prompts.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::codec::invalid_column;
use super::{placeholders, RecordStore};
use crate::types::{Session, SessionStatus, UserPrompt};
use crate::{MnemoError, MnemoResult};

const SESSION_COLUMNS: &str = "id, content_session_id, memory_session_id, project, user_prompt, \
     prompt_counter, status, started_at, started_at_epoch, completed_at, completed_at_epoch";

const PROMPT_COLUMNS: &str =
    "id, content_session_id, prompt_number, prompt_text, created_at, created_at_epoch";

/// Fresh globally unique memory session id
pub fn new_memory_session_id() -> String {
    Uuid::new_v4().to_string()
}

fn map_session(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get(6)?;
    Ok(Session {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        memory_session_id: row.get(2)?,
        project: row.get(3)?,
        user_prompt: row.get(4)?,
        prompt_counter: row.get(5)?,
        status: SessionStatus::from_str(&status)
            .ok_or_else(|| invalid_column(6, format!("invalid session status: {status}")))?,
        started_at: row.get(7)?,
        started_at_epoch: row.get(8)?,
        completed_at: row.get(9)?,
        completed_at_epoch: row.get(10)?,
    })
}

pub(crate) fn map_prompt(row: &Row) -> rusqlite::Result<UserPrompt> {
    Ok(UserPrompt {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        prompt_number: row.get(2)?,
        prompt_text: row.get(3)?,
        created_at: row.get(4)?,
        created_at_epoch: row.get(5)?,
    })
}

fn select_session(
    db: &rusqlite::Connection,
    column: &str,
    value: &str,
) -> rusqlite::Result<Option<Session>> {
    db.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sdk_sessions WHERE {column} = ?1"),
        params![value],
        map_session,
    )
    .optional()
}

impl RecordStore {
    /// Create the session for an external id, or return the existing one.
    ///
    /// Concurrent callers with the same external id observe the same row and
    /// the same memory session id. A new session starts with its memory
    /// session id equal to the external id.
    pub async fn create_or_fetch_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: Option<&str>,
    ) -> MnemoResult<Session> {
        self.insert_session(content_session_id, project, user_prompt, SessionStatus::Active)
            .await
    }

    /// Synthetic completed session holding manually saved memories of a project.
    pub async fn get_or_create_manual_session(&self, project: &str) -> MnemoResult<Session> {
        let content_session_id = format!("manual-{project}");
        self.insert_session(&content_session_id, project, None, SessionStatus::Completed)
            .await
    }

    async fn insert_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: Option<&str>,
        status: SessionStatus,
    ) -> MnemoResult<Session> {
        if content_session_id.trim().is_empty() {
            return Err(MnemoError::invalid_operation("content session id must not be empty"));
        }

        let now = Utc::now();
        let db = self.conn().await;

        let inserted = db.execute(
            "INSERT OR IGNORE INTO sdk_sessions
             (content_session_id, memory_session_id, project, user_prompt, started_at, started_at_epoch, status)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                content_session_id,
                project,
                user_prompt,
                now.to_rfc3339(),
                now.timestamp_millis(),
                status.as_str(),
            ],
        )?;

        // Backfill a project recorded empty by an earlier caller
        if inserted == 0 && !project.is_empty() {
            db.execute(
                "UPDATE sdk_sessions SET project = ?2 WHERE content_session_id = ?1 AND project = ''",
                params![content_session_id, project],
            )?;
        }

        match select_session(&db, "content_session_id", content_session_id)? {
            Some(session) => {
                if inserted > 0 {
                    debug!(content_session_id, project, "Created session");
                }
                Ok(session)
            }
            // OR IGNORE swallowed a collision with another session's memory id
            None => Err(MnemoError::integrity(format!(
                "content session id {content_session_id} collides with an existing memory session id"
            ))),
        }
    }

    /// Get a session by its external id
    pub async fn get_session(&self, content_session_id: &str) -> MnemoResult<Option<Session>> {
        let db = self.conn().await;
        Ok(select_session(&db, "content_session_id", content_session_id)?)
    }

    /// Get a session by its memory session id
    pub async fn get_session_by_memory_id(
        &self,
        memory_session_id: &str,
    ) -> MnemoResult<Option<Session>> {
        let db = self.conn().await;
        Ok(select_session(&db, "memory_session_id", memory_session_id)?)
    }

    /// Sessions by row id, in the order given. Unknown ids are skipped.
    pub async fn get_sessions(&self, ids: &[i64]) -> MnemoResult<Vec<Session>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sdk_sessions WHERE id IN ({})",
            placeholders(ids.len())
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), map_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(order_by_ids(ids, rows, |s| s.id))
    }

    /// Move the memory session id off its placeholder.
    ///
    /// The transition happens at most once. Repeating it with the same value
    /// is a no-op; a different value afterwards is rejected. A value held by
    /// another session fails on the unique index.
    pub async fn assign_memory_session_id(
        &self,
        content_session_id: &str,
        memory_session_id: &str,
    ) -> MnemoResult<Session> {
        if memory_session_id.trim().is_empty() {
            return Err(MnemoError::invalid_operation("memory session id must not be empty"));
        }
        if memory_session_id == content_session_id {
            return Err(MnemoError::invalid_operation(
                "memory session id must differ from the content session id",
            ));
        }

        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE sdk_sessions SET memory_session_id = ?2
             WHERE content_session_id = ?1 AND memory_session_id = content_session_id",
            params![content_session_id, memory_session_id],
        )?;

        let session = select_session(&db, "content_session_id", content_session_id)?
            .ok_or_else(|| MnemoError::not_found("Session", content_session_id))?;

        if changed > 0 {
            info!(content_session_id, memory_session_id, "Assigned memory session id");
            return Ok(session);
        }

        if session.memory_session_id == memory_session_id {
            Ok(session)
        } else {
            Err(MnemoError::invalid_operation(format!(
                "session {content_session_id} already has memory session id {}",
                session.memory_session_id
            )))
        }
    }

    /// Store a user prompt and bump the session's prompt counter.
    ///
    /// Returns the stored prompt; its `prompt_number` is the new counter value.
    pub async fn record_user_prompt(
        &self,
        content_session_id: &str,
        prompt_text: &str,
    ) -> MnemoResult<UserPrompt> {
        let now = Utc::now();
        let mut db = self.conn().await;
        let tx = db.transaction()?;

        let changed = tx.execute(
            "UPDATE sdk_sessions SET prompt_counter = prompt_counter + 1 WHERE content_session_id = ?1",
            params![content_session_id],
        )?;
        if changed == 0 {
            return Err(MnemoError::not_found("Session", content_session_id));
        }

        let prompt_number: i64 = tx.query_row(
            "SELECT prompt_counter FROM sdk_sessions WHERE content_session_id = ?1",
            params![content_session_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO user_prompts (content_session_id, prompt_number, prompt_text, created_at, created_at_epoch)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                content_session_id,
                prompt_number,
                prompt_text,
                now.to_rfc3339(),
                now.timestamp_millis()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(UserPrompt {
            id,
            content_session_id: content_session_id.to_string(),
            prompt_number,
            prompt_text: prompt_text.to_string(),
            created_at: now.to_rfc3339(),
            created_at_epoch: now.timestamp_millis(),
        })
    }

    /// Prompts of a session in order
    pub async fn prompts_for_session(&self, content_session_id: &str) -> MnemoResult<Vec<UserPrompt>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM user_prompts WHERE content_session_id = ?1 ORDER BY prompt_number ASC"
        ))?;
        let prompts = stmt
            .query_map(params![content_session_id], map_prompt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prompts)
    }

    /// Prompts by row id, in the order given
    pub async fn get_user_prompts(&self, ids: &[i64]) -> MnemoResult<Vec<UserPrompt>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM user_prompts WHERE id IN ({})",
            placeholders(ids.len())
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), map_prompt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(order_by_ids(ids, rows, |p| p.id))
    }

    /// Mark a session completed
    pub async fn complete_session(&self, content_session_id: &str) -> MnemoResult<()> {
        self.finish_session(content_session_id, SessionStatus::Completed).await
    }

    /// Mark a session failed
    pub async fn fail_session(&self, content_session_id: &str) -> MnemoResult<()> {
        self.finish_session(content_session_id, SessionStatus::Failed).await
    }

    async fn finish_session(&self, content_session_id: &str, status: SessionStatus) -> MnemoResult<()> {
        let now = Utc::now();
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE sdk_sessions SET status = ?2, completed_at = ?3, completed_at_epoch = ?4
             WHERE content_session_id = ?1",
            params![
                content_session_id,
                status.as_str(),
                now.to_rfc3339(),
                now.timestamp_millis()
            ],
        )?;
        if changed == 0 {
            return Err(MnemoError::not_found("Session", content_session_id));
        }
        debug!(content_session_id, status = %status, "Session finished");
        Ok(())
    }

    /// Delete a session together with its observations, summaries and prompts.
    pub async fn delete_session(&self, content_session_id: &str) -> MnemoResult<bool> {
        let db = self.conn().await;
        let changed = db.execute(
            "DELETE FROM sdk_sessions WHERE content_session_id = ?1",
            params![content_session_id],
        )?;
        Ok(changed > 0)
    }

    /// Number of sessions in `active` status
    pub async fn count_active_sessions(&self) -> MnemoResult<i64> {
        let db = self.conn().await;
        let count = db.query_row(
            "SELECT COUNT(*) FROM sdk_sessions WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Most recently started sessions of a project
    pub async fn recent_sessions(&self, project: &str, limit: usize) -> MnemoResult<Vec<Session>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sdk_sessions WHERE project = ?1
             ORDER BY started_at_epoch DESC, id DESC LIMIT ?2"
        ))?;
        let sessions = stmt
            .query_map(params![project, limit as i64], map_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

/// Reorder `rows` to follow `ids`, dropping ids without a row.
pub(crate) fn order_by_ids<T>(ids: &[i64], rows: Vec<T>, key: impl Fn(&T) -> i64) -> Vec<T> {
    let mut by_id: std::collections::HashMap<i64, T> =
        rows.into_iter().map(|row| (key(&row), row)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObservationType, ParsedObservation, ParsedSummary};
    use crate::store::BatchWrite;

    async fn store() -> RecordStore {
        RecordStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_create_or_fetch_is_idempotent() {
        let store = store().await;

        let first = store
            .create_or_fetch_session("content-a", "alpha", Some("fix the build"))
            .await
            .unwrap();
        let second = store
            .create_or_fetch_session("content-a", "alpha", Some("other prompt"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.memory_session_id, "content-a");
        assert_eq!(second.memory_session_id, first.memory_session_id);
        assert_eq!(second.user_prompt.as_deref(), Some("fix the build"));
        assert_eq!(first.status, SessionStatus::Active);
        assert!(!first.has_memory_session());
    }

    #[tokio::test]
    async fn test_concurrent_create_or_fetch_sees_one_session() {
        let store = store().await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create_or_fetch_session("shared", "alpha", None).await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            ids.push((session.id, session.memory_session_id));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_session_id_transitions_once() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();

        let assigned = store.assign_memory_session_id("content-a", "mem-1").await.unwrap();
        assert_eq!(assigned.memory_session_id, "mem-1");
        assert!(assigned.has_memory_session());

        // Same value again is a no-op
        let again = store.assign_memory_session_id("content-a", "mem-1").await.unwrap();
        assert_eq!(again.memory_session_id, "mem-1");

        // A second transition is rejected
        let err = store.assign_memory_session_id("content-a", "mem-2").await.unwrap_err();
        assert!(matches!(err, MnemoError::InvalidOperation { .. }));

        let session = store.get_session("content-a").await.unwrap().unwrap();
        assert_eq!(session.memory_session_id, "mem-1");

        let err = store.assign_memory_session_id("content-a", "content-a").await.unwrap_err();
        assert!(matches!(err, MnemoError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_memory_session_id_is_unique() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        store.create_or_fetch_session("content-b", "alpha", None).await.unwrap();

        store.assign_memory_session_id("content-a", "mem-shared").await.unwrap();
        let err = store
            .assign_memory_session_id("content-b", "mem-shared")
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());

        // Another session's placeholder is taken as well
        store.create_or_fetch_session("content-c", "alpha", None).await.unwrap();
        let err = store
            .assign_memory_session_id("content-b", "content-c")
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());

        let b = store.get_session("content-b").await.unwrap().unwrap();
        assert_eq!(b.memory_session_id, "content-b");
    }

    #[tokio::test]
    async fn test_content_id_colliding_with_memory_id_fails() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        store.assign_memory_session_id("content-a", "mem-x").await.unwrap();

        let err = store
            .create_or_fetch_session("mem-x", "alpha", None)
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[tokio::test]
    async fn test_assignment_carries_existing_rows() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        store
            .store_batch(
                BatchWrite::new("content-a", "alpha")
                    .observation(ParsedObservation::new(ObservationType::Discovery, "early")),
            )
            .await
            .unwrap();

        store.assign_memory_session_id("content-a", "mem-a").await.unwrap();

        let moved = store.observations_for_session("mem-a").await.unwrap();
        assert_eq!(moved.len(), 1);
        assert!(store.observations_for_session("content-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_counter() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();

        let p1 = store.record_user_prompt("content-a", "first").await.unwrap();
        let p2 = store.record_user_prompt("content-a", "second").await.unwrap();
        assert_eq!(p1.prompt_number, 1);
        assert_eq!(p2.prompt_number, 2);

        let session = store.get_session("content-a").await.unwrap().unwrap();
        assert_eq!(session.prompt_counter, 2);

        let prompts = store.prompts_for_session("content-a").await.unwrap();
        assert_eq!(prompts.iter().map(|p| p.prompt_text.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);

        let err = store.record_user_prompt("missing", "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        store.create_or_fetch_session("content-b", "alpha", None).await.unwrap();
        assert_eq!(store.count_active_sessions().await.unwrap(), 2);

        store.complete_session("content-a").await.unwrap();
        store.fail_session("content-b").await.unwrap();
        assert_eq!(store.count_active_sessions().await.unwrap(), 0);

        let a = store.get_session("content-a").await.unwrap().unwrap();
        assert_eq!(a.status, SessionStatus::Completed);
        assert!(a.completed_at_epoch.is_some());

        assert!(store.complete_session("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_manual_session_is_not_active() {
        let store = store().await;
        let manual = store.get_or_create_manual_session("alpha").await.unwrap();
        let again = store.get_or_create_manual_session("alpha").await.unwrap();

        assert_eq!(manual.id, again.id);
        assert_eq!(manual.content_session_id, "manual-alpha");
        assert_eq!(manual.status, SessionStatus::Completed);
        assert_eq!(store.count_active_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = store().await;
        store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        store.assign_memory_session_id("content-a", "mem-a").await.unwrap();
        store.record_user_prompt("content-a", "prompt").await.unwrap();
        store
            .store_batch(
                BatchWrite::new("mem-a", "alpha")
                    .observation(ParsedObservation::new(ObservationType::Feature, "one"))
                    .observation(ParsedObservation::new(ObservationType::Bugfix, "two"))
                    .summary(ParsedSummary {
                        request: Some("ship it".into()),
                        ..Default::default()
                    }),
            )
            .await
            .unwrap();

        assert!(store.delete_session("content-a").await.unwrap());

        assert!(store.observations_for_session("mem-a").await.unwrap().is_empty());
        assert!(store.summaries_for_session("mem-a").await.unwrap().is_empty());
        assert!(store.prompts_for_session("content-a").await.unwrap().is_empty());
        assert!(!store.delete_session("content-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_sessions_and_lookup_by_ids() {
        let store = store().await;
        let a = store.create_or_fetch_session("content-a", "alpha", None).await.unwrap();
        let b = store.create_or_fetch_session("content-b", "alpha", None).await.unwrap();
        store.create_or_fetch_session("content-c", "beta", None).await.unwrap();

        let recent = store.recent_sessions("alpha", 10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let by_ids = store.get_sessions(&[b.id, 999, a.id]).await.unwrap();
        assert_eq!(by_ids.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b.id, a.id]);
    }
}
