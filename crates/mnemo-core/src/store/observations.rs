//! Observation and summary storage.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::codec::{decode_list, encode_list, invalid_column};
use super::sessions::order_by_ids;
use super::{placeholders, RecordStore};
use crate::types::{
    MemoryTier, Observation, ObservationFilter, ObservationType, ParsedObservation, ParsedSummary,
    SessionSummary,
};
use crate::utils::time::format_millis;
use crate::{MnemoError, MnemoResult};

pub(crate) const OBSERVATION_COLUMNS: &str = "id, memory_session_id, project, type, title, subtitle, \
     narrative, facts, concepts, files_read, files_modified, prompt_number, discovery_tokens, \
     created_at, created_at_epoch, superseded_by, superseded_at, deprecated, deprecated_at, \
     deprecation_reason, is_stale, access_count, last_accessed_at, reference_count, memory_tier, importance";

const SUMMARY_COLUMNS: &str = "id, memory_session_id, project, request, investigated, learned, \
     completed, next_steps, notes, prompt_number, discovery_tokens, created_at, created_at_epoch";

pub(crate) fn map_observation(row: &Row) -> rusqlite::Result<Observation> {
    let obs_type: String = row.get(3)?;
    let tier: String = row.get(24)?;
    Ok(Observation {
        id: row.get(0)?,
        memory_session_id: row.get(1)?,
        project: row.get(2)?,
        obs_type: ObservationType::from_str(&obs_type)
            .ok_or_else(|| invalid_column(3, format!("invalid observation type: {obs_type}")))?,
        title: row.get(4)?,
        subtitle: row.get(5)?,
        narrative: row.get(6)?,
        facts: decode_list(row.get::<_, Option<String>>(7)?.as_deref()),
        concepts: decode_list(row.get::<_, Option<String>>(8)?.as_deref()),
        files_read: decode_list(row.get::<_, Option<String>>(9)?.as_deref()),
        files_modified: decode_list(row.get::<_, Option<String>>(10)?.as_deref()),
        prompt_number: row.get(11)?,
        discovery_tokens: row.get(12)?,
        created_at: row.get(13)?,
        created_at_epoch: row.get(14)?,
        superseded_by: row.get(15)?,
        superseded_at: row.get(16)?,
        deprecated: row.get(17)?,
        deprecated_at: row.get(18)?,
        deprecation_reason: row.get(19)?,
        is_stale: row.get(20)?,
        access_count: row.get(21)?,
        last_accessed_at: row.get(22)?,
        reference_count: row.get(23)?,
        memory_tier: MemoryTier::from_str(&tier).unwrap_or_default(),
        importance: row.get(25)?,
    })
}

fn map_summary(row: &Row) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        id: row.get(0)?,
        memory_session_id: row.get(1)?,
        project: row.get(2)?,
        request: row.get(3)?,
        investigated: row.get(4)?,
        learned: row.get(5)?,
        completed: row.get(6)?,
        next_steps: row.get(7)?,
        notes: row.get(8)?,
        prompt_number: row.get(9)?,
        discovery_tokens: row.get(10)?,
        created_at: row.get(11)?,
        created_at_epoch: row.get(12)?,
    })
}

/// Observations plus an optional summary written under one transaction.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub memory_session_id: String,
    pub project: String,
    pub observations: Vec<ParsedObservation>,
    pub summary: Option<ParsedSummary>,
    pub prompt_number: Option<i64>,
    pub discovery_tokens: i64,
    /// Original event time; defaults to now.
    pub created_at_epoch: Option<i64>,
}

impl BatchWrite {
    pub fn new(memory_session_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            memory_session_id: memory_session_id.into(),
            project: project.into(),
            observations: Vec::new(),
            summary: None,
            prompt_number: None,
            discovery_tokens: 0,
            created_at_epoch: None,
        }
    }

    pub fn observation(mut self, observation: ParsedObservation) -> Self {
        self.observations.push(observation);
        self
    }

    pub fn summary(mut self, summary: ParsedSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn prompt_number(mut self, prompt_number: i64) -> Self {
        self.prompt_number = Some(prompt_number);
        self
    }

    pub fn discovery_tokens(mut self, tokens: i64) -> Self {
        self.discovery_tokens = tokens;
        self
    }

    pub fn at(mut self, created_at_epoch: i64) -> Self {
        self.created_at_epoch = Some(created_at_epoch);
        self
    }
}

/// Row ids produced by a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub observation_ids: Vec<i64>,
    pub summary_id: Option<i64>,
    pub created_at_epoch: i64,
}

fn insert_observation(
    tx: &Transaction<'_>,
    batch: &BatchWrite,
    observation: &ParsedObservation,
    created_at: &str,
    created_at_epoch: i64,
) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT INTO observations
         (memory_session_id, project, type, title, subtitle, narrative, facts, concepts,
          files_read, files_modified, prompt_number, discovery_tokens, created_at, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            &batch.memory_session_id,
            &batch.project,
            observation.obs_type.as_str(),
            &observation.title,
            &observation.subtitle,
            &observation.narrative,
            encode_list(&observation.facts),
            encode_list(&observation.concepts),
            encode_list(&observation.files_read),
            encode_list(&observation.files_modified),
            batch.prompt_number,
            batch.discovery_tokens,
            created_at,
            created_at_epoch,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_summary(
    tx: &Transaction<'_>,
    batch: &BatchWrite,
    summary: &ParsedSummary,
    created_at: &str,
    created_at_epoch: i64,
) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT INTO session_summaries
         (memory_session_id, project, request, investigated, learned, completed, next_steps, notes,
          prompt_number, discovery_tokens, created_at, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &batch.memory_session_id,
            &batch.project,
            &summary.request,
            &summary.investigated,
            &summary.learned,
            &summary.completed,
            &summary.next_steps,
            &summary.notes,
            batch.prompt_number,
            batch.discovery_tokens,
            created_at,
            created_at_epoch,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

impl RecordStore {
    /// Write every observation and the summary of a batch, or nothing.
    ///
    /// A batch for an unknown memory session id fails on the foreign key.
    pub async fn store_batch(&self, batch: BatchWrite) -> MnemoResult<StoredBatch> {
        let created_at_epoch = batch
            .created_at_epoch
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let created_at = format_millis(created_at_epoch);

        let mut db = self.conn().await;
        let tx = db.transaction()?;

        let mut observation_ids = Vec::with_capacity(batch.observations.len());
        for observation in &batch.observations {
            observation_ids.push(insert_observation(
                &tx,
                &batch,
                observation,
                &created_at,
                created_at_epoch,
            )?);
        }

        let summary_id = match &batch.summary {
            Some(summary) => Some(insert_summary(&tx, &batch, summary, &created_at, created_at_epoch)?),
            None => None,
        };

        tx.commit()?;

        debug!(
            memory_session_id = %batch.memory_session_id,
            project = %batch.project,
            observation_count = observation_ids.len(),
            summary_id = ?summary_id,
            "Stored batch"
        );

        Ok(StoredBatch {
            observation_ids,
            summary_id,
            created_at_epoch,
        })
    }

    /// Store one observation
    pub async fn store_observation(
        &self,
        memory_session_id: &str,
        project: &str,
        observation: ParsedObservation,
        prompt_number: Option<i64>,
    ) -> MnemoResult<i64> {
        let mut batch = BatchWrite::new(memory_session_id, project).observation(observation);
        batch.prompt_number = prompt_number;
        let stored = self.store_batch(batch).await?;
        stored
            .observation_ids
            .first()
            .copied()
            .ok_or_else(|| MnemoError::invalid_operation("observation was not stored"))
    }

    /// Store a standalone summary
    pub async fn store_summary(
        &self,
        memory_session_id: &str,
        project: &str,
        summary: ParsedSummary,
        prompt_number: Option<i64>,
    ) -> MnemoResult<i64> {
        let mut batch = BatchWrite::new(memory_session_id, project).summary(summary);
        batch.prompt_number = prompt_number;
        let stored = self.store_batch(batch).await?;
        stored
            .summary_id
            .ok_or_else(|| MnemoError::invalid_operation("summary was not stored"))
    }

    /// Get an observation by id
    pub async fn get_observation(&self, id: i64) -> MnemoResult<Option<Observation>> {
        let db = self.conn().await;
        let observation = db
            .query_row(
                &format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"),
                params![id],
                map_observation,
            )
            .optional()?;
        Ok(observation)
    }

    /// Observations by id, in the order given. Unknown ids are skipped.
    pub async fn get_observations(&self, ids: &[i64]) -> MnemoResult<Vec<Observation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id IN ({})",
            placeholders(ids.len())
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(order_by_ids(ids, rows, |o| o.id))
    }

    /// Observations of one session, oldest first
    pub async fn observations_for_session(&self, memory_session_id: &str) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE memory_session_id = ?1
             ORDER BY created_at_epoch ASC, id ASC"
        ))?;
        let observations = stmt
            .query_map(params![memory_session_id], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    /// Newest non-deprecated observations of a project
    pub async fn recent_observations(&self, project: &str, limit: usize) -> MnemoResult<Vec<Observation>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE project = ?1 AND deprecated = 0
             ORDER BY created_at_epoch DESC, id DESC LIMIT ?2"
        ))?;
        let observations = stmt
            .query_map(params![project, limit as i64], map_observation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(observations)
    }

    /// Newest summaries of a project
    pub async fn recent_summaries(&self, project: &str, limit: usize) -> MnemoResult<Vec<SessionSummary>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE project = ?1
             ORDER BY created_at_epoch DESC, id DESC LIMIT ?2"
        ))?;
        let summaries = stmt
            .query_map(params![project, limit as i64], map_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Summaries by id, in the order given. Unknown ids are skipped.
    pub async fn get_summaries(&self, ids: &[i64]) -> MnemoResult<Vec<SessionSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE id IN ({})",
            placeholders(ids.len())
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), map_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(order_by_ids(ids, rows, |s| s.id))
    }

    /// Summaries of one session, oldest first. A session may have several.
    pub async fn summaries_for_session(&self, memory_session_id: &str) -> MnemoResult<Vec<SessionSummary>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE memory_session_id = ?1
             ORDER BY created_at_epoch ASC, id ASC"
        ))?;
        let summaries = stmt
            .query_map(params![memory_session_id], map_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Structured query, newest first.
    ///
    /// Concept and file membership are prefiltered in SQL over the decoded
    /// JSON elements and confirmed on the decoded lists, so malformed list
    /// columns never match.
    pub async fn query_observations(&self, filter: &ObservationFilter) -> MnemoResult<Vec<Observation>> {
        let mut sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql + Send>> = Vec::new();

        if let Some(ref project) = filter.project {
            sql.push_str(" AND project = ?");
            params_vec.push(Box::new(project.clone()));
        }

        if !filter.types.is_empty() {
            sql.push_str(&format!(" AND type IN ({})", placeholders(filter.types.len())));
            for obs_type in &filter.types {
                params_vec.push(Box::new(obs_type.as_str().to_string()));
            }
        }

        if let Some(ref concept) = filter.concept {
            sql.push_str(" AND ");
            sql.push_str(&list_contains("concepts", "lower(value) = lower(?)"));
            params_vec.push(Box::new(concept.clone()));
        }

        if let Some(ref file) = filter.file {
            sql.push_str(&format!(
                " AND ({} OR {})",
                list_contains("files_read", "instr(value, ?) > 0"),
                list_contains("files_modified", "instr(value, ?) > 0")
            ));
            params_vec.push(Box::new(file.clone()));
            params_vec.push(Box::new(file.clone()));
        }

        if let Some(from) = filter.date_from {
            sql.push_str(" AND created_at_epoch >= ?");
            params_vec.push(Box::new(from));
        }

        if let Some(to) = filter.date_to {
            sql.push_str(" AND created_at_epoch <= ?");
            params_vec.push(Box::new(to));
        }

        if !filter.include_deprecated {
            sql.push_str(" AND deprecated = 0");
        }

        sql.push_str(" ORDER BY created_at_epoch DESC, id DESC");

        let db = self.conn().await;
        let mut stmt = db.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref() as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), map_observation)?
            .collect::<Result<Vec<_>, _>>()?;

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .filter(|o| {
                filter
                    .concept
                    .as_ref()
                    .is_none_or(|c| o.concepts.iter().any(|x| x.eq_ignore_ascii_case(c)))
            })
            .filter(|o| {
                filter.file.as_ref().is_none_or(|f| {
                    o.files_read
                        .iter()
                        .chain(o.files_modified.iter())
                        .any(|path| path.contains(f.as_str()))
                })
            })
            .take(limit)
            .collect())
    }

    /// Bump access statistics after a read. Returns rows touched.
    pub async fn record_access(&self, ids: &[i64]) -> MnemoResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp_millis();
        let db = self.conn().await;

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        for id in ids {
            params_vec.push(Box::new(*id));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let changed = db.execute(
            &format!(
                "UPDATE observations SET access_count = access_count + 1, last_accessed_at = ?
                 WHERE id IN ({})",
                placeholders(ids.len())
            ),
            params_refs.as_slice(),
        )?;
        Ok(changed)
    }

    /// Set importance, clamped to 1..=10. Returns the stored value.
    pub async fn set_importance(&self, id: i64, importance: i64) -> MnemoResult<i64> {
        let clamped = importance.clamp(1, 10);
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE observations SET importance = ?2 WHERE id = ?1",
            params![id, clamped],
        )?;
        if changed == 0 {
            return Err(MnemoError::not_found("Observation", id));
        }
        Ok(clamped)
    }

    /// Flag an observation stale and link it to the observation correcting it.
    pub async fn mark_stale(&self, stale_id: i64, correction_id: i64) -> MnemoResult<()> {
        if stale_id == correction_id {
            return Err(MnemoError::invalid_operation("an observation cannot correct itself"));
        }
        let now = Utc::now().timestamp_millis();
        let mut db = self.conn().await;
        let tx = db.transaction()?;

        let correction_exists = tx
            .query_row("SELECT 1 FROM observations WHERE id = ?1", params![correction_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !correction_exists {
            return Err(MnemoError::not_found("Observation", correction_id));
        }

        let changed = tx.execute(
            "UPDATE observations
             SET is_stale = 1,
                 superseded_by = COALESCE(superseded_by, ?2),
                 superseded_at = COALESCE(superseded_at, ?3)
             WHERE id = ?1",
            params![stale_id, correction_id, now],
        )?;
        if changed == 0 {
            return Err(MnemoError::not_found("Observation", stale_id));
        }

        tx.commit()?;
        debug!(stale_id, correction_id, "Marked observation stale");
        Ok(())
    }
}

/// SQL test that some element of a JSON list column satisfies `predicate`.
/// Malformed columns never match.
fn list_contains(column: &str, predicate: &str) -> String {
    format!(
        "(CASE WHEN json_valid({column}) THEN EXISTS (SELECT 1 FROM json_each({column}) WHERE {predicate}) ELSE 0 END)"
    )
}
