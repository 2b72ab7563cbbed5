//! Keyword backend over the SQLite full-text tables.

use async_trait::async_trait;
use rusqlite::ToSql;
use tracing::debug;

use super::backend::{BackendFilter, DocKind, DocRef, KeywordBackend, KeywordHit};
use crate::store::{placeholders, RecordStore};
use crate::{MnemoError, MnemoResult};

/// BM25 ranking over `observations_fts`, `session_summaries_fts` and
/// `user_prompts_fts`.
#[derive(Clone)]
pub struct FtsKeywordBackend {
    store: RecordStore,
}

impl FtsKeywordBackend {
    /// `None` when the store has no full-text tables.
    pub fn new(store: RecordStore) -> Option<Self> {
        store.fts_available().then_some(Self { store })
    }
}

/// Reduce every whitespace-separated token to its word characters, quote
/// it and join with OR, so user input never reaches the FTS5 query syntax.
/// Returns `None` when nothing searchable remains.
pub fn to_match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|token| token.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

type Params = Vec<Box<dyn ToSql>>;

fn run_ranked(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
    kind: DocKind,
) -> rusqlite::Result<Vec<KeywordHit>> {
    let mut stmt = conn.prepare(sql)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let hits = stmt
        .query_map(refs.as_slice(), |row| {
            let id: i64 = row.get(0)?;
            let rank: f64 = row.get(1)?;
            // bm25() is lower-is-better and negative for matches
            Ok(KeywordHit {
                doc: DocRef { kind, id },
                score: -rank,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

#[async_trait]
impl KeywordBackend for FtsKeywordBackend {
    fn name(&self) -> &str {
        "sqlite-fts"
    }

    async fn query(&self, text: &str, filter: &BackendFilter, limit: usize) -> MnemoResult<Vec<KeywordHit>> {
        let Some(expression) = to_match_expression(text) else {
            return Ok(Vec::new());
        };
        let db = self.store.conn().await;
        let mut hits = Vec::new();

        if filter.accepts(DocKind::Observation) {
            let mut sql = String::from(
                "SELECT o.id, bm25(observations_fts) AS rank
                 FROM observations_fts JOIN observations o ON o.id = observations_fts.rowid
                 WHERE observations_fts MATCH ? AND o.deprecated = 0",
            );
            let mut params: Params = vec![Box::new(expression.clone())];
            if let Some(ref project) = filter.project {
                sql.push_str(" AND o.project = ?");
                params.push(Box::new(project.clone()));
            }
            if !filter.types.is_empty() {
                sql.push_str(&format!(" AND o.type IN ({})", placeholders(filter.types.len())));
                for obs_type in &filter.types {
                    params.push(Box::new(obs_type.as_str()));
                }
            }
            sql.push_str(" ORDER BY rank LIMIT ?");
            params.push(Box::new(limit as i64));
            hits.extend(run_ranked(&db, &sql, &params, DocKind::Observation).map_err(fts_error)?);
        }

        // summaries and prompts carry no type
        let typed_only = !filter.types.is_empty();

        if filter.accepts(DocKind::Summary) && !typed_only {
            let mut sql = String::from(
                "SELECT s.id, bm25(session_summaries_fts) AS rank
                 FROM session_summaries_fts JOIN session_summaries s ON s.id = session_summaries_fts.rowid
                 WHERE session_summaries_fts MATCH ?",
            );
            let mut params: Params = vec![Box::new(expression.clone())];
            if let Some(ref project) = filter.project {
                sql.push_str(" AND s.project = ?");
                params.push(Box::new(project.clone()));
            }
            sql.push_str(" ORDER BY rank LIMIT ?");
            params.push(Box::new(limit as i64));
            hits.extend(run_ranked(&db, &sql, &params, DocKind::Summary).map_err(fts_error)?);
        }

        if filter.accepts(DocKind::Prompt) && !typed_only {
            let mut sql = String::from(
                "SELECT p.id, bm25(user_prompts_fts) AS rank
                 FROM user_prompts_fts
                 JOIN user_prompts p ON p.id = user_prompts_fts.rowid
                 JOIN sdk_sessions ss ON ss.content_session_id = p.content_session_id
                 WHERE user_prompts_fts MATCH ?",
            );
            let mut params: Params = vec![Box::new(expression)];
            if let Some(ref project) = filter.project {
                sql.push_str(" AND ss.project = ?");
                params.push(Box::new(project.clone()));
            }
            sql.push_str(" ORDER BY rank LIMIT ?");
            params.push(Box::new(limit as i64));
            hits.extend(run_ranked(&db, &sql, &params, DocKind::Prompt).map_err(fts_error)?);
        }

        debug!(query = text, hits = hits.len(), "Full-text search complete");
        Ok(hits)
    }
}

fn fts_error(e: rusqlite::Error) -> MnemoError {
    MnemoError::backend("sqlite-fts", e.to_string())
}
