//! Record store migrations
//!
//! Migrations are numbered and recorded in `schema_versions`. Each one runs
//! in its own transaction and is skipped once its version is recorded, so
//! calling [`run_migrations`] again is harmless. Optional migrations may fail
//! without aborting store construction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::MnemoResult;

/// One schema step
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    /// A failure is logged and the store continues without the capability.
    pub optional: bool,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// Outcome of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed_optional: Vec<i64>,
}

/// Version of the full-text index migration
pub const FTS_MIGRATION_VERSION: i64 = 4;

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_tables",
        optional: false,
        apply: create_core_tables,
    },
    Migration {
        version: 2,
        name: "consolidation_columns",
        optional: false,
        apply: add_consolidation_columns,
    },
    Migration {
        version: 3,
        name: "sleep_cycles",
        optional: false,
        apply: create_sleep_cycles,
    },
    Migration {
        version: FTS_MIGRATION_VERSION,
        name: "fts_index",
        optional: true,
        apply: create_fts_index,
    },
];

const SCHEMA_VERSIONS_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_versions (
        id INTEGER PRIMARY KEY,
        version INTEGER UNIQUE NOT NULL,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
";

/// Apply every migration not yet recorded.
pub fn run_migrations(conn: &Connection, migrations: &[Migration]) -> MnemoResult<MigrationReport> {
    conn.execute_batch(SCHEMA_VERSIONS_SQL)?;
    let mut report = MigrationReport::default();

    for migration in migrations {
        if is_applied(conn, migration.version)? {
            report.skipped.push(migration.version);
            continue;
        }

        match apply_one(conn, migration) {
            Ok(()) => {
                info!(version = migration.version, name = migration.name, "Applied migration");
                report.applied.push(migration.version);
            }
            Err(e) if migration.optional => {
                warn!(
                    version = migration.version,
                    name = migration.name,
                    error = %e,
                    "Optional migration failed, continuing without it"
                );
                report.failed_optional.push(migration.version);
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "Migrations complete"
    );
    Ok(report)
}

/// Whether a migration version is recorded.
pub fn is_applied(conn: &Connection, version: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM schema_versions WHERE version = ?1",
        params![version],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    (migration.apply)(&tx)?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_versions (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.name, Utc::now().to_rfc3339()],
    )?;
    tx.commit()
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

// ─────────────────────────────────────────────────────────────────────────────
// 001: sessions, observations, summaries, prompts
// ─────────────────────────────────────────────────────────────────────────────

fn create_core_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sdk_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_session_id TEXT UNIQUE NOT NULL,
            memory_session_id TEXT UNIQUE NOT NULL,
            project TEXT NOT NULL,
            user_prompt TEXT,
            prompt_counter INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            started_at_epoch INTEGER NOT NULL,
            completed_at TEXT,
            completed_at_epoch INTEGER,
            status TEXT CHECK(status IN ('active', 'completed', 'failed')) NOT NULL DEFAULT 'active'
        );

        CREATE INDEX IF NOT EXISTS idx_sdk_sessions_project ON sdk_sessions(project);
        CREATE INDEX IF NOT EXISTS idx_sdk_sessions_status ON sdk_sessions(status);
        CREATE INDEX IF NOT EXISTS idx_sdk_sessions_started ON sdk_sessions(started_at_epoch DESC);

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_session_id TEXT NOT NULL,
            project TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('discovery', 'bugfix', 'feature', 'refactor', 'change', 'decision')),
            title TEXT,
            subtitle TEXT,
            narrative TEXT,
            facts TEXT,
            concepts TEXT,
            files_read TEXT,
            files_modified TEXT,
            prompt_number INTEGER,
            discovery_tokens INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL,
            FOREIGN KEY(memory_session_id) REFERENCES sdk_sessions(memory_session_id)
                ON DELETE CASCADE ON UPDATE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(memory_session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_project ON observations(project);
        CREATE INDEX IF NOT EXISTS idx_observations_type ON observations(type);
        CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at_epoch DESC);

        CREATE TABLE IF NOT EXISTS session_summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_session_id TEXT NOT NULL,
            project TEXT NOT NULL,
            request TEXT,
            investigated TEXT,
            learned TEXT,
            completed TEXT,
            next_steps TEXT,
            notes TEXT,
            prompt_number INTEGER,
            discovery_tokens INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL,
            FOREIGN KEY(memory_session_id) REFERENCES sdk_sessions(memory_session_id)
                ON DELETE CASCADE ON UPDATE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_session_summaries_session ON session_summaries(memory_session_id);
        CREATE INDEX IF NOT EXISTS idx_session_summaries_project ON session_summaries(project);
        CREATE INDEX IF NOT EXISTS idx_session_summaries_created ON session_summaries(created_at_epoch DESC);

        CREATE TABLE IF NOT EXISTS user_prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_session_id TEXT NOT NULL,
            prompt_number INTEGER NOT NULL,
            prompt_text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL,
            FOREIGN KEY(content_session_id) REFERENCES sdk_sessions(content_session_id)
                ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_user_prompts_session ON user_prompts(content_session_id, prompt_number);
        CREATE INDEX IF NOT EXISTS idx_user_prompts_created ON user_prompts(created_at_epoch DESC);
        ",
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// 002: consolidation metadata on observations
// ─────────────────────────────────────────────────────────────────────────────

const CONSOLIDATION_COLUMNS: &[(&str, &str)] = &[
    ("superseded_by", "INTEGER"),
    ("superseded_at", "INTEGER"),
    ("deprecated", "INTEGER NOT NULL DEFAULT 0"),
    ("deprecated_at", "INTEGER"),
    ("deprecation_reason", "TEXT"),
    ("is_stale", "INTEGER NOT NULL DEFAULT 0"),
    ("access_count", "INTEGER NOT NULL DEFAULT 0"),
    ("last_accessed_at", "INTEGER"),
    ("reference_count", "INTEGER NOT NULL DEFAULT 0"),
    ("memory_tier", "TEXT NOT NULL DEFAULT 'working'"),
    ("memory_tier_updated_at", "INTEGER"),
    ("importance", "INTEGER NOT NULL DEFAULT 5"),
];

fn add_consolidation_columns(conn: &Connection) -> rusqlite::Result<()> {
    for (column, definition) in CONSOLIDATION_COLUMNS {
        if !has_column(conn, "observations", column)? {
            conn.execute_batch(&format!(
                "ALTER TABLE observations ADD COLUMN {column} {definition}"
            ))?;
        }
    }

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_observations_superseded ON observations(superseded_by);
        CREATE INDEX IF NOT EXISTS idx_observations_deprecated ON observations(deprecated);
        CREATE INDEX IF NOT EXISTS idx_observations_memory_tier ON observations(memory_tier);
        ",
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// 003: sleep cycle history
// ─────────────────────────────────────────────────────────────────────────────

fn create_sleep_cycles(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sleep_cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_type TEXT NOT NULL CHECK(cycle_type IN ('light', 'deep', 'micro', 'manual')),
            status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running', 'completed', 'failed')),
            started_at_epoch INTEGER NOT NULL,
            completed_at_epoch INTEGER,
            duration_ms INTEGER,
            observations_processed INTEGER NOT NULL DEFAULT 0,
            supersessions_detected INTEGER NOT NULL DEFAULT 0,
            chains_consolidated INTEGER NOT NULL DEFAULT 0,
            memories_deprecated INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sleep_cycles_started ON sleep_cycles(started_at_epoch DESC);
        CREATE INDEX IF NOT EXISTS idx_sleep_cycles_status ON sleep_cycles(status);
        ",
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// 004: full-text index (optional)
// ─────────────────────────────────────────────────────────────────────────────

fn create_fts_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            title, subtitle, narrative, facts, concepts,
            content='observations', content_rowid='id', tokenize='unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS observations_fts_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_fts_ad AFTER DELETE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_fts_au
        AFTER UPDATE OF title, subtitle, narrative, facts, concepts ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;

        CREATE VIRTUAL TABLE IF NOT EXISTS session_summaries_fts USING fts5(
            request, investigated, learned, completed, next_steps, notes,
            content='session_summaries', content_rowid='id', tokenize='unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS session_summaries_fts_ai AFTER INSERT ON session_summaries BEGIN
            INSERT INTO session_summaries_fts(rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES (new.id, new.request, new.investigated, new.learned, new.completed, new.next_steps, new.notes);
        END;

        CREATE TRIGGER IF NOT EXISTS session_summaries_fts_ad AFTER DELETE ON session_summaries BEGIN
            INSERT INTO session_summaries_fts(session_summaries_fts, rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES ('delete', old.id, old.request, old.investigated, old.learned, old.completed, old.next_steps, old.notes);
        END;

        CREATE VIRTUAL TABLE IF NOT EXISTS user_prompts_fts USING fts5(
            prompt_text,
            content='user_prompts', content_rowid='id', tokenize='unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS user_prompts_fts_ai AFTER INSERT ON user_prompts BEGIN
            INSERT INTO user_prompts_fts(rowid, prompt_text) VALUES (new.id, new.prompt_text);
        END;

        CREATE TRIGGER IF NOT EXISTS user_prompts_fts_ad AFTER DELETE ON user_prompts BEGIN
            INSERT INTO user_prompts_fts(user_prompts_fts, rowid, prompt_text)
            VALUES ('delete', old.id, old.prompt_text);
        END;

        INSERT INTO observations_fts(observations_fts) VALUES ('rebuild');
        INSERT INTO session_summaries_fts(session_summaries_fts) VALUES ('rebuild');
        INSERT INTO user_prompts_fts(user_prompts_fts) VALUES ('rebuild');
        ",
    )
}

/// Whether the full-text tables exist on this connection.
pub fn fts_tables_present(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master
         WHERE type = 'table' AND name IN ('observations_fts', 'session_summaries_fts', 'user_prompts_fts')",
        [],
        |row| row.get(0),
    )?;
    Ok(count == 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();

        let first = run_migrations(&conn, MIGRATIONS).unwrap();
        assert_eq!(first.applied, vec![1, 2, 3, 4]);
        assert!(first.failed_optional.is_empty());

        let second = run_migrations(&conn, MIGRATIONS).unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec![1, 2, 3, 4]);

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_versions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 4);
        assert!(fts_tables_present(&conn).unwrap());
    }

    #[test]
    fn test_column_migration_tolerates_existing_columns() {
        let conn = fresh();
        create_core_tables(&conn).unwrap();
        conn.execute_batch("ALTER TABLE observations ADD COLUMN importance INTEGER NOT NULL DEFAULT 5")
            .unwrap();

        add_consolidation_columns(&conn).unwrap();
        assert!(has_column(&conn, "observations", "memory_tier").unwrap());
        assert!(has_column(&conn, "observations", "importance").unwrap());
    }

    fn broken(_: &Connection) -> rusqlite::Result<()> {
        Err(rusqlite::Error::InvalidQuery)
    }

    #[test]
    fn test_failed_optional_migration_is_not_fatal() {
        let conn = fresh();
        let migrations = [
            Migration { version: 1, name: "core_tables", optional: false, apply: create_core_tables },
            Migration { version: 9, name: "broken_index", optional: true, apply: broken },
        ];

        let report = run_migrations(&conn, &migrations).unwrap();
        assert_eq!(report.applied, vec![1]);
        assert_eq!(report.failed_optional, vec![9]);
        assert!(!is_applied(&conn, 9).unwrap());
    }

    #[test]
    fn test_failed_required_migration_is_fatal() {
        let conn = fresh();
        let migrations = [Migration { version: 1, name: "broken", optional: false, apply: broken }];
        assert!(run_migrations(&conn, &migrations).is_err());
        assert!(!is_applied(&conn, 1).unwrap());
    }
}
