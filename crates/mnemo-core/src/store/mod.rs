//! Record Store
//!
//! SQLite-backed storage for sessions, observations, summaries, user prompts
//! and sleep-cycle history. The store is the only owner of persisted state;
//! everything else reads and writes through it.
//!
//! ## Integrity
//!
//! Foreign keys are enforced on every connection. Observations and summaries
//! reference `sdk_sessions.memory_session_id` with cascade delete and cascade
//! update, so rows written under the placeholder id follow the session when
//! its memory session id is assigned. Constraint failures are returned as
//! errors for which [`MnemoError::is_integrity_violation`] holds.
//!
//! [`MnemoError::is_integrity_violation`]: crate::MnemoError::is_integrity_violation

mod codec;
mod consolidation;
mod cycles;
mod migrations;
mod observations;
mod sessions;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::MnemoResult;

pub use codec::{decode_list, encode_list};
pub use consolidation::{ChainReport, TierUpdate};
pub use cycles::{CycleCounts, CycleTotals};
pub use migrations::{run_migrations, Migration, MigrationReport, FTS_MIGRATION_VERSION, MIGRATIONS};
pub use observations::{BatchWrite, StoredBatch};
pub use sessions::new_memory_session_id;

/// Shared handle to the record database.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Connection>>,
    fts_available: Arc<AtomicBool>,
}

impl RecordStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> MnemoResult<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> MnemoResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> MnemoResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let report = run_migrations(&conn, MIGRATIONS)?;
        let fts_available = migrations::fts_tables_present(&conn)?;
        if !fts_available {
            warn!(
                failed_optional = ?report.failed_optional,
                "Full-text index unavailable, keyword search will fall back to structured queries"
            );
        }

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            fts_available: Arc::new(AtomicBool::new(fts_available)),
        })
    }

    /// Whether the full-text tables were created.
    pub fn fts_available(&self) -> bool {
        self.fts_available.load(Ordering::Relaxed)
    }

    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().await
    }
}

/// `?, ?, ?` for `n` parameters
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
