//! SQLite connection handling.
//!
//! One connection per `Database`, serialized behind a mutex. Repositories
//! run read-then-write sequences (seq assignment, timestamp clamping) as
//! multiple statements, so the lock must span the whole closure passed to
//! `with_conn`, not a single statement.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use husky_core::error::{HuskyError, Result};

use crate::migrations;

/// How long a writer waits on a locked database file before erroring.
const BUSY_TIMEOUT_MS: i64 = 5_000;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file, creating it and its parent directory on
    /// first use, and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| HuskyError::Persistence(format!("open {}: {e}", path.display())))?;
        debug!(path = %path.display(), "database opened");
        Self::prepare(conn)
    }

    /// A fresh private database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HuskyError::Persistence(format!("open in-memory database: {e}")))?;
        Self::prepare(conn)
    }

    /// Apply connection settings, then run pending migrations.
    ///
    /// WAL keeps readers unblocked during writes, foreign keys back the
    /// summary and feedback references to messages, and the busy timeout
    /// rides out another process briefly holding the file.
    fn prepare(conn: Connection) -> Result<Self> {
        let settings: [(&str, &dyn rusqlite::ToSql); 4] = [
            ("journal_mode", &"WAL"),
            ("synchronous", &"NORMAL"),
            ("foreign_keys", &true),
            ("busy_timeout", &BUSY_TIMEOUT_MS),
        ];
        for (name, value) in settings {
            conn.pragma_update(None, name, value)
                .map_err(|e| HuskyError::Persistence(format!("set pragma {name}: {e}")))?;
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` while holding the connection lock.
    ///
    /// A poisoned lock is recovered rather than surfaced: the connection
    /// itself stays valid when a panicking thread drops the guard, and
    /// every statement still reports its own errors.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("husky.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let version = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|e| HuskyError::Persistence(e.to_string()))
            })
            .unwrap();
        assert!(version >= 1);
    }

    #[test]
    fn test_settings_reapplied_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("husky.db");
        drop(Database::open(&path).unwrap());

        // journal_mode persists in the file; foreign_keys and the busy
        // timeout are per-connection and must be set again.
        let reopened = Database::open(&path).unwrap();
        reopened
            .with_conn(|conn| {
                let mode: String = conn
                    .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| HuskyError::Persistence(e.to_string()))?;
                assert_eq!(mode, "wal");

                let fk: i64 = conn
                    .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                    .map_err(|e| HuskyError::Persistence(e.to_string()))?;
                assert_eq!(fk, 1);

                let timeout: i64 = conn
                    .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
                    .map_err(|e| HuskyError::Persistence(e.to_string()))?;
                assert_eq!(timeout, BUSY_TIMEOUT_MS);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_foreign_keys_enforced_through_with_conn() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, thread_id, seq, role, text, timestamp)
                     VALUES ('m-1', 'no-such-thread', 1, 'user', 'x', 0)",
                    [],
                )
                .map_err(|e| HuskyError::Persistence(e.to_string()))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, HuskyError::Persistence(_)));
    }

    #[test]
    fn test_with_conn_returns_closure_value() {
        let db = Database::in_memory().unwrap();
        let tables = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|e| HuskyError::Persistence(e.to_string()))
            })
            .unwrap();
        // threads, messages, summaries, feedback, schema_migrations.
        assert!(tables >= 5);
    }
}
