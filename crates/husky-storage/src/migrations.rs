//! Database schema migrations.
//!
//! Applies the initial schema: threads, messages, summaries, feedback, and
//! the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use husky_core::error::{HuskyError, Result};

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// are added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| HuskyError::Persistence(format!("failed to create migrations table: {e}")))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| HuskyError::Persistence(format!("failed to query migration version: {e}")))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Conversation threads. Created on first message, never deleted
        -- automatically.
        CREATE TABLE IF NOT EXISTS threads (
            id          TEXT PRIMARY KEY NOT NULL,
            user_id     TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_threads_user
            ON threads (user_id, created_at DESC);

        -- Messages are immutable; seq is assigned per thread at append.
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY NOT NULL,
            thread_id   TEXT NOT NULL,
            seq         INTEGER NOT NULL,
            role        TEXT NOT NULL
                        CHECK (role IN ('user', 'assistant')),
            text        TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            citations   TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE,
            UNIQUE (thread_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread_seq
            ON messages (thread_id, seq ASC);

        -- At most one live summary per thread.
        CREATE TABLE IF NOT EXISTS summaries (
            thread_id       TEXT PRIMARY KEY NOT NULL,
            text            TEXT NOT NULL,
            covered_through TEXT NOT NULL,
            updated_at      INTEGER NOT NULL,
            token_count     INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE,
            FOREIGN KEY (covered_through) REFERENCES messages(id)
        );

        -- Append-only user feedback on assistant messages.
        CREATE TABLE IF NOT EXISTS feedback (
            id          TEXT PRIMARY KEY NOT NULL,
            thread_id   TEXT NOT NULL,
            message_id  TEXT NOT NULL,
            rating      INTEGER NOT NULL,
            comment     TEXT,
            created_at  INTEGER NOT NULL,
            FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_message
            ON feedback (message_id);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| HuskyError::Persistence(format!("failed to apply migration v1: {e}")))?;

    Ok(())
}
