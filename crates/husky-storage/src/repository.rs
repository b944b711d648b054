//! Repository types over the SQLite schema.
//!
//! All SQL lives here. Repositories share one `Database`; the connection
//! mutex serializes multi-statement operations such as seq assignment, so
//! no explicit transactions are needed.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use husky_core::error::{HuskyError, Result};
use husky_core::types::{ChatRole, FeedbackEntry, Message, Summary, Thread};

use crate::db::Database;

fn pe(e: rusqlite::Error) -> HuskyError {
    HuskyError::Persistence(e.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse()
        .map_err(|e| HuskyError::Persistence(format!("invalid uuid in database: {e}")))
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Raw message row, converted to the domain type after the rusqlite
/// closure so uuid/json parse errors surface as `Persistence`.
struct MessageRow {
    id: String,
    thread_id: String,
    seq: i64,
    role: String,
    text: String,
    timestamp: i64,
    citations: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            seq: row.get(2)?,
            role: row.get(3)?,
            text: row.get(4)?,
            timestamp: row.get(5)?,
            citations: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let role = match self.role.as_str() {
            "user" => ChatRole::User,
            "assistant" => ChatRole::Assistant,
            other => {
                return Err(HuskyError::Persistence(format!(
                    "unknown message role in database: {other}"
                )))
            }
        };
        Ok(Message {
            id: parse_uuid(&self.id)?,
            thread_id: parse_uuid(&self.thread_id)?,
            seq: self.seq as u64,
            role,
            text: self.text,
            timestamp: millis_to_utc(self.timestamp),
            citations: serde_json::from_str(&self.citations)?,
        })
    }
}

const MESSAGE_COLS: &str = "id, thread_id, seq, role, text, timestamp, citations";

/// Threads and their ordered messages.
#[derive(Clone)]
pub struct ThreadRepository {
    db: Arc<Database>,
}

impl ThreadRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create_thread(&self, user_id: &str) -> Result<Thread> {
        let thread = Thread {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO threads (id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    thread.id.to_string(),
                    thread.user_id,
                    thread.created_at.timestamp_millis()
                ],
            )
            .map_err(pe)?;
            Ok(())
        })?;
        Ok(thread)
    }

    pub fn get_thread(&self, id: Uuid) -> Result<Option<Thread>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, created_at FROM threads WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(pe)?;
            row.map(|(id, user_id, created_at)| {
                Ok(Thread {
                    id: parse_uuid(&id)?,
                    user_id,
                    created_at: millis_to_utc(created_at),
                })
            })
            .transpose()
        })
    }

    /// Append a message to a thread.
    ///
    /// Assigns the next per-thread seq and clamps the timestamp so it never
    /// runs backwards relative to the previous message, even under clock
    /// adjustments. Fails with `NotFound` for an unknown thread.
    pub fn append_message(
        &self,
        thread_id: Uuid,
        role: ChatRole,
        text: &str,
        citations: &[String],
    ) -> Result<Message> {
        self.db.with_conn(|conn| {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM threads WHERE id = ?1",
                    params![thread_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(pe)?;
            if exists == 0 {
                return Err(HuskyError::NotFound(format!("thread {thread_id}")));
            }

            let (max_seq, max_ts): (i64, i64) = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0), COALESCE(MAX(timestamp), 0)
                     FROM messages WHERE thread_id = ?1",
                    params![thread_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(pe)?;

            let timestamp_ms = Utc::now().timestamp_millis().max(max_ts);
            let message = Message {
                id: Uuid::new_v4(),
                thread_id,
                seq: (max_seq + 1) as u64,
                role,
                text: text.to_string(),
                timestamp: millis_to_utc(timestamp_ms),
                citations: citations.to_vec(),
            };

            conn.execute(
                "INSERT INTO messages (id, thread_id, seq, role, text, timestamp, citations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    thread_id.to_string(),
                    message.seq as i64,
                    role.as_str(),
                    message.text,
                    timestamp_ms,
                    serde_json::to_string(&message.citations)?,
                ],
            )
            .map_err(pe)?;
            Ok(message)
        })
    }

    /// All messages of a thread in seq order.
    pub fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages WHERE thread_id = ?1 ORDER BY seq ASC"
                ))
                .map_err(pe)?;
            let rows = stmt
                .query_map(params![thread_id.to_string()], MessageRow::from_row)
                .map_err(pe)?;
            rows.map(|r| r.map_err(pe).and_then(MessageRow::into_message))
                .collect()
        })
    }

    /// The last `k` messages of a thread, in seq order.
    pub fn last_messages(&self, thread_id: Uuid, k: usize) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM (
                         SELECT {MESSAGE_COLS} FROM messages
                         WHERE thread_id = ?1 ORDER BY seq DESC LIMIT ?2
                     ) ORDER BY seq ASC"
                ))
                .map_err(pe)?;
            let rows = stmt
                .query_map(params![thread_id.to_string(), k as i64], MessageRow::from_row)
                .map_err(pe)?;
            rows.map(|r| r.map_err(pe).and_then(MessageRow::into_message))
                .collect()
        })
    }

    pub fn find_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                    params![message_id.to_string()],
                    MessageRow::from_row,
                )
                .optional()
                .map_err(pe)?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    /// Number of messages newer than `covered_through`. `None` means no
    /// summary yet, so every message counts.
    pub fn count_messages_after(
        &self,
        thread_id: Uuid,
        covered_through: Option<Uuid>,
    ) -> Result<u64> {
        self.db.with_conn(|conn| {
            let covered_seq: i64 = match covered_through {
                None => 0,
                Some(id) => conn
                    .query_row(
                        "SELECT seq FROM messages WHERE id = ?1 AND thread_id = ?2",
                        params![id.to_string(), thread_id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(pe)?
                    .unwrap_or(0),
            };
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE thread_id = ?1 AND seq > ?2",
                    params![thread_id.to_string(), covered_seq],
                    |row| row.get(0),
                )
                .map_err(pe)?;
            Ok(count as u64)
        })
    }
}

/// Per-thread conversation summaries.
#[derive(Clone)]
pub struct SummaryRepository {
    db: Arc<Database>,
}

impl SummaryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the thread's summary. `covered_through` is
    /// FK-checked against messages by the schema.
    pub fn upsert(&self, summary: &Summary) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO summaries
                     (thread_id, text, covered_through, updated_at, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    summary.thread_id.to_string(),
                    summary.text,
                    summary.covered_through.to_string(),
                    summary.updated_at.timestamp_millis(),
                    summary.token_count as i64,
                ],
            )
            .map_err(pe)?;
            Ok(())
        })
    }

    pub fn get(&self, thread_id: Uuid) -> Result<Option<Summary>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT thread_id, text, covered_through, updated_at, token_count
                     FROM summaries WHERE thread_id = ?1",
                    params![thread_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(pe)?;
            row.map(|(thread_id, text, covered_through, updated_at, token_count)| {
                Ok(Summary {
                    thread_id: parse_uuid(&thread_id)?,
                    text,
                    covered_through: parse_uuid(&covered_through)?,
                    updated_at: millis_to_utc(updated_at),
                    token_count: token_count as u64,
                })
            })
            .transpose()
        })
    }
}

/// Append-only feedback on assistant messages.
#[derive(Clone)]
pub struct FeedbackRepository {
    db: Arc<Database>,
}

impl FeedbackRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record feedback for a message. The message must exist and belong to
    /// the given thread.
    pub fn record(
        &self,
        thread_id: Uuid,
        message_id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<FeedbackEntry> {
        self.db.with_conn(|conn| {
            let belongs: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE id = ?1 AND thread_id = ?2",
                    params![message_id.to_string(), thread_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(pe)?;
            if belongs == 0 {
                return Err(HuskyError::NotFound(format!(
                    "message {message_id} in thread {thread_id}"
                )));
            }

            let entry = FeedbackEntry {
                id: Uuid::new_v4(),
                thread_id,
                message_id,
                rating,
                comment,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO feedback (id, thread_id, message_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    thread_id.to_string(),
                    message_id.to_string(),
                    entry.rating,
                    entry.comment,
                    entry.created_at.timestamp_millis(),
                ],
            )
            .map_err(pe)?;
            Ok(entry)
        })
    }

    pub fn list_for_message(&self, message_id: Uuid) -> Result<Vec<FeedbackEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, thread_id, message_id, rating, comment, created_at
                     FROM feedback WHERE message_id = ?1 ORDER BY created_at ASC",
                )
                .map_err(pe)?;
            let rows = stmt
                .query_map(params![message_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(pe)?;
            rows.map(|r| {
                let (id, thread_id, message_id, rating, comment, created_at) = r.map_err(pe)?;
                Ok(FeedbackEntry {
                    id: parse_uuid(&id)?,
                    thread_id: parse_uuid(&thread_id)?,
                    message_id: parse_uuid(&message_id)?,
                    rating,
                    comment,
                    created_at: millis_to_utc(created_at),
                })
            })
            .collect()
        })
    }
}
