//! Shared domain types for the Husky assistant backend.
//!
//! These types cross crate boundaries: the vector crate owns
//! `DirectoryDocument` production, the storage crate persists threads,
//! messages, summaries and feedback, and the chat crate orchestrates over
//! all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of directory entity a document was derived from.
///
/// Each variant maps to its own vector collection with a fixed embedding
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Member,
    Team,
    Project,
    FocusArea,
    IrlEvent,
    WebDoc,
}

impl SourceType {
    /// All collections, in a stable order.
    pub const ALL: [SourceType; 6] = [
        SourceType::Member,
        SourceType::Team,
        SourceType::Project,
        SourceType::FocusArea,
        SourceType::IrlEvent,
        SourceType::WebDoc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Member => "member",
            SourceType::Team => "team",
            SourceType::Project => "project",
            SourceType::FocusArea => "focus_area",
            SourceType::IrlEvent => "irl_event",
            SourceType::WebDoc => "web_doc",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory entity as enumerated from the relational source.
///
/// This is the pipeline's input shape; the source decides which fields of
/// the underlying record are retrieval-relevant and flattens them into
/// `text` and `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntity {
    pub source_type: SourceType,
    pub source_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DirectoryEntity {
    /// Stable document id for the `(source_type, source_id)` pair.
    pub fn document_id(&self) -> String {
        format!("{}:{}", self.source_type, self.source_id)
    }
}

/// A versioned vector document mirrored from a directory entity.
///
/// Owned exclusively by the ingestion pipeline; read-only everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryDocument {
    pub id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub content_hash: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub version: u64,
}

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A conversation thread. Created on first message, never auto-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One message in a thread. Immutable once persisted.
///
/// `seq` is assigned at append time and increases by one per message within
/// a thread; timestamps are non-decreasing in `seq` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub seq: u64,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// DirectoryDocument ids cited by an assistant message.
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Lossy compression of all messages up to `covered_through`.
///
/// At most one live summary exists per thread; it is regenerated, never
/// hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub thread_id: Uuid,
    pub text: String,
    pub covered_through: Uuid,
    pub updated_at: DateTime<Utc>,
    pub token_count: u64,
}

/// User feedback on an assistant message. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub message_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Inbound chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub message: String,
    pub user_id: String,
}

/// Outcome of a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    pub thread_id: Uuid,
    pub answer: String,
    pub citations: Vec<String>,
    pub summary_updated: bool,
}

/// Report of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Entities embedded and upserted.
    pub processed: u64,
    /// Entities whose content hash was unchanged.
    pub skipped: u64,
    /// Entities whose embedding or upsert failed.
    pub failed: u64,
    /// Documents tombstone-deleted because the source entity disappeared.
    pub deleted: u64,
}
