//! Route handler functions for all API endpoints.
//!
//! Handlers extract JSON bodies and path parameters, call into the
//! orchestrator or pipeline, and serialize camelCase wire responses.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use husky_core::types::{ChatTurnRequest, IngestReport, Message};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponseBody {
    pub thread_id: Uuid,
    pub answer: String,
    pub citations: Vec<String>,
    pub summary_updated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    pub thread_id: Uuid,
    pub message_id: Uuid,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub seq: u64,
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub citations: Vec<String>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            seq: m.seq,
            role: m.role.as_str().to_string(),
            text: m.text,
            timestamp: m.timestamp,
            citations: m.citations,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessagesResponse {
    pub thread_id: Uuid,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /chat - run one chat turn.
///
/// The turn runs on its own task under a cancellation token that fires
/// when this request future is dropped, which is how a client disconnect
/// arrives here. A disconnected turn stops promptly and persists no
/// assistant message.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    let request = ChatTurnRequest {
        thread_id: body.thread_id,
        message: body.message,
        user_id: body.user_id,
    };
    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);
    let turn = tokio::spawn(async move { orchestrator.handle_turn(request, cancel).await });
    let response = turn
        .await
        .map_err(|e| ApiError::Internal(format!("chat turn task: {e}")))??;
    Ok(Json(ChatResponseBody {
        thread_id: response.thread_id,
        answer: response.answer,
        citations: response.citations,
        summary_updated: response.summary_updated,
    }))
}

/// POST /feedback - record feedback on an assistant message.
pub async fn feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    state.orchestrator.session().record_feedback(
        body.thread_id,
        body.message_id,
        body.rating,
        body.comment,
    )?;
    Ok(Json(FeedbackResponse { accepted: true }))
}

/// POST /ingest/run - trigger an ingestion run and return its report.
pub async fn ingest_run(State(state): State<AppState>) -> Result<Json<IngestReport>, ApiError> {
    let report = state.pipeline.run().await?;
    Ok(Json(report))
}

/// GET /threads/{id}/messages - full ordered history of a thread.
pub async fn thread_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<ThreadMessagesResponse>, ApiError> {
    let session = state.orchestrator.session();
    if !session.thread_exists(thread_id)? {
        return Err(ApiError::NotFound(format!("thread {thread_id}")));
    }
    let messages = session
        .list_messages(thread_id)?
        .into_iter()
        .map(MessageResponse::from)
        .collect();
    Ok(Json(ThreadMessagesResponse {
        thread_id,
        messages,
    }))
}

/// GET /health - liveness plus uptime.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
