//! Response orchestrator: coordinates one chat turn end to end.
//!
//! Validation, per-thread serialization, user-message persistence, inline
//! summary refresh, retrieval, prompt composition, the gateway completion,
//! and assistant-message persistence. Cancellation aborts the in-flight
//! completion and leaves no assistant message behind.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use husky_core::types::{ChatRole, ChatTurnRequest, ChatTurnResponse, Message};
use husky_gateway::{CompletionRequest, ModelGateway};
use husky_vector::RetrievalEngine;

use crate::error::ChatError;
use crate::prompt;
use crate::session::SessionManager;
use crate::summarizer::Summarizer;

pub struct ResponseOrchestrator {
    session: Arc<SessionManager>,
    retrieval: RetrievalEngine,
    gateway: ModelGateway,
    summarizer: Summarizer,
    temperature: f32,
}

impl ResponseOrchestrator {
    pub fn new(
        session: Arc<SessionManager>,
        retrieval: RetrievalEngine,
        gateway: ModelGateway,
        summarizer: Summarizer,
        temperature: f32,
    ) -> Self {
        Self {
            session,
            retrieval,
            gateway,
            summarizer,
            temperature,
        }
    }

    /// The session manager backing this orchestrator, for history and
    /// feedback access from the API layer.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Handle one chat turn, returning the full answer.
    pub async fn handle_turn(
        &self,
        request: ChatTurnRequest,
        cancel: CancellationToken,
    ) -> Result<ChatTurnResponse, ChatError> {
        self.turn_inner(request, cancel, None).await
    }

    /// Handle one chat turn, streaming answer deltas through `deltas` as
    /// they arrive. The full answer is still returned and persisted.
    pub async fn handle_turn_streaming(
        &self,
        request: ChatTurnRequest,
        cancel: CancellationToken,
        deltas: mpsc::Sender<String>,
    ) -> Result<ChatTurnResponse, ChatError> {
        self.turn_inner(request, cancel, Some(deltas)).await
    }

    async fn turn_inner(
        &self,
        request: ChatTurnRequest,
        cancel: CancellationToken,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<ChatTurnResponse, ChatError> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let max_len = self.session.config().max_message_len;
        if text.chars().count() > max_len {
            return Err(ChatError::MessageTooLong(max_len));
        }

        let thread = self
            .session
            .load_or_create(request.thread_id, &request.user_id)?;

        // Turns on the same thread run strictly one after another.
        let lock = self.session.thread_lock(thread.id);
        let _guard = lock.lock().await;

        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let user_message = self
            .session
            .append_message(thread.id, ChatRole::User, text, &[])?;

        // Refresh the summary before composing, so this turn's prompt
        // already sees it.
        let mut summary = self.session.thread_state(thread.id)?.summary;
        let mut summary_updated = false;
        if self.session.needs_summary(thread.id, summary.as_ref())? {
            if let Some(fresh) = self.summarizer.refresh(thread.id).await? {
                self.session.invalidate_cache(thread.id);
                summary = Some(fresh);
                summary_updated = true;
            }
        }

        let documents = self.retrieval.retrieve(text).await?;
        let recent = self.recent_before(thread.id, &user_message)?;
        let composed = prompt::compose(summary.as_ref(), &recent, &documents, text);

        let completion = CompletionRequest {
            system: composed.system,
            prompt: composed.prompt,
            temperature: self.temperature,
        };
        let answer = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(thread_id = %thread.id, "turn cancelled mid-completion");
                return Err(ChatError::Cancelled);
            }
            result = self.complete(&completion, deltas) => result?,
        };

        let citations = prompt::extract_citations(&answer, &composed.doc_ids);
        let assistant = self
            .session
            .append_message(thread.id, ChatRole::Assistant, &answer, &citations)?;

        info!(
            thread_id = %thread.id,
            documents = composed.doc_ids.len(),
            citations = citations.len(),
            summary_updated,
            "turn complete"
        );
        Ok(ChatTurnResponse {
            thread_id: thread.id,
            answer: assistant.text,
            citations,
            summary_updated,
        })
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<String, ChatError> {
        let answer = match deltas {
            Some(deltas) => self.gateway.complete_stream(request, deltas).await?,
            None => self.gateway.complete(request).await?,
        };
        Ok(answer)
    }

    /// Raw history for the prompt: the retained window's tail, excluding
    /// the user message being answered (it is rendered separately).
    ///
    /// The window counts the current message, so it starts right after
    /// the summary's coverage and no message appears both summarized and
    /// verbatim.
    fn recent_before(
        &self,
        thread_id: Uuid,
        current: &Message,
    ) -> Result<Vec<Message>, ChatError> {
        let window = self.session.config().recent_window;
        let mut recent = self.session.recent_messages(thread_id, window)?;
        recent.retain(|m| m.id != current.id);
        Ok(recent)
    }
}
