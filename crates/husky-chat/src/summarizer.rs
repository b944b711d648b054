//! Gateway-driven conversation summarization.
//!
//! Compresses everything older than the retained raw-message window into a
//! single summary row. Coverage always ends exactly where the retained
//! window begins, so the prompt composer never has a gap or an overlap.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use husky_core::error::Result;
use husky_core::types::{Message, Summary};
use husky_gateway::{CompletionRequest, ModelGateway};
use husky_storage::{SummaryRepository, ThreadRepository};

const SUMMARY_SYSTEM_PROMPT: &str = "\
You compress conversations for a directory assistant. Produce a short \
factual summary of the exchange below, keeping names, teams, projects, and \
the user's standing questions. No preamble, no commentary.";

pub struct Summarizer {
    gateway: ModelGateway,
    threads: ThreadRepository,
    summaries: SummaryRepository,
    /// Messages left out of the summary and kept verbatim in prompts.
    recent_window: usize,
}

impl Summarizer {
    pub fn new(
        gateway: ModelGateway,
        threads: ThreadRepository,
        summaries: SummaryRepository,
        recent_window: usize,
    ) -> Self {
        Self {
            gateway,
            threads,
            summaries,
            recent_window,
        }
    }

    /// Regenerate the thread's summary.
    ///
    /// Returns `None` when the thread is still short enough that nothing
    /// falls outside the retained window. The new summary replaces the old
    /// one; the previous summary text seeds the prompt so earlier context
    /// is carried forward.
    pub async fn refresh(&self, thread_id: Uuid) -> Result<Option<Summary>> {
        let messages = self.threads.list_messages(thread_id)?;
        if messages.len() <= self.recent_window {
            return Ok(None);
        }

        let cut = messages.len() - self.recent_window;
        let covered_through = messages[cut - 1].id;
        let previous = self.summaries.get(thread_id)?;

        let request = CompletionRequest {
            system: SUMMARY_SYSTEM_PROMPT.to_string(),
            prompt: summary_prompt(previous.as_ref(), &messages[..cut]),
            temperature: 0.1,
        };
        let text = self.gateway.complete(&request).await?;

        let summary = Summary {
            thread_id,
            token_count: estimate_tokens(&text),
            text,
            covered_through,
            updated_at: Utc::now(),
        };
        self.summaries.upsert(&summary)?;
        info!(
            thread_id = %thread_id,
            covered_messages = cut,
            "summary refreshed"
        );
        Ok(Some(summary))
    }
}

fn summary_prompt(previous: Option<&Summary>, messages: &[Message]) -> String {
    let mut prompt = String::new();
    if let Some(previous) = previous {
        prompt.push_str("Earlier summary:\n");
        prompt.push_str(&previous.text);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Messages to fold in:\n");
    for message in messages {
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&message.text);
        prompt.push('\n');
    }
    prompt
}

/// Rough token estimate, good enough for budget accounting.
fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use husky_core::config::GatewayConfig;
    use husky_core::types::ChatRole;
    use husky_gateway::MockProvider;
    use husky_storage::Database;

    fn setup(reply: &str) -> (Summarizer, ThreadRepository, SummaryRepository) {
        let db = Arc::new(Database::in_memory().unwrap());
        let threads = ThreadRepository::new(db.clone());
        let summaries = SummaryRepository::new(db);
        let gateway = ModelGateway::new(
            Arc::new(MockProvider::with_reply(reply)),
            GatewayConfig::default(),
        );
        (
            Summarizer::new(gateway, threads.clone(), summaries.clone(), 6),
            threads,
            summaries,
        )
    }

    #[tokio::test]
    async fn test_short_thread_is_not_summarized() {
        let (summarizer, threads, summaries) = setup("unused");
        let thread = threads.create_thread("u-1").unwrap();
        for i in 0..6 {
            threads
                .append_message(thread.id, ChatRole::User, &format!("m{i}"), &[])
                .unwrap();
        }

        assert!(summarizer.refresh(thread.id).await.unwrap().is_none());
        assert!(summaries.get(thread.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_coverage_meets_retained_window() {
        let (summarizer, threads, summaries) = setup("they discussed climate teams");
        let thread = threads.create_thread("u-1").unwrap();
        let mut ids = Vec::new();
        for i in 0..10 {
            let msg = threads
                .append_message(thread.id, ChatRole::User, &format!("m{i}"), &[])
                .unwrap();
            ids.push(msg.id);
        }

        let summary = summarizer.refresh(thread.id).await.unwrap().unwrap();
        // 10 messages, window 6: coverage ends at the 4th message.
        assert_eq!(summary.covered_through, ids[3]);
        assert_eq!(summary.text, "they discussed climate teams");
        assert!(summary.token_count > 0);

        // Exactly the retained window remains uncovered.
        let uncovered = threads
            .count_messages_after(thread.id, Some(summary.covered_through))
            .unwrap();
        assert_eq!(uncovered, 6);
        assert!(summaries.get(thread.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_advances_coverage() {
        let (summarizer, threads, _summaries) = setup("rolling summary");
        let thread = threads.create_thread("u-1").unwrap();
        for i in 0..10 {
            threads
                .append_message(thread.id, ChatRole::User, &format!("m{i}"), &[])
                .unwrap();
        }
        let first = summarizer.refresh(thread.id).await.unwrap().unwrap();

        for i in 10..14 {
            threads
                .append_message(thread.id, ChatRole::User, &format!("m{i}"), &[])
                .unwrap();
        }
        let second = summarizer.refresh(thread.id).await.unwrap().unwrap();
        assert_ne!(first.covered_through, second.covered_through);

        let uncovered = threads
            .count_messages_after(thread.id, Some(second.covered_through))
            .unwrap();
        assert_eq!(uncovered, 6);
    }
}
