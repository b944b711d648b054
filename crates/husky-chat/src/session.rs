//! Per-thread session management.
//!
//! Owns thread lifecycle (load or create), the per-thread locks that
//! serialize concurrent turns, the cached thread state, and the
//! summarization trigger check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use husky_core::config::ChatConfig;
use husky_core::error::{HuskyError, Result};
use husky_core::types::{ChatRole, FeedbackEntry, Message, Summary, Thread};
use husky_storage::{
    FeedbackRepository, SummaryCache, SummaryRepository, ThreadRepository, ThreadState,
};

/// Lock-map entries are dropped once nothing else holds them, checked
/// whenever the map grows past this size.
const LOCK_CLEANUP_THRESHOLD: usize = 64;

/// Session state shared by every in-flight turn.
pub struct SessionManager {
    threads: ThreadRepository,
    summaries: SummaryRepository,
    feedback: FeedbackRepository,
    cache: Arc<SummaryCache>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    config: ChatConfig,
}

impl SessionManager {
    pub fn new(
        threads: ThreadRepository,
        summaries: SummaryRepository,
        feedback: FeedbackRepository,
        cache: Arc<SummaryCache>,
        config: ChatConfig,
    ) -> Self {
        Self {
            threads,
            summaries,
            feedback,
            cache,
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Resolve the thread for a turn: an explicit id must exist, no id
    /// starts a new thread for the user.
    pub fn load_or_create(&self, thread_id: Option<Uuid>, user_id: &str) -> Result<Thread> {
        match thread_id {
            Some(id) => self
                .threads
                .get_thread(id)?
                .ok_or_else(|| HuskyError::NotFound(format!("thread {id}"))),
            None => {
                let thread = self.threads.create_thread(user_id)?;
                debug!(thread_id = %thread.id, "created new thread");
                Ok(thread)
            }
        }
    }

    /// The serialization lock for a thread, created lazily.
    ///
    /// A second concurrent turn for the same thread queues behind the
    /// first. Unused locks are cleaned up opportunistically.
    pub fn thread_lock(&self, thread_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.len() > LOCK_CLEANUP_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(thread_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Cached state for a thread, loading from SQLite on a miss.
    pub fn thread_state(&self, thread_id: Uuid) -> Result<ThreadState> {
        self.cache
            .read_through(thread_id, &self.threads, &self.summaries)
    }

    /// Append a message and write the cache through, store first.
    pub fn append_message(
        &self,
        thread_id: Uuid,
        role: ChatRole,
        text: &str,
        citations: &[String],
    ) -> Result<Message> {
        let message = self
            .threads
            .append_message(thread_id, role, text, citations)?;
        let summary = self.summaries.get(thread_id)?;
        self.cache.put(
            thread_id,
            ThreadState {
                last_message: Some(message.clone()),
                summary,
            },
        );
        Ok(message)
    }

    /// The last `k` messages in order.
    pub fn recent_messages(&self, thread_id: Uuid, k: usize) -> Result<Vec<Message>> {
        self.threads.last_messages(thread_id, k)
    }

    pub fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>> {
        self.threads.list_messages(thread_id)
    }

    pub fn thread_exists(&self, thread_id: Uuid) -> Result<bool> {
        Ok(self.threads.get_thread(thread_id)?.is_some())
    }

    /// Whether enough messages accumulated past the current summary's
    /// coverage to regenerate it.
    pub fn needs_summary(&self, thread_id: Uuid, summary: Option<&Summary>) -> Result<bool> {
        let uncovered = self
            .threads
            .count_messages_after(thread_id, summary.map(|s| s.covered_through))?;
        Ok(uncovered > self.config.summary_trigger as u64)
    }

    /// Record feedback on an assistant message. Append-only; the message
    /// must exist in the given thread.
    pub fn record_feedback(
        &self,
        thread_id: Uuid,
        message_id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<FeedbackEntry> {
        self.feedback.record(thread_id, message_id, rating, comment)
    }

    /// Drop the cached state for a thread, forcing the next read to hit
    /// SQLite. Used after out-of-band writes like summarization.
    pub fn invalidate_cache(&self, thread_id: Uuid) {
        self.cache.invalidate(thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use husky_storage::Database;

    fn manager() -> SessionManager {
        manager_with(ChatConfig::default())
    }

    fn manager_with(config: ChatConfig) -> SessionManager {
        let db = Arc::new(Database::in_memory().unwrap());
        SessionManager::new(
            ThreadRepository::new(db.clone()),
            SummaryRepository::new(db.clone()),
            FeedbackRepository::new(db),
            Arc::new(SummaryCache::new(Duration::from_secs(60))),
            config,
        )
    }

    #[test]
    fn test_load_or_create_round_trip() {
        let manager = manager();
        let created = manager.load_or_create(None, "u-1").unwrap();
        let loaded = manager.load_or_create(Some(created.id), "u-1").unwrap();
        assert_eq!(created.id, loaded.id);

        let err = manager.load_or_create(Some(Uuid::new_v4()), "u-1").unwrap_err();
        assert!(matches!(err, HuskyError::NotFound(_)));
    }

    #[test]
    fn test_thread_lock_is_shared_per_thread() {
        let manager = manager();
        let id = Uuid::new_v4();
        let a = manager.thread_lock(id);
        let b = manager.thread_lock(id);
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.thread_lock(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn test_lock_map_cleanup_drops_unused_entries() {
        let manager = manager();
        for _ in 0..(LOCK_CLEANUP_THRESHOLD + 10) {
            // Dropped immediately, so strong_count is back to 1.
            let _ = manager.thread_lock(Uuid::new_v4());
        }
        let held = manager.thread_lock(Uuid::new_v4());
        let len = manager.locks.lock().unwrap().len();
        assert!(len <= LOCK_CLEANUP_THRESHOLD + 2);
        drop(held);
    }

    #[test]
    fn test_append_message_caches_state() {
        let manager = manager();
        let thread = manager.load_or_create(None, "u-1").unwrap();
        let msg = manager
            .append_message(thread.id, ChatRole::User, "hello", &[])
            .unwrap();

        let state = manager.thread_state(thread.id).unwrap();
        assert_eq!(state.last_message.unwrap().id, msg.id);
    }

    #[test]
    fn test_needs_summary_threshold() {
        let config = ChatConfig {
            summary_trigger: 3,
            ..ChatConfig::default()
        };
        let manager = manager_with(config);
        let thread = manager.load_or_create(None, "u-1").unwrap();

        for i in 0..3 {
            manager
                .append_message(thread.id, ChatRole::User, &format!("m{i}"), &[])
                .unwrap();
        }
        assert!(!manager.needs_summary(thread.id, None).unwrap());

        manager
            .append_message(thread.id, ChatRole::User, "m3", &[])
            .unwrap();
        assert!(manager.needs_summary(thread.id, None).unwrap());
    }

    #[test]
    fn test_record_feedback_requires_existing_message() {
        let manager = manager();
        let thread = manager.load_or_create(None, "u-1").unwrap();
        let msg = manager
            .append_message(thread.id, ChatRole::Assistant, "answer", &[])
            .unwrap();

        manager
            .record_feedback(thread.id, msg.id, 1, None)
            .unwrap();
        let err = manager
            .record_feedback(thread.id, Uuid::new_v4(), 1, None)
            .unwrap_err();
        assert!(matches!(err, HuskyError::NotFound(_)));
    }
}
