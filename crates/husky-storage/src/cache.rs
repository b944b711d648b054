//! TTL cache over per-thread conversation state.
//!
//! SQLite is authoritative; the cache only saves the repository reads on
//! the chat hot path. Writers must hit SQLite first and the cache second,
//! so a crash between the two can only lose a cache entry, never a write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use husky_core::error::Result;
use husky_core::types::{Message, Summary};

use crate::repository::{SummaryRepository, ThreadRepository};

/// The cached view of one thread: its latest message and current summary.
#[derive(Debug, Clone, Default)]
pub struct ThreadState {
    pub last_message: Option<Message>,
    pub summary: Option<Summary>,
}

struct CacheEntry {
    state: ThreadState,
    expires_at: Instant,
}

/// Read-through/write-through cache keyed by thread id.
///
/// Expiry is advisory: an expired entry is simply reloaded from SQLite on
/// the next read.
pub struct SummaryCache {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl SummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh cached state for a thread, if any.
    pub fn get(&self, thread_id: Uuid) -> Option<ThreadState> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&thread_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.state.clone()),
            Some(_) => {
                entries.remove(&thread_id);
                None
            }
            None => None,
        }
    }

    /// Store state for a thread. Callers must have written SQLite already.
    pub fn put(&self, thread_id: Uuid, state: ThreadState) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            thread_id,
            CacheEntry {
                state,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, thread_id: Uuid) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&thread_id);
    }

    /// Read-through load: cache hit, or repository load plus repopulation.
    pub fn read_through(
        &self,
        thread_id: Uuid,
        threads: &ThreadRepository,
        summaries: &SummaryRepository,
    ) -> Result<ThreadState> {
        if let Some(state) = self.get(thread_id) {
            return Ok(state);
        }

        let state = ThreadState {
            last_message: threads.last_messages(thread_id, 1)?.pop(),
            summary: summaries.get(thread_id)?,
        };
        self.put(thread_id, state.clone());
        Ok(state)
    }
}
