//! SQLite persistence for the Husky assistant: threads, messages,
//! summaries, and feedback, plus the TTL thread-state cache in front of
//! them.

pub mod cache;
pub mod db;
pub mod migrations;
pub mod repository;

pub use cache::{SummaryCache, ThreadState};
pub use db::Database;
pub use repository::{FeedbackRepository, SummaryRepository, ThreadRepository};
