//! Conversation layer: per-thread session management, summarization, prompt
//! composition, and the response orchestrator tying retrieval and the model
//! gateway together.

pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod summarizer;

pub use error::ChatError;
pub use orchestrator::ResponseOrchestrator;
pub use session::SessionManager;
pub use summarizer::Summarizer;
