//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use husky_chat::ResponseOrchestrator;
use husky_vector::IngestionPipeline;

/// Shared application state.
///
/// All fields are `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Chat turn coordinator; also fronts history and feedback.
    pub orchestrator: Arc<ResponseOrchestrator>,
    /// Ingestion pipeline, for the manual trigger endpoint.
    pub pipeline: Arc<IngestionPipeline>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<ResponseOrchestrator>, pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            orchestrator,
            pipeline,
            start_time: Instant::now(),
        }
    }
}
