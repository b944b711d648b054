//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, a request body limit,
//! and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use husky_core::error::{HuskyError, Result};

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/feedback", post(handlers::feedback))
        .route("/ingest/run", post(handlers::ingest_run))
        .route("/threads/{id}/messages", get(handlers::thread_messages))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured port.
///
/// Binds to 127.0.0.1 (localhost only).
pub async fn start_server(port: u16, state: AppState) -> Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HuskyError::Config(format!("failed to bind {addr}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| HuskyError::Config(format!("server error: {e}")))?;

    Ok(())
}
