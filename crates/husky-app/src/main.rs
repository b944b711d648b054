//! Husky application binary - composition root.
//!
//! Ties together all Husky crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Initialize storage (SQLite) and the vector store
//! 3. Build the model gateway around the configured provider
//! 4. Start the scheduled directory ingestion loop
//! 5. Start the axum REST API server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use husky_core::config::{HuskyConfig, ProviderConfig};
use husky_core::error::Result;

use husky_api::AppState;
use husky_chat::{ResponseOrchestrator, SessionManager, Summarizer};
use husky_gateway::{DynLanguageModelProvider, MockProvider, ModelGateway, OpenAiProvider};
use husky_storage::{
    Database, FeedbackRepository, SummaryCache, SummaryRepository, ThreadRepository,
};
use husky_vector::{
    DirectorySource, IngestionPipeline, JsonDirectorySource, MemoryDirectorySource,
    RetrievalEngine, VectorStore,
};

/// Embedding width for the OpenAI text-embedding-3-small family.
const OPENAI_EMBEDDING_DIMENSIONS: usize = 1536;

/// Run the scheduled ingestion loop as a background task.
///
/// The first tick fires immediately, so the index is populated at startup
/// rather than after one full interval.
async fn ingestion_loop(pipeline: Arc<IngestionPipeline>, interval_secs: u64) {
    tracing::info!(interval_secs, "Ingestion loop started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match pipeline.run().await {
            Ok(report) => tracing::info!(
                processed = report.processed,
                skipped = report.skipped,
                failed = report.failed,
                deleted = report.deleted,
                "Ingestion run complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Ingestion run failed"),
        }
    }
}

/// Construct the configured provider behind the gateway's object-safe trait.
fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn DynLanguageModelProvider>> {
    if config.kind == "openai" {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "API key env var not set; provider requests will be unauthenticated"
            );
        }
        let provider = OpenAiProvider::new(
            config.api_base_url.clone(),
            config.completion_model.clone(),
            config.embedding_model.clone(),
            config.timeout_secs,
            api_key,
            OPENAI_EMBEDDING_DIMENSIONS,
        )?;
        tracing::info!(
            base_url = %config.api_base_url,
            completion_model = %config.completion_model,
            embedding_model = %config.embedding_model,
            "OpenAI-compatible provider configured"
        );
        Ok(Arc::new(provider))
    } else {
        tracing::info!("Mock provider configured (no external calls)");
        Ok(Arc::new(MockProvider::new()))
    }
}

/// Expand ~ to home directory in a path string.
fn resolve_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Resolve the config file path (HUSKY_CONFIG env, or ~/.husky/config.toml).
fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("HUSKY_CONFIG") {
        return PathBuf::from(p);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".husky").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Config.
    let config_file = config_path();
    let config = HuskyConfig::load_or_default(&config_file);

    // Tracing. RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Husky v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_path(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("husky.db");
    let db = Arc::new(Database::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let threads = ThreadRepository::new(db.clone());
    let summaries = SummaryRepository::new(db.clone());
    let feedback = FeedbackRepository::new(db);
    let cache = Arc::new(SummaryCache::new(Duration::from_secs(
        config.chat.cache_ttl_secs,
    )));

    // Model gateway (single shared instance; owns the circuit breaker).
    let provider = build_provider(&config.provider)?;
    let gateway = ModelGateway::new(provider, config.gateway.clone());

    // Vector store and retrieval.
    let store = VectorStore::new();
    let retrieval = RetrievalEngine::new(store.clone(), gateway.clone(), config.retrieval.clone());

    // Conversation layer.
    let session = Arc::new(SessionManager::new(
        threads.clone(),
        summaries.clone(),
        feedback,
        cache,
        config.chat.clone(),
    ));
    let summarizer = Summarizer::new(
        gateway.clone(),
        threads,
        summaries,
        config.chat.recent_window,
    );
    let orchestrator = Arc::new(ResponseOrchestrator::new(
        session,
        retrieval,
        gateway.clone(),
        summarizer,
        config.provider.temperature,
    ));

    // Directory source: file-backed when a path is configured, in-memory
    // otherwise (entities arrive via the API in that mode).
    let source: Arc<dyn DirectorySource> = if config.ingest.source_path.is_empty() {
        tracing::info!("Using in-memory directory source");
        Arc::new(MemoryDirectorySource::new(Vec::new()))
    } else {
        let source_path = resolve_path(&config.ingest.source_path);
        tracing::info!(path = %source_path.display(), "Using JSON directory source");
        Arc::new(JsonDirectorySource::new(source_path))
    };
    let pipeline = Arc::new(IngestionPipeline::new(
        source,
        store,
        gateway,
        config.ingest.concurrency,
    ));

    // Scheduled ingestion.
    let pipeline_bg = Arc::clone(&pipeline);
    let ingest_interval = config.ingest.interval_secs;
    tokio::spawn(async move {
        ingestion_loop(pipeline_bg, ingest_interval).await;
    });

    // API server.
    let port = std::env::var("HUSKY_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(config.general.port);

    let state = AppState::new(orchestrator, pipeline);
    husky_api::start_server(port, state).await?;

    Ok(())
}
