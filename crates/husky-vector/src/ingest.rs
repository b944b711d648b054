//! Directory ingestion pipeline.
//!
//! Mirrors directory entities into the vector store: SHA-256 content-hash
//! change detection, bounded-parallel embedding, versioned upserts, and
//! tombstone deletes for entities that disappeared from the source. A
//! single entity's failure never aborts the run; it is logged and counted.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use husky_core::error::{HuskyError, Result};
use husky_core::types::{DirectoryDocument, DirectoryEntity, IngestReport, SourceType};
use husky_gateway::ModelGateway;

use crate::index::VectorStore;

/// Enumerates the directory entities to mirror.
///
/// The source decides which fields of the underlying records are
/// retrieval-relevant and flattens them into text and metadata.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn entities(&self) -> Result<Vec<DirectoryEntity>>;
}

/// In-memory source, primarily for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryDirectorySource {
    entities: std::sync::Mutex<Vec<DirectoryEntity>>,
}

impl MemoryDirectorySource {
    pub fn new(entities: Vec<DirectoryEntity>) -> Self {
        Self {
            entities: std::sync::Mutex::new(entities),
        }
    }

    /// Replace the full entity set, simulating upstream changes.
    pub fn replace(&self, entities: Vec<DirectoryEntity>) {
        *self.entities.lock().unwrap_or_else(|e| e.into_inner()) = entities;
    }
}

#[async_trait]
impl DirectorySource for MemoryDirectorySource {
    async fn entities(&self) -> Result<Vec<DirectoryEntity>> {
        Ok(self
            .entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

/// File-backed source: a JSON array of directory entities, re-read on every
/// run so edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    path: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DirectorySource for JsonDirectorySource {
    async fn entities(&self) -> Result<Vec<DirectoryEntity>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            HuskyError::Persistence(format!(
                "failed to read directory source {}: {e}",
                self.path.display()
            ))
        })?;
        let entities: Vec<DirectoryEntity> = serde_json::from_str(&content)?;
        Ok(entities)
    }
}

/// The only writer to the vector store.
#[derive(Clone)]
pub struct IngestionPipeline {
    source: Arc<dyn DirectorySource>,
    store: VectorStore,
    gateway: ModelGateway,
    concurrency: usize,
}

enum Outcome {
    Processed,
    Skipped,
    Failed,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn DirectorySource>,
        store: VectorStore,
        gateway: ModelGateway,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            store,
            gateway,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one full ingestion pass and report what happened.
    ///
    /// Source enumeration failure is a run-level error; per-entity failures
    /// only show up in the report.
    pub async fn run(&self) -> Result<IngestReport> {
        let entities = self.source.entities().await?;
        let total = entities.len();

        let mut seen: HashMap<SourceType, HashSet<String>> = HashMap::new();
        for entity in &entities {
            seen.entry(entity.source_type)
                .or_default()
                .insert(entity.document_id());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for entity in entities {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let gateway = self.gateway.clone();
            tasks.spawn(async move {
                // Closed only if the semaphore is dropped, which we never do.
                let Ok(_permit) = semaphore.acquire().await else {
                    return Outcome::Failed;
                };
                ingest_one(&store, &gateway, entity).await
            });
        }

        let mut report = IngestReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Processed) => report.processed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    warn!(error = %e, "ingestion task panicked");
                    report.failed += 1;
                }
            }
        }

        report.deleted = self.tombstone_missing(&seen)?;

        info!(
            total,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            deleted = report.deleted,
            "ingestion run complete"
        );
        Ok(report)
    }

    /// Delete stored documents whose entity no longer exists in the source.
    fn tombstone_missing(&self, seen: &HashMap<SourceType, HashSet<String>>) -> Result<u64> {
        let mut deleted = 0;
        for source_type in SourceType::ALL {
            let empty = HashSet::new();
            let live = seen.get(&source_type).unwrap_or(&empty);
            for id in self.store.ids(source_type)? {
                if !live.contains(&id) && self.store.delete(source_type, &id)? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

async fn ingest_one(
    store: &VectorStore,
    gateway: &ModelGateway,
    entity: DirectoryEntity,
) -> Outcome {
    let id = entity.document_id();
    let hash = content_hash(&entity);

    let previous = match store.hash_and_version(entity.source_type, &id) {
        Ok(previous) => previous,
        Err(e) => {
            warn!(document = %id, error = %e, "hash lookup failed");
            return Outcome::Failed;
        }
    };
    if let Some((stored_hash, _)) = &previous {
        if *stored_hash == hash {
            return Outcome::Skipped;
        }
    }
    let version = previous.map(|(_, v)| v + 1).unwrap_or(1);

    let embedding = match gateway.embed(&entity.text).await {
        Ok(embedding) => embedding,
        Err(e) => {
            warn!(document = %id, error = %e, "embedding failed");
            return Outcome::Failed;
        }
    };

    let document = DirectoryDocument {
        id: id.clone(),
        source_type: entity.source_type,
        source_id: entity.source_id,
        content_hash: hash,
        text: entity.text,
        metadata: entity.metadata,
        version,
    };
    match store.upsert(document, embedding) {
        Ok(()) => Outcome::Processed,
        Err(e) => {
            warn!(document = %id, error = %e, "upsert failed");
            Outcome::Failed
        }
    }
}

/// SHA-256 over the retrieval-relevant fields. `serde_json::Value` renders
/// with sorted keys, so the metadata serialization is stable.
fn content_hash(entity: &DirectoryEntity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity.text.as_bytes());
    hasher.update(entity.metadata.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
