//! Vector layer for the Husky assistant: per-collection in-memory store,
//! semantic retrieval, and the directory ingestion pipeline.

pub mod index;
pub mod ingest;
pub mod retrieval;

pub use index::{SearchHit, VectorStore};
pub use ingest::{
    DirectorySource, IngestionPipeline, JsonDirectorySource, MemoryDirectorySource,
};
pub use retrieval::{RetrievalEngine, RetrievedDocument};
