//! In-memory vector store with brute-force cosine similarity search.
//!
//! One collection per `SourceType`, each holding versioned directory
//! documents alongside their embeddings. Search is O(n) per collection,
//! which is acceptable for directory-sized datasets and can be swapped for
//! an ANN index later without touching callers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use husky_core::error::{HuskyError, Result};
use husky_core::types::{DirectoryDocument, SourceType};

/// A single hit returned from a collection search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Document id, `"<source_type>:<source_id>"`.
    pub id: String,
    pub source_type: SourceType,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
    pub text: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document: DirectoryDocument,
    embedding: Vec<f32>,
}

/// One collection: its documents plus the embedding dimension pinned by the
/// first upsert.
#[derive(Debug, Default)]
struct Collection {
    dimension: Option<usize>,
    docs: HashMap<String, StoredDocument>,
}

/// Thread-safe per-collection vector store.
///
/// Only the ingestion pipeline writes; retrieval and prompt composition
/// read. Clones share the underlying collections.
#[derive(Debug, Clone)]
pub struct VectorStore {
    collections: Arc<RwLock<HashMap<SourceType, Collection>>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace a document in its collection.
    ///
    /// The first upsert into a collection pins its embedding dimension;
    /// later upserts with a different dimension are rejected.
    pub fn upsert(&self, document: DirectoryDocument, embedding: Vec<f32>) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        let collection = collections.entry(document.source_type).or_default();

        match collection.dimension {
            None => collection.dimension = Some(embedding.len()),
            Some(dim) if dim != embedding.len() => {
                return Err(HuskyError::Validation(format!(
                    "embedding dimension {} does not match collection {} dimension {}",
                    embedding.len(),
                    document.source_type,
                    dim
                )));
            }
            Some(_) => {}
        }

        collection
            .docs
            .insert(document.id.clone(), StoredDocument { document, embedding });
        Ok(())
    }

    /// Fetch a document by id from its collection.
    pub fn get(&self, source_type: SourceType, id: &str) -> Result<Option<DirectoryDocument>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        Ok(collections
            .get(&source_type)
            .and_then(|c| c.docs.get(id))
            .map(|s| s.document.clone()))
    }

    /// Content hash and version of a stored document, if present. Used by
    /// the ingestion pipeline for change detection without cloning text.
    pub fn hash_and_version(
        &self,
        source_type: SourceType,
        id: &str,
    ) -> Result<Option<(String, u64)>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        Ok(collections.get(&source_type).and_then(|c| {
            c.docs
                .get(id)
                .map(|s| (s.document.content_hash.clone(), s.document.version))
        }))
    }

    /// Remove a document. Returns whether it existed.
    pub fn delete(&self, source_type: SourceType, id: &str) -> Result<bool> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        Ok(collections
            .get_mut(&source_type)
            .is_some_and(|c| c.docs.remove(id).is_some()))
    }

    /// All document ids currently stored in a collection.
    pub fn ids(&self, source_type: SourceType) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        Ok(collections
            .get(&source_type)
            .map(|c| c.docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Top-k nearest neighbors in one collection, sorted by descending
    /// cosine similarity. An absent or empty collection yields no hits.
    pub fn search(
        &self,
        source_type: SourceType,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| HuskyError::Index(format!("lock poisoned: {e}")))?;
        let Some(collection) = collections.get(&source_type) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<SearchHit> = collection
            .docs
            .values()
            .map(|stored| SearchHit {
                id: stored.document.id.clone(),
                source_type,
                score: cosine_similarity(query, &stored.embedding),
                text: stored.document.text.clone(),
                metadata: stored.document.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Total documents across all collections.
    pub fn len(&self) -> usize {
        self.collections
            .read()
            .map(|c| c.values().map(|col| col.docs.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity in f64 for score stability.
///
/// Returns 0.0 on length mismatch or zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source_type: SourceType, source_id: &str, text: &str) -> DirectoryDocument {
        DirectoryDocument {
            id: format!("{source_type}:{source_id}"),
            source_type,
            source_id: source_id.to_string(),
            content_hash: "h".to_string(),
            text: text.to_string(),
            metadata: serde_json::json!({}),
            version: 1,
        }
    }

    #[test]
    fn test_upsert_and_search() {
        let store = VectorStore::new();
        store
            .upsert(doc(SourceType::Member, "m-1", "alpha"), vec![1.0; 8])
            .unwrap();
        store
            .upsert(doc(SourceType::Member, "m-2", "beta"), vec![1.0; 8])
            .unwrap();

        assert_eq!(store.len(), 2);
        let hits = store.search(SourceType::Member, &vec![1.0; 8], 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = VectorStore::new();
        store
            .upsert(doc(SourceType::Member, "m-1", "alpha"), vec![1.0; 8])
            .unwrap();
        store
            .upsert(doc(SourceType::Team, "t-1", "beta"), vec![1.0; 8])
            .unwrap();

        let hits = store.search(SourceType::Team, &vec![1.0; 8], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "team:t-1");
    }

    #[test]
    fn test_dimension_pinned_on_first_upsert() {
        let store = VectorStore::new();
        store
            .upsert(doc(SourceType::Project, "p-1", "a"), vec![1.0; 8])
            .unwrap();

        let err = store
            .upsert(doc(SourceType::Project, "p-2", "b"), vec![1.0; 16])
            .unwrap_err();
        assert!(matches!(err, HuskyError::Validation(_)));

        // Other collections pin independently.
        store
            .upsert(doc(SourceType::Team, "t-1", "c"), vec![1.0; 16])
            .unwrap();
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let store = VectorStore::new();
        let mut d = doc(SourceType::Member, "m-1", "first");
        store.upsert(d.clone(), vec![1.0; 8]).unwrap();
        d.text = "second".to_string();
        d.version = 2;
        store.upsert(d, vec![0.5; 8]).unwrap();

        assert_eq!(store.len(), 1);
        let got = store.get(SourceType::Member, "member:m-1").unwrap().unwrap();
        assert_eq!(got.text, "second");
        assert_eq!(got.version, 2);
    }

    #[test]
    fn test_delete() {
        let store = VectorStore::new();
        store
            .upsert(doc(SourceType::Member, "m-1", "a"), vec![1.0; 8])
            .unwrap();
        assert!(store.delete(SourceType::Member, "member:m-1").unwrap());
        assert!(!store.delete(SourceType::Member, "member:m-1").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_search_missing_collection_is_empty() {
        let store = VectorStore::new();
        let hits = store.search(SourceType::WebDoc, &vec![1.0; 8], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_respects_k() {
        let store = VectorStore::new();
        for i in 0..10 {
            store
                .upsert(doc(SourceType::Member, &format!("m-{i}"), "t"), vec![1.0; 8])
                .unwrap();
        }
        let hits = store.search(SourceType::Member, &vec![1.0; 8], 3).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_hash_and_version_lookup() {
        let store = VectorStore::new();
        let mut d = doc(SourceType::Member, "m-1", "a");
        d.content_hash = "abc123".to_string();
        d.version = 4;
        store.upsert(d, vec![1.0; 8]).unwrap();

        let (hash, version) = store
            .hash_and_version(SourceType::Member, "member:m-1")
            .unwrap()
            .unwrap();
        assert_eq!(hash, "abc123");
        assert_eq!(version, 4);
        assert!(store
            .hash_and_version(SourceType::Member, "member:m-9")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let mut a = vec![0.0f32; 8];
        let mut b = vec![0.0f32; 8];
        a[0] = 1.0;
        b[1] = 1.0;
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_zero_and_mismatch() {
        assert_eq!(cosine_similarity(&[0.0; 8], &[1.0; 8]), 0.0);
        assert_eq!(cosine_similarity(&[1.0; 4], &[1.0; 8]), 0.0);
    }
}
