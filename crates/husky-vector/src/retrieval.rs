//! Semantic retrieval across all directory collections.
//!
//! Embeds the query once, fans the vector out to every collection, then
//! merges, deduplicates, filters by similarity, and truncates to the
//! context budget.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use husky_core::config::RetrievalConfig;
use husky_core::error::Result;
use husky_core::types::SourceType;
use husky_gateway::ModelGateway;

use crate::index::{SearchHit, VectorStore};

/// A grounding document selected for a query.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub id: String,
    pub source_type: SourceType,
    pub score: f64,
    pub text: String,
    pub metadata: Value,
}

/// Query-time retrieval over the vector store.
#[derive(Clone)]
pub struct RetrievalEngine {
    store: VectorStore,
    gateway: ModelGateway,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(store: VectorStore, gateway: ModelGateway, config: RetrievalConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Retrieve the grounding set for a query.
    ///
    /// The query is embedded exactly once per call. Candidates below the
    /// similarity floor are dropped; survivors are sorted by descending
    /// score with ties broken by newest metadata `updated_at`, then cut to
    /// the context budget. No matches is a normal outcome, not an error.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let query_vec = self.gateway.embed(query).await?;

        let mut candidates = Vec::new();
        for source_type in SourceType::ALL {
            let hits = self
                .store
                .search(source_type, &query_vec, self.config.k_per_collection)?;
            candidates.extend(hits);
        }

        let mut merged = merge_hits(candidates);
        merged.retain(|h| h.score >= self.config.min_similarity);
        sort_hits(&mut merged);
        merged.truncate(self.config.max_context);

        debug!(results = merged.len(), "retrieval complete");
        Ok(merged
            .into_iter()
            .map(|h| RetrievedDocument {
                id: h.id,
                source_type: h.source_type,
                score: h.score,
                text: h.text,
                metadata: h.metadata,
            })
            .collect())
    }
}

/// Deduplicate by document id, keeping the highest-scoring hit.
fn merge_hits(candidates: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut by_id: std::collections::HashMap<String, SearchHit> = std::collections::HashMap::new();
    for hit in candidates {
        match by_id.get(&hit.id) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                by_id.insert(hit.id.clone(), hit);
            }
        }
    }
    by_id.into_values().collect()
}

/// Descending by score; equal scores prefer the most recently updated
/// document per its metadata.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| updated_at(&b.metadata).cmp(&updated_at(&a.metadata)))
    });
}

fn updated_at(metadata: &Value) -> Option<DateTime<Utc>> {
    metadata
        .get("updated_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use husky_core::config::GatewayConfig;
    use husky_core::types::DirectoryDocument;
    use husky_gateway::provider::LanguageModelProvider;
    use husky_gateway::MockProvider;

    fn engine_with_store(config: RetrievalConfig) -> (RetrievalEngine, VectorStore) {
        let store = VectorStore::new();
        let gateway = ModelGateway::new(Arc::new(MockProvider::new()), GatewayConfig::default());
        (
            RetrievalEngine::new(store.clone(), gateway, config),
            store,
        )
    }

    async fn insert(store: &VectorStore, source_type: SourceType, source_id: &str, text: &str) {
        insert_with_meta(store, source_type, source_id, text, serde_json::json!({})).await;
    }

    async fn insert_with_meta(
        store: &VectorStore,
        source_type: SourceType,
        source_id: &str,
        text: &str,
        metadata: Value,
    ) {
        let embedding = MockProvider::new().embed(text).await.unwrap();
        store
            .upsert(
                DirectoryDocument {
                    id: format!("{source_type}:{source_id}"),
                    source_type,
                    source_id: source_id.to_string(),
                    content_hash: "h".to_string(),
                    text: text.to_string(),
                    metadata,
                    version: 1,
                },
                embedding,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_returns_ok_empty() {
        let (engine, _store) = engine_with_store(RetrievalConfig::default());
        let results = engine.retrieve("anything at all").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_and_budget_across_collections() {
        // Defaults per the product brief: k=5 per collection, floor 0.75,
        // at most 8 grounding documents.
        let config = RetrievalConfig {
            k_per_collection: 5,
            min_similarity: 0.75,
            max_context: 8,
        };
        let (engine, store) = engine_with_store(config);

        let query = "who is working on climate tech?";
        // Ten exact matches spread over two collections, plus noise that
        // lands far below the similarity floor.
        for i in 0..5 {
            insert(&store, SourceType::Member, &format!("m-{i}"), query).await;
            insert(&store, SourceType::Project, &format!("p-{i}"), query).await;
        }
        for i in 0..5 {
            insert(
                &store,
                SourceType::Team,
                &format!("t-{i}"),
                &format!("unrelated payroll record {i}"),
            )
            .await;
        }

        let results = engine.retrieve(query).await.unwrap();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.score >= 0.75));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_low_similarity_filtered_out() {
        let config = RetrievalConfig {
            min_similarity: 0.99,
            ..RetrievalConfig::default()
        };
        let (engine, store) = engine_with_store(config);
        insert(&store, SourceType::Member, "m-1", "completely different topic").await;

        let results = engine.retrieve("who runs the storage team?").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ties_prefer_newest_updated_at() {
        let (engine, store) = engine_with_store(RetrievalConfig::default());
        let query = "rust compiler experts";
        insert_with_meta(
            &store,
            SourceType::Member,
            "old",
            query,
            serde_json::json!({"updated_at": "2026-01-01T00:00:00Z"}),
        )
        .await;
        insert_with_meta(
            &store,
            SourceType::Member,
            "new",
            query,
            serde_json::json!({"updated_at": "2026-06-01T00:00:00Z"}),
        )
        .await;

        let results = engine.retrieve(query).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "member:new");
    }

    #[test]
    fn test_merge_keeps_max_score_per_id() {
        let hit = |id: &str, score: f64| SearchHit {
            id: id.to_string(),
            source_type: SourceType::Member,
            score,
            text: String::new(),
            metadata: serde_json::json!({}),
        };
        let merged = merge_hits(vec![hit("a", 0.8), hit("a", 0.95), hit("b", 0.5)]);
        assert_eq!(merged.len(), 2);
        let a = merged.iter().find(|h| h.id == "a").unwrap();
        assert!((a.score - 0.95).abs() < 1e-9);
    }
}
