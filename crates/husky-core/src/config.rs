use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HuskyError, Result};

/// Top-level configuration for the Husky assistant backend.
///
/// Loaded from `~/.husky/config.toml` by default. Each section corresponds
/// to one component or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HuskyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl HuskyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HuskyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HuskyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for SQLite and the ingestion source file.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.husky/data".to_string(),
            log_level: "info".to_string(),
            port: 3080,
        }
    }
}

/// Language-model provider selection and endpoint settings.
///
/// Exactly one concrete provider is constructed at process start from this
/// section; nothing re-selects at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider kind: "openai" (any OpenAI-compatible endpoint) or "mock".
    pub kind: String,
    /// Base URL, e.g. "https://api.openai.com/v1".
    pub api_base_url: String,
    /// Chat completion model name.
    pub completion_model: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Environment variable holding the API key (never the key itself).
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "mock".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key_env: "HUSKY_API_KEY".to_string(),
            timeout_secs: 30,
            temperature: 0.2,
        }
    }
}

/// Retry and circuit-breaker policy for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Total attempts per call (first try included).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// Cool-down before a trial call is admitted again.
    pub breaker_cooldown_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
        }
    }
}

/// Retrieval Engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Top-k candidates requested per collection.
    pub k_per_collection: usize,
    /// Minimum cosine similarity for a candidate to survive.
    pub min_similarity: f64,
    /// Global maximum number of grounding documents per query.
    pub max_context: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_per_collection: 5,
            min_similarity: 0.75,
            max_context: 8,
        }
    }
}

/// Conversation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum user message length in characters.
    pub max_message_len: usize,
    /// Raw messages kept verbatim in the prompt (last-K window).
    pub recent_window: usize,
    /// Messages accumulated past the summary's coverage before a new
    /// summary is generated.
    pub summary_trigger: usize,
    /// TTL for cached thread state, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 4_000,
            recent_window: 6,
            summary_trigger: 20,
            cache_ttl_secs: 600,
        }
    }
}

/// Ingestion pipeline schedule and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Seconds between scheduled runs.
    pub interval_secs: u64,
    /// Bounded parallelism for embedding calls within a run. Kept smaller
    /// than chat concurrency to preserve provider rate-limit headroom.
    pub concurrency: usize,
    /// Optional path to a JSON file of directory entities (file-backed
    /// source); empty means the in-memory source.
    pub source_path: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            concurrency: 4,
            source_path: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = HuskyConfig::default();
        assert_eq!(config.retrieval.k_per_collection, 5);
        assert!((config.retrieval.min_similarity - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.max_context, 8);
        assert_eq!(config.chat.summary_trigger, 20);
        assert_eq!(config.gateway.max_attempts, 3);
        assert_eq!(config.provider.kind, "mock");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = HuskyConfig::default();
        config.chat.summary_trigger = 12;
        config.provider.kind = "openai".to_string();
        config.save(&path).unwrap();

        let loaded = HuskyConfig::load(&path).unwrap();
        assert_eq!(loaded.chat.summary_trigger, 12);
        assert_eq!(loaded.provider.kind, "openai");
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = HuskyConfig::load_or_default(Path::new("/nonexistent/husky.toml"));
        assert_eq!(config.general.port, 3080);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: HuskyConfig = toml::from_str(
            r#"
            [retrieval]
            min_similarity = 0.6
            "#,
        )
        .unwrap();
        assert!((config.retrieval.min_similarity - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.k_per_collection, 5);
        assert_eq!(config.chat.recent_window, 6);
    }

    #[test]
    fn test_ingest_concurrency_default_is_modest() {
        let config = IngestConfig::default();
        assert!(config.concurrency <= 8);
    }
}
