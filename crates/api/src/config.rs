use anyhow::{Context, Result};
use extract::{LlmConfig, NerConfig, NormalizerConfig, RelationConfig};
use index::{EmbeddingConfig, Neo4jConfig, PassageConfig, QdrantConfig, RetryConfig};
use query::{FusionConfig, QueryConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

pub const CONFIG_ENV: &str = "GRAPHRAG_CONFIG";

/// Everything the service needs, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: StoreBackend,
    pub neo4j: Neo4jConfig,
    pub qdrant: QdrantConfig,
    pub ner: NerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub normalizer: NormalizerConfig,
    pub relations: RelationConfig,
    pub passages: PassageConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub router: RouterConfig,
    pub query: QueryConfig,
    pub fusion: FusionConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Neo4j for the graph, Qdrant for passages
    #[default]
    Remote,
    /// Process-local stores, lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub alias_table_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            alias_table_path: PathBuf::from("data/aliases.json"),
        }
    }
}

/// Query-time embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid by the JSON file named in `GRAPHRAG_CONFIG`, overlaid
    /// by endpoint environment variables.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .context(format!("Failed to read config file: {}", path))?;
                info!("Loaded configuration from {}", path);
                Self::from_json(&content)?
            }
            Err(_) => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config file")
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = var("NEO4J_URI") {
            self.neo4j.uri = uri;
        }
        if let Some(user) = var("NEO4J_USER") {
            self.neo4j.user = user;
        }
        if let Some(password) = var("NEO4J_PASSWORD") {
            self.neo4j.password = password;
        }
        if let Some(url) = var("QDRANT_URL") {
            self.qdrant.url = url;
        }
        if let Some(url) = var("OLLAMA_URL") {
            self.llm.url = url.clone();
            self.embedding.url = url;
        }
        if let Some(url) = var("NER_URL") {
            self.ner.url = url;
        }
        if let Some(token) = var("NER_API_TOKEN") {
            self.ner.api_token = Some(token);
        }
        if let Some(addr) = var("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.backend, StoreBackend::Remote);
        assert_eq!(config.ner.min_score, 0.6);
        assert_eq!(config.relations.confidence_threshold, 0.6);
        assert_eq!(config.passages.chunking.chunk_size, 800);
        assert_eq!(config.query.top_k, 5);
        assert_eq!(config.fusion.max_chars, 4000);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{"backend": "memory", "query": {"max_hops": 3}, "fusion": {"max_chars": 1200}}"#,
        )
        .unwrap();

        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.query.max_hops, 3);
        assert_eq!(config.query.top_k, 5);
        assert_eq!(config.fusion.max_chars, 1200);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NEO4J_URI", "bolt://graph:7687"),
            ("NEO4J_PASSWORD", "rahasia"),
            ("OLLAMA_URL", "http://ollama:11434"),
            ("BIND_ADDR", "127.0.0.1:8080"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.neo4j.uri, "bolt://graph:7687");
        assert_eq!(config.neo4j.password, "rahasia");
        assert_eq!(config.llm.url, "http://ollama:11434");
        assert_eq!(config.embedding.url, "http://ollama:11434");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.qdrant.url, AppConfig::default().qdrant.url);
    }
}
