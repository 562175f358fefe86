//! Embedding provider and cache configuration

use serde::{Deserialize, Serialize};

/// Default timeout for HTTP backend requests
fn default_timeout() -> u64 {
    30
}

/// Default batch size for HTTP backend requests
fn default_batch_size() -> usize {
    100
}

fn default_hash_dimensions() -> usize {
    384
}

fn default_hash_model() -> String {
    "xxh3-hash".to_string()
}

/// Backend configuration for embedding providers
///
/// The provider is chosen once from this value at startup. There is no
/// runtime fallback from one backend to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    /// OpenAI-compatible HTTP endpoint
    ///
    /// Works with: OpenAI API, Azure OpenAI, vLLM, LM Studio,
    /// text-embeddings-inference
    Http {
        /// API endpoint URL (e.g., "https://api.openai.com/v1/embeddings")
        endpoint: String,
        /// API key (optional, can also use OPENAI_API_KEY env var)
        #[serde(default)]
        api_key: Option<String>,
        /// Model name (e.g., "text-embedding-3-small")
        model: String,
        /// Embedding dimensions
        dimensions: usize,
        /// Request timeout in seconds
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
        /// Maximum batch size for requests
        #[serde(default = "default_batch_size")]
        max_batch_size: usize,
    },

    /// Deterministic hash embeddings. No model, no network; for tests and demos.
    Hash {
        #[serde(default = "default_hash_dimensions")]
        dimensions: usize,
        #[serde(default = "default_hash_model")]
        model: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Http {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: default_timeout(),
            max_batch_size: default_batch_size(),
        }
    }
}

impl BackendConfig {
    pub fn dimensions(&self) -> usize {
        match self {
            Self::Http { dimensions, .. } | Self::Hash { dimensions, .. } => *dimensions,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Http { model, .. } | Self::Hash { model, .. } => model,
        }
    }
}

/// Embedding section of the config file
///
/// ```toml
/// [embedding]
/// backend = "http"
/// endpoint = "https://api.openai.com/v1/embeddings"
/// model = "text-embedding-3-small"
/// dimensions = 1536
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
}

/// Which entry the in-memory cache drops when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used (hits refresh recency)
    #[default]
    Lru,
    /// Insertion order (hits do not refresh)
    Fifo,
}

/// Embedding cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable caching (callers may still bypass per call)
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Maximum in-memory entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Eviction policy for the in-memory tier
    #[serde(default)]
    pub eviction: EvictionPolicy,
    /// Optional expiry for in-memory entries
    #[serde(default)]
    pub memory_ttl_secs: Option<u64>,
    /// Write-through to the configured key-value store
    #[serde(default)]
    pub persistent: bool,
    /// Expiry for persistent entries
    #[serde(default = "default_persistent_ttl")]
    pub persistent_ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_size() -> usize {
    10_000
}

fn default_persistent_ttl() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_size: default_max_size(),
            eviction: EvictionPolicy::default(),
            memory_ttl_secs: None,
            persistent: false,
            persistent_ttl_secs: default_persistent_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_backend_from_toml() {
        let config: EmbeddingConfig = toml::from_str(
            r#"
            backend = "http"
            endpoint = "http://localhost:8080/v1/embeddings"
            model = "bge-m3"
            dimensions = 1024
            "#,
        )
        .unwrap();
        match config.backend {
            BackendConfig::Http {
                endpoint,
                timeout_secs,
                max_batch_size,
                ..
            } => {
                assert_eq!(endpoint, "http://localhost:8080/v1/embeddings");
                assert_eq!(timeout_secs, 30);
                assert_eq!(max_batch_size, 100);
            }
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_hash_backend_defaults() {
        let config: EmbeddingConfig = toml::from_str(r#"backend = "hash""#).unwrap();
        assert_eq!(config.backend.dimensions(), 384);
        assert_eq!(config.backend.model(), "xxh3-hash");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result: Result<EmbeddingConfig, _> = toml::from_str(r#"backend = "local""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_size, 10_000);
        assert_eq!(config.eviction, EvictionPolicy::Lru);
        assert_eq!(config.persistent_ttl_secs, 86_400);
    }
}
