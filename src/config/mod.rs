//! Configuration for the retrieval engine

mod embedding;
mod logging;
mod retrieval;
mod storage;

pub use embedding::{BackendConfig, CacheConfig, EmbeddingConfig, EvictionPolicy};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use retrieval::{
    Bm25Config, FusionMethod, HybridConfig, RerankerBackend, RerankerConfig, SegmenterKind,
    TokenizerConfig,
};
pub use storage::{DistanceMetric, StorageConfig, VectorBackend, VectorStoreConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound accepted for embedding dimensions
const MAX_EMBEDDING_DIMENSIONS: usize = 8192;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Embedding provider
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Embedding cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Tokenizer used by the lexical index
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    /// BM25 parameters
    #[serde(default)]
    pub bm25: Bm25Config,
    /// Fusion and hybrid orchestration
    #[serde(default)]
    pub hybrid: HybridConfig,
    /// Cross-encoder reranking
    #[serde(default)]
    pub reranker: RerankerConfig,
    /// External vector index
    #[serde(default)]
    pub vector: VectorStoreConfig,
    /// Key-value persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML (used by `init`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate all configuration fields.
    ///
    /// Collects every validation error and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Embedding validation
        let dimensions = self.embedding.backend.dimensions();
        if dimensions == 0 {
            errors.push("embedding dimensions must be positive".to_string());
        }
        if dimensions > MAX_EMBEDDING_DIMENSIONS {
            errors.push(format!(
                "embedding dimensions must be <= {}",
                MAX_EMBEDDING_DIMENSIONS
            ));
        }
        if let BackendConfig::Http {
            endpoint,
            timeout_secs,
            max_batch_size,
            ..
        } = &self.embedding.backend
        {
            if endpoint.trim().is_empty() {
                errors.push("embedding endpoint must not be empty".to_string());
            }
            if *timeout_secs == 0 {
                errors.push("embedding timeout_secs must be positive".to_string());
            }
            if *max_batch_size == 0 {
                errors.push("embedding max_batch_size must be positive".to_string());
            }
        }

        // Cache validation
        if self.cache.max_size == 0 {
            errors.push("cache max_size must be positive".to_string());
        }
        if self.cache.memory_ttl_secs == Some(0) {
            errors.push("cache memory_ttl_secs must be positive when set".to_string());
        }
        if self.cache.persistent && self.cache.persistent_ttl_secs == 0 {
            errors.push("cache persistent_ttl_secs must be positive".to_string());
        }

        // Tokenizer validation
        if self.tokenizer.max_token_length == 0 {
            errors.push("tokenizer max_token_length must be positive".to_string());
        }
        if self.tokenizer.segmenter == SegmenterKind::Dictionary
            && self.tokenizer.dictionary_path.is_none()
        {
            errors.push("dictionary segmenter requires dictionary_path".to_string());
        }

        // BM25 validation
        if !self.bm25.k1.is_finite() || self.bm25.k1 < 0.0 {
            errors.push("bm25 k1 must be a non-negative number".to_string());
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            errors.push("bm25 b must be between 0.0 and 1.0".to_string());
        }

        // Hybrid validation
        if self.hybrid.vector_weight < 0.0 || self.hybrid.bm25_weight < 0.0 {
            errors.push("fusion weights must be non-negative".to_string());
        }
        if self.hybrid.vector_weight + self.hybrid.bm25_weight <= 0.0 {
            errors.push("at least one fusion weight must be positive".to_string());
        }
        if self.hybrid.rrf_k == 0 {
            errors.push("rrf_k must be positive".to_string());
        }
        if self.hybrid.candidate_multiplier == 0 {
            errors.push("candidate_multiplier must be positive".to_string());
        }
        if self.hybrid.rerank_candidates == 0 {
            errors.push("rerank_candidates must be positive".to_string());
        }
        if self.hybrid.source_timeout_ms == Some(0) {
            errors.push("source_timeout_ms must be positive when set".to_string());
        }

        // Reranker validation
        if self.reranker.batch_size == 0 {
            errors.push("reranker batch_size must be positive".to_string());
        }
        match &self.reranker.backend {
            RerankerBackend::Http { endpoint, .. } if endpoint.trim().is_empty() => {
                errors.push("reranker endpoint must not be empty".to_string());
            }
            RerankerBackend::Onnx { .. } if !cfg!(feature = "onnx") => {
                errors.push("onnx reranker requires building with the `onnx` feature".to_string());
            }
            _ => {}
        }

        // Vector store validation
        if self.vector.collection.trim().is_empty() {
            errors.push("vector collection must not be empty".to_string());
        }
        if let VectorBackend::Qdrant { url, .. } = &self.vector.backend {
            if url.trim().is_empty() {
                errors.push("qdrant url must not be empty".to_string());
            }
        }

        // Storage validation
        if let StorageConfig::Sled { path } = &self.storage {
            if path.as_os_str().is_empty() {
                errors.push("storage path must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
