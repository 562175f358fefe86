//! Embedding provider trait definitions
//!
//! Defines the interface every embedding backend implements and that the
//! [`EmbeddingCache`](crate::embedding::EmbeddingCache) wraps.

use crate::types::Embedding;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Extra per-call parameters forwarded to the provider (e.g. `dimensions`).
///
/// Part of the cache key, so identical text with different parameters is
/// cached separately. Ordered so the key is canonical.
pub type EmbeddingParams = BTreeMap<String, serde_json::Value>;

/// Errors that can occur during embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Model was not found or could not be loaded
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Embedding generation failed
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Rate limited by the API
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds, if provided by the API
        retry_after_ms: Option<u64>,
    },

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Core trait for embedding providers
///
/// Object-safe so providers can be shared as `Arc<dyn EmbeddingProvider>`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug {
    /// Embed a batch of texts. Output order matches input order.
    async fn embed(&self, texts: &[String], params: &EmbeddingParams) -> EmbeddingResult<Vec<Embedding>>;

    /// Embed a single query text
    ///
    /// The default implementation calls `embed` with a one-element batch.
    async fn embed_query(&self, text: &str, params: &EmbeddingParams) -> EmbeddingResult<Embedding> {
        self.embed(&[text.to_string()], params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    /// Output dimension
    fn dimension(&self) -> usize;

    /// Model identifier, included in cache keys
    fn model_name(&self) -> &str;

    /// Backend name (e.g., "http", "hash")
    fn name(&self) -> &str;
}
