//! Embeddings: providers and the caching layer in front of them
//!
//! # Example Configuration
//!
//! ```toml
//! [embedding]
//! backend = "http"
//! endpoint = "https://api.openai.com/v1/embeddings"
//! model = "text-embedding-3-small"
//! dimensions = 1536
//!
//! [cache]
//! max_size = 10000
//! eviction = "lru"
//! persistent = true
//! persistent_ttl_secs = 86400
//! ```

pub mod backend;
mod cache;
pub mod math;

pub use backend::{
    create_provider, EmbeddingError, EmbeddingParams, EmbeddingProvider, EmbeddingResult,
    HashEmbeddingProvider, HttpEmbeddingProvider,
};
pub use cache::{CacheStats, CachedEmbedding, EmbeddingCache, CACHE_KEY_PREFIX};
