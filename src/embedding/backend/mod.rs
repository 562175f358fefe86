//! Pluggable embedding providers
//!
//! - **HTTP backend**: OpenAI-compatible APIs (OpenAI, Azure, LM Studio, vLLM, etc.)
//! - **Hash backend**: deterministic feature hashing, for tests and offline use
//!
//! # Example Configuration
//!
//! ```toml
//! # OpenAI
//! [embedding]
//! backend = "http"
//! endpoint = "https://api.openai.com/v1/embeddings"
//! model = "text-embedding-3-small"
//! dimensions = 1536
//! # api_key from OPENAI_API_KEY env var
//!
//! # Offline
//! [embedding]
//! backend = "hash"
//! dimensions = 384
//! ```

mod factory;
mod hash;
mod http;
mod traits;

pub use factory::create_provider;
pub use hash::HashEmbeddingProvider;
pub use http::{HttpConfig, HttpEmbeddingProvider};
pub use traits::{EmbeddingError, EmbeddingParams, EmbeddingProvider, EmbeddingResult};
