//! Hybrid retrieval engine
//!
//! Combines dense vector search with BM25 lexical search, featuring:
//! - Chinese-aware tokenization (UAX #29 words, CJK bigrams, dictionary segmentation)
//! - Incremental BM25 with optional key-value persistence
//! - Embedding cache with LRU/FIFO eviction and a persistent tier
//! - Reciprocal Rank Fusion and weighted score fusion
//! - Optional cross-encoder reranking (HTTP, term overlap, local ONNX)
//! - Graceful degradation when one retrieval source fails

pub mod config;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod retrieval;
pub mod stack;
pub mod storage;
pub mod text;
pub mod types;
pub mod util;
pub mod vector;

pub use config::Config;
pub use error::{ProviderKind, Result, RetrievalError};
pub use retrieval::{Bm25Index, HybridRetriever, RetrievalPipeline};
pub use stack::RetrievalStack;
pub use types::*;
