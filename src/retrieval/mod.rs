//! Retrieval
//!
//! Combines:
//! - BM25 lexical search over an in-memory inverted index
//! - Dense vector search through the embedding cache and a vector index
//! - Rank fusion (RRF or weighted) and optional cross-encoder reranking

mod bm25;
mod fusion;
mod hybrid;
mod pipeline;
mod reranker;

pub use bm25::*;
pub use fusion::*;
pub use hybrid::*;
pub use pipeline::*;
pub use reranker::*;
