//! Core types shared across the retrieval engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a source document
pub type DocumentId = String;

/// Unique identifier for a chunk
pub type ChunkId = String;

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Free-form metadata attached to chunks and search hits
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Equality filters applied to vector hit payloads (all must match)
pub type FilterConditions = BTreeMap<String, serde_json::Value>;

/// Retrieval source that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    /// Dense vector similarity
    Vector,
    /// BM25 lexical matching
    Bm25,
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMethod::Vector => write!(f, "vector"),
            RetrievalMethod::Bm25 => write!(f, "bm25"),
        }
    }
}

/// A chunk returned from retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    /// Source or fused score, higher is better
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
    /// Cross-encoder score, set only when reranking ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// Which sources contributed this chunk
    #[serde(default)]
    pub matched_by: Vec<RetrievalMethod>,
}

impl RetrievedChunk {
    pub fn new(
        chunk_id: impl Into<ChunkId>,
        document_id: impl Into<DocumentId>,
        content: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            content: content.into(),
            score,
            metadata: Metadata::new(),
            rerank_score: None,
            matched_by: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Score used for final ordering: rerank score when present, else the source score
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }
}

/// Per-query retrieval options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of results to return
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum vector similarity; `None` disables the cutoff
    #[serde(default = "default_score_threshold")]
    pub score_threshold: Option<f32>,
    /// Whether to keep metadata on returned chunks
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
    /// Payload equality filters for the vector source
    #[serde(default)]
    pub filter_conditions: Option<FilterConditions>,
}

fn default_top_k() -> usize {
    5
}

fn default_score_threshold() -> Option<f32> {
    Some(0.7)
}

fn default_include_metadata() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            include_metadata: default_include_metadata(),
            filter_conditions: None,
        }
    }
}

impl RetrievalConfig {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filter_conditions
            .get_or_insert_with(FilterConditions::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A chunk handed to the engine for indexing, one JSON object per line in
/// the CLI's input files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    /// Defaults to the chunk id
    #[serde(default)]
    pub document_id: Option<DocumentId>,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChunkRecord {
    pub fn new(chunk_id: impl Into<ChunkId>, content: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: None,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_document_id(mut self, document_id: impl Into<DocumentId>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn document_id(&self) -> &str {
        self.document_id.as_deref().unwrap_or(&self.chunk_id)
    }
}
