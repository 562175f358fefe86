//! Tokenizer, BM25, fusion, and reranking configuration

use crate::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Word segmentation strategy for unsegmented scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmenterKind {
    /// UAX#29 words, CJK runs as overlapping bigrams
    #[default]
    Unicode,
    /// Forward maximum matching against a user dictionary
    Dictionary,
}

/// Tokenizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub segmenter: SegmenterKind,
    /// Word list for the dictionary segmenter, one word per line
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,
    /// Remove stopwords
    #[serde(default = "default_true")]
    pub remove_stopwords: bool,
    /// Stopwords added on top of the built-in set
    #[serde(default)]
    pub extra_stopwords: Vec<String>,
    /// Tokens longer than this (in characters) are dropped
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,
    /// Single-character tokens kept despite the length filter
    #[serde(default = "default_single_char_allow_list")]
    pub single_char_allow_list: Vec<char>,
}

fn default_true() -> bool {
    true
}

fn default_max_token_length() -> usize {
    20
}

fn default_single_char_allow_list() -> Vec<char> {
    "一二三四五六七八九十".chars().collect()
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterKind::default(),
            dictionary_path: None,
            remove_stopwords: true,
            extra_stopwords: Vec::new(),
            max_token_length: default_max_token_length(),
            single_char_allow_list: default_single_char_allow_list(),
        }
    }
}

/// BM25 scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term-frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Length normalization strength (0 = none, 1 = full)
    #[serde(default = "default_b")]
    pub b: f32,
    /// Persist postings to the configured key-value store
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            persist: true,
        }
    }
}

/// Rank fusion method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion
    #[default]
    Rrf,
    /// Min-max normalized weighted sum
    Weighted,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rrf => "rrf",
            Self::Weighted => "weighted",
        }
    }
}

impl FromStr for FusionMethod {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rrf" => Ok(Self::Rrf),
            "weighted" => Ok(Self::Weighted),
            other => Err(RetrievalError::config(format!(
                "Invalid fusion method '{}': expected 'rrf' or 'weighted'",
                other
            ))),
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default)]
    pub fusion_method: FusionMethod,
    /// Weight of the vector list in weighted fusion
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Weight of the BM25 list in weighted fusion
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
    /// RRF k parameter
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    /// Each source fetches `top_k * candidate_multiplier` candidates
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Fused candidates handed to the reranker
    #[serde(default = "default_rerank_candidates")]
    pub rerank_candidates: usize,
    /// Per-source timeout; `None` waits indefinitely
    #[serde(default)]
    pub source_timeout_ms: Option<u64>,
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_bm25_weight() -> f32 {
    0.3
}

fn default_rrf_k() -> usize {
    60
}

fn default_candidate_multiplier() -> usize {
    2
}

fn default_rerank_candidates() -> usize {
    20
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            fusion_method: FusionMethod::default(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            rrf_k: default_rrf_k(),
            candidate_multiplier: default_candidate_multiplier(),
            rerank_candidates: default_rerank_candidates(),
            source_timeout_ms: None,
        }
    }
}

/// Cross-encoder backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RerankerBackend {
    /// Reranking disabled
    #[default]
    None,
    /// text-embeddings-inference style `/rerank` endpoint
    Http {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_reranker_timeout")]
        timeout_secs: u64,
    },
    /// Query term overlap, no model required
    TermOverlap,
    /// Local ONNX cross-encoder (requires the `onnx` feature)
    Onnx {
        model_path: PathBuf,
        tokenizer_path: PathBuf,
        #[serde(default = "default_max_length")]
        max_length: usize,
    },
}

fn default_reranker_timeout() -> u64 {
    30
}

fn default_max_length() -> usize {
    512
}

/// Reranker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(flatten)]
    pub backend: RerankerBackend,
    /// Pairs scored per cross-encoder call
    #[serde(default = "default_rerank_batch_size")]
    pub batch_size: usize,
}

fn default_rerank_batch_size() -> usize {
    32
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::None,
            batch_size: default_rerank_batch_size(),
        }
    }
}

impl RerankerConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, RerankerBackend::None)
    }
}
