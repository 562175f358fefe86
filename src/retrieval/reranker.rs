//! Cross-encoder reranking
//!
//! A [`CrossEncoder`] scores (query, document) pairs jointly, which is more
//! precise than either retrieval source but too slow to run over a corpus.
//! [`Reranker`] applies it to the fused head of a result list and never
//! fails a query: scorer errors fall back to the incoming order.

use crate::config::{RerankerBackend, RerankerConfig};
use crate::error::{ProviderKind, Result, RetrievalError};
use crate::metrics::RetrievalMetrics;
use crate::text::Tokenizer;
use crate::types::RetrievedChunk;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Joint relevance scorer for (query, document) pairs
#[async_trait]
pub trait CrossEncoder: Send + Sync + Debug {
    /// One score per pair, in input order, higher is more relevant
    async fn compute_scores(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// Reorders candidates by cross-encoder score
#[derive(Debug, Clone)]
pub struct Reranker {
    scorer: Arc<dyn CrossEncoder>,
    batch_size: usize,
    metrics: Option<Arc<RetrievalMetrics>>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn CrossEncoder>, batch_size: usize) -> Self {
        Self {
            scorer,
            batch_size: batch_size.max(1),
            metrics: None,
        }
    }

    /// Count fallbacks into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<RetrievalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Score every candidate against `query`, sort by score and keep `top_k`.
    ///
    /// On any scorer failure the candidates come back in their original
    /// order, truncated, with `rerank_score` unset.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        if candidates.is_empty() || top_k == 0 {
            candidates.truncate(top_k);
            return candidates;
        }

        match self.score_all(query, &candidates).await {
            Ok(scores) => {
                for (chunk, score) in candidates.iter_mut().zip(scores) {
                    chunk.rerank_score = Some(score);
                }
                // stable, so equal scores keep fused order
                candidates.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
                debug!("Reranked {} candidates with {}", candidates.len(), self.scorer.name());
            }
            Err(e) => {
                warn!("Reranking failed, keeping fused order: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.rerank_fallbacks_total.inc();
                }
            }
        }

        candidates.truncate(top_k);
        candidates
    }

    async fn score_all(&self, query: &str, candidates: &[RetrievedChunk]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.batch_size) {
            let pairs: Vec<(String, String)> = batch
                .iter()
                .map(|c| (query.to_string(), c.content.clone()))
                .collect();
            let batch_scores = self.scorer.compute_scores(&pairs).await?;
            if batch_scores.len() != pairs.len() {
                return Err(RetrievalError::provider(
                    ProviderKind::Reranker,
                    format!("Expected {} scores, got {}", pairs.len(), batch_scores.len()),
                ));
            }
            scores.extend(batch_scores);
        }
        Ok(scores)
    }
}

/// Build the configured reranker, or `None` when reranking is disabled
pub fn create_reranker(config: &RerankerConfig) -> Result<Option<Reranker>> {
    let scorer: Arc<dyn CrossEncoder> = match &config.backend {
        RerankerBackend::None => return Ok(None),
        RerankerBackend::Http {
            endpoint,
            api_key,
            timeout_secs,
        } => Arc::new(HttpCrossEncoder::new(endpoint, api_key.clone(), *timeout_secs)?),
        RerankerBackend::TermOverlap => Arc::new(TermOverlapScorer::default()),
        #[cfg(feature = "onnx")]
        RerankerBackend::Onnx {
            model_path,
            tokenizer_path,
            max_length,
        } => Arc::new(onnx::OnnxCrossEncoder::new(model_path, tokenizer_path, *max_length)?),
        #[cfg(not(feature = "onnx"))]
        RerankerBackend::Onnx { .. } => {
            return Err(RetrievalError::config(
                "ONNX reranker requires building with the `onnx` feature",
            ))
        }
    };
    info!("Reranking enabled with {} scorer", scorer.name());
    Ok(Some(Reranker::new(scorer, config.batch_size)))
}

/// Client for a text-embeddings-inference style `/rerank` endpoint
#[derive(Debug)]
pub struct HttpCrossEncoder {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| RetrievalError::config(format!("Invalid API key format: {}", e)))?,
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrievalError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    async fn score_query(&self, query: &str, texts: Vec<&str>) -> Result<Vec<f32>> {
        let expected = texts.len();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .map_err(|e| RetrievalError::provider(ProviderKind::Reranker, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::provider(
                ProviderKind::Reranker,
                format!("Rerank API returned {}: {}", status, body),
            ));
        }

        let ranked: Vec<RerankScore> = response
            .json()
            .await
            .map_err(|e| RetrievalError::provider(ProviderKind::Reranker, format!("Invalid response: {}", e)))?;

        // the API returns results sorted by score, map them back by index
        let mut scores = vec![None; expected];
        for item in ranked {
            if let Some(slot) = scores.get_mut(item.index) {
                *slot = Some(item.score);
            }
        }
        scores
            .into_iter()
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| RetrievalError::provider(ProviderKind::Reranker, "Rerank response is missing scores"))
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn compute_scores(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(pairs.len());
        let mut start = 0;
        // one request per run of pairs sharing a query
        while start < pairs.len() {
            let query = &pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|(q, _)| q != query)
                .map_or(pairs.len(), |offset| start + offset);
            let texts = pairs[start..end].iter().map(|(_, doc)| doc.as_str()).collect();
            scores.extend(self.score_query(query, texts).await?);
            start = end;
        }
        Ok(scores)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Fraction of distinct query terms present in the document.
///
/// No model required. Used when no cross-encoder is deployed and as a
/// deterministic scorer in tests.
#[derive(Debug, Clone, Default)]
pub struct TermOverlapScorer {
    tokenizer: Tokenizer,
}

impl TermOverlapScorer {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    pub fn score(&self, query: &str, document: &str) -> f32 {
        let query_terms: HashSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms: HashSet<String> = self.tokenizer.tokenize(document).into_iter().collect();
        let overlap = query_terms.intersection(&doc_terms).count();
        overlap as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl CrossEncoder for TermOverlapScorer {
    async fn compute_scores(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(pairs.iter().map(|(q, d)| self.score(q, d)).collect())
    }

    fn name(&self) -> &str {
        "term_overlap"
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    //! Local ms-marco style cross-encoder

    use super::CrossEncoder;
    use crate::error::{ProviderKind, Result, RetrievalError};
    use async_trait::async_trait;
    use ort::{execution_providers::CPUExecutionProvider, session::Session, value::Tensor};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;
    use tokenizers::Tokenizer;
    use tracing::info;

    fn model_error(message: impl std::fmt::Display) -> RetrievalError {
        RetrievalError::provider(ProviderKind::Reranker, message.to_string())
    }

    struct Model {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        max_length: usize,
    }

    #[derive(Clone)]
    pub struct OnnxCrossEncoder {
        model: Arc<Model>,
    }

    impl std::fmt::Debug for OnnxCrossEncoder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OnnxCrossEncoder")
                .field("max_length", &self.model.max_length)
                .finish()
        }
    }

    impl OnnxCrossEncoder {
        pub fn new(model_path: &Path, tokenizer_path: &Path, max_length: usize) -> Result<Self> {
            info!("Loading reranker model from {}", model_path.display());

            let session = Session::builder()
                .and_then(|b| b.with_execution_providers([CPUExecutionProvider::default().build()]))
                .and_then(|b| b.with_intra_threads(4))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| RetrievalError::config(format!("Failed to load reranker model: {}", e)))?;

            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| RetrievalError::config(format!("Failed to load tokenizer: {}", e)))?;

            Ok(Self {
                model: Arc::new(Model {
                    session: Mutex::new(session),
                    tokenizer,
                    max_length,
                }),
            })
        }
    }

    impl Model {
        fn score_batch(&self, pairs: Vec<(String, String)>) -> Result<Vec<f32>> {
            let batch_size = pairs.len();
            let encodings = self
                .tokenizer
                .encode_batch(pairs, true)
                .map_err(|e| model_error(format!("Tokenization failed: {}", e)))?;

            let max_len = encodings
                .iter()
                .map(|e| e.get_ids().len())
                .max()
                .unwrap_or(0)
                .min(self.max_length);

            let mut input_ids: Vec<i64> = Vec::with_capacity(batch_size * max_len);
            let mut attention_mask: Vec<i64> = Vec::with_capacity(batch_size * max_len);
            for encoding in &encodings {
                let ids = encoding.get_ids();
                for i in 0..max_len {
                    match ids.get(i) {
                        Some(&id) => {
                            input_ids.push(i64::from(id));
                            attention_mask.push(1);
                        }
                        None => {
                            input_ids.push(0);
                            attention_mask.push(0);
                        }
                    }
                }
            }

            let shape = [batch_size, max_len];
            let (logits_shape, logits): (Vec<usize>, Vec<f32>) = {
                let mut session = self.session.lock();
                let outputs = session
                    .run(ort::inputs![
                        "input_ids" => Tensor::from_array((shape, input_ids)).map_err(model_error)?,
                        "attention_mask" => Tensor::from_array((shape, attention_mask)).map_err(model_error)?,
                    ])
                    .map_err(model_error)?;
                let (_, value) = outputs
                    .iter()
                    .next()
                    .ok_or_else(|| model_error("Model produced no output"))?;
                let array = value.try_extract_array::<f32>().map_err(model_error)?;
                (array.shape().to_vec(), array.iter().copied().collect())
            };

            let view = ndarray::ArrayViewD::from_shape(logits_shape.as_slice(), logits.as_slice())
                .map_err(model_error)?;
            let two_class = view.ndim() > 1 && view.shape()[1] > 1;
            Ok((0..batch_size)
                .map(|i| {
                    if two_class {
                        view[[i, 1]]
                    } else {
                        sigmoid(view[[i, 0]])
                    }
                })
                .collect())
        }
    }

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[async_trait]
    impl CrossEncoder for OnnxCrossEncoder {
        async fn compute_scores(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
            if pairs.is_empty() {
                return Ok(Vec::new());
            }
            let model = Arc::clone(&self.model);
            let pairs = pairs.to_vec();
            tokio::task::spawn_blocking(move || model.score_batch(pairs))
                .await
                .map_err(|e| model_error(format!("Reranker task failed: {}", e)))?
        }

        fn name(&self) -> &str {
            "onnx"
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxCrossEncoder;

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk::new(id, "doc", content, score)
    }

    fn ids(chunks: &[RetrievedChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    /// Scorer that always fails, or returns the wrong number of scores
    #[derive(Debug)]
    struct BrokenScorer {
        short: bool,
    }

    #[async_trait]
    impl CrossEncoder for BrokenScorer {
        async fn compute_scores(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
            if self.short {
                Ok(vec![1.0; pairs.len().saturating_sub(1)])
            } else {
                Err(RetrievalError::provider(ProviderKind::Reranker, "model offline"))
            }
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_term_overlap_reorders() {
        let reranker = Reranker::new(Arc::new(TermOverlapScorer::default()), 2);
        let candidates = vec![
            chunk("c1", "The cat sat on the mat", 0.9),
            chunk("c2", "Machine learning and neural networks", 0.8),
            chunk("c3", "Only machine here", 0.7),
        ];

        let reranked = reranker.rerank("machine learning", candidates, 3).await;
        assert_eq!(ids(&reranked), vec!["c2", "c3", "c1"]);
        assert_eq!(reranked[0].rerank_score, Some(1.0));
        assert_eq!(reranked[1].rerank_score, Some(0.5));
        // source scores are untouched
        assert!((reranked[0].score - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let reranker = Reranker::new(Arc::new(TermOverlapScorer::default()), 32);
        let candidates = vec![
            chunk("a", "rust", 0.1),
            chunk("b", "rust ownership", 0.2),
            chunk("c", "nothing", 0.3),
        ];
        let reranked = reranker.rerank("rust ownership", candidates, 1).await;
        assert_eq!(ids(&reranked), vec!["b"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_original_order() {
        let metrics = RetrievalMetrics::shared();
        let reranker = Reranker::new(Arc::new(BrokenScorer { short: false }), 8).with_metrics(metrics.clone());
        let candidates = vec![chunk("x", "a", 0.9), chunk("y", "b", 0.5), chunk("z", "c", 0.1)];

        let reranked = reranker.rerank("query", candidates, 2).await;
        assert_eq!(ids(&reranked), vec!["x", "y"]);
        assert!(reranked.iter().all(|c| c.rerank_score.is_none()));
        assert_eq!(metrics.rerank_fallbacks_total.get(), 1);
    }

    #[tokio::test]
    async fn test_count_mismatch_falls_back() {
        let reranker = Reranker::new(Arc::new(BrokenScorer { short: true }), 8);
        let candidates = vec![chunk("x", "a", 0.9), chunk("y", "b", 0.5)];
        let reranked = reranker.rerank("query", candidates, 5).await;
        assert_eq!(ids(&reranked), vec!["x", "y"]);
        assert!(reranked[0].rerank_score.is_none());
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let reranker = Reranker::new(Arc::new(TermOverlapScorer::default()), 8);
        assert!(reranker.rerank("query", Vec::new(), 5).await.is_empty());
    }

    #[test]
    fn test_term_overlap_chinese() {
        let scorer = TermOverlapScorer::default();
        assert!(scorer.score("违约金", "合同约定的违约金条款") > 0.0);
        assert_eq!(scorer.score("违约金", "付款方式"), 0.0);
        assert_eq!(scorer.score("", "anything"), 0.0);
    }

    #[test]
    fn test_create_reranker() {
        assert!(create_reranker(&RerankerConfig::default()).unwrap().is_none());

        let config = RerankerConfig {
            backend: RerankerBackend::TermOverlap,
            batch_size: 4,
        };
        let reranker = create_reranker(&config).unwrap().unwrap();
        assert_eq!(reranker.scorer_name(), "term_overlap");
    }
}
