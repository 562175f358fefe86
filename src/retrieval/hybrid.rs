//! Hybrid retrieval combining dense and sparse search
//!
//! Both sources are queried concurrently and over-fetched by
//! `candidate_multiplier`. BM25 scores are min-max normalized before fusion
//! so they share the vector scores' `[0, 1]` range. The fused head is then
//! optionally reranked and cut to `top_k`.
//!
//! A query survives the failure of one source: the other source's results
//! are returned and the degraded counter is bumped. Only when both fail
//! does the query fail.

use super::bm25::{Bm25Hit, Bm25Stats, LexicalSearch};
use super::fusion::{min_max_normalize, reciprocal_rank_fusion, weighted_score_fusion, FusionCandidate};
use super::pipeline::VectorSearch;
use super::reranker::Reranker;
use crate::config::{FusionMethod, HybridConfig};
use crate::error::{ProviderKind, Result, RetrievalError};
use crate::metrics::{MetricsSnapshot, RetrievalMetrics, Timer};
use crate::types::{RetrievalConfig, RetrievalMethod, RetrievedChunk};
use crate::util::truncate_str;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retriever configuration summary
#[derive(Debug, Clone, Serialize)]
pub struct HybridStats {
    pub fusion_method: FusionMethod,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub rrf_k: usize,
    pub candidate_multiplier: usize,
    pub reranker: Option<String>,
    pub bm25: Option<Bm25Stats>,
}

/// Hybrid retrieval engine combining lexical and vector search
pub struct HybridRetriever {
    lexical: Arc<dyn LexicalSearch>,
    vector: Arc<dyn VectorSearch>,
    reranker: Option<Reranker>,
    config: HybridConfig,
    metrics: Arc<RetrievalMetrics>,
}

impl HybridRetriever {
    /// Create a retriever. Fails on weights weighted fusion cannot use.
    pub fn new(
        lexical: Arc<dyn LexicalSearch>,
        vector: Arc<dyn VectorSearch>,
        config: HybridConfig,
    ) -> Result<Self> {
        validate(&config)?;
        info!(
            "Hybrid retriever: fusion={}, weights vector={} bm25={}",
            config.fusion_method.as_str(),
            config.vector_weight,
            config.bm25_weight
        );
        Ok(Self {
            lexical,
            vector,
            reranker: None,
            config,
            metrics: RetrievalMetrics::shared(),
        })
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker.with_metrics(Arc::clone(&self.metrics)));
        self
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Retrieve the `config.top_k` best chunks for `query`
    pub async fn retrieve(&self, query: &str, config: &RetrievalConfig) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || config.top_k == 0 {
            return Ok(Vec::new());
        }

        let timer = Timer::start();
        let candidate_k = config.top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let vector_config = RetrievalConfig {
            top_k: candidate_k,
            ..config.clone()
        };

        let (lexical, vector) = tokio::join!(
            self.bounded(ProviderKind::Lexical, self.lexical.search(query, candidate_k)),
            self.bounded(ProviderKind::VectorIndex, self.vector.search(query, &vector_config)),
        );

        let (lexical_hits, vector_chunks) = match (lexical, vector) {
            (Ok(l), Ok(v)) => (l, v),
            (Ok(l), Err(e)) => {
                warn!("Vector search failed, answering from BM25 only: {}", e);
                self.metrics.degraded_total.inc();
                (l, Vec::new())
            }
            (Err(e), Ok(v)) => {
                warn!("BM25 search failed, answering from vector search only: {}", e);
                self.metrics.degraded_total.inc();
                (Vec::new(), v)
            }
            (Err(l), Err(v)) => {
                self.metrics.failures_total.inc();
                return Err(RetrievalError::AllSourcesFailed {
                    lexical: l.to_string(),
                    vector: v.to_string(),
                });
            }
        };
        debug!(
            "Candidates: {} vector, {} bm25",
            vector_chunks.len(),
            lexical_hits.len()
        );

        let mut results = self.fuse(vector_chunks, lexical_hits, config.include_metadata)?;

        results = match &self.reranker {
            Some(reranker) => {
                results.truncate(self.config.rerank_candidates.max(config.top_k));
                reranker.rerank(query, results, config.top_k).await
            }
            None => {
                results.truncate(config.top_k);
                results
            }
        };

        self.metrics.queries_total.inc();
        timer.record(&self.metrics.query_latency);
        info!(
            "Hybrid search for '{}': {} results",
            truncate_str(query, 50),
            results.len()
        );
        Ok(results)
    }

    /// Apply the per-source timeout, if configured
    async fn bounded<T>(&self, provider: ProviderKind, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.source_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| RetrievalError::provider(provider, format!("Timed out after {}ms", ms)))?,
            None => fut.await,
        }
    }

    fn fuse(
        &self,
        vector_chunks: Vec<RetrievedChunk>,
        lexical_hits: Vec<Bm25Hit>,
        include_metadata: bool,
    ) -> Result<Vec<RetrievedChunk>> {
        let vector_list: Vec<FusionCandidate> = vector_chunks
            .iter()
            .map(|c| {
                FusionCandidate::new(c.chunk_id.clone(), c.score, RetrievalMethod::Vector)
                    .with_metadata(c.metadata.clone())
            })
            .collect();

        let normalized = min_max_normalize(&lexical_hits.iter().map(|h| h.score).collect::<Vec<_>>());
        let lexical_list: Vec<FusionCandidate> = lexical_hits
            .iter()
            .zip(normalized)
            .map(|(hit, score)| {
                FusionCandidate::new(hit.id.clone(), score, RetrievalMethod::Bm25)
                    .with_metadata(hit.metadata.clone())
            })
            .collect();

        // first source to return a chunk supplies its content
        let mut chunks: HashMap<String, RetrievedChunk> = HashMap::new();
        for chunk in vector_chunks {
            chunks.entry(chunk.chunk_id.clone()).or_insert(chunk);
        }
        for hit in lexical_hits {
            chunks.entry(hit.id.clone()).or_insert_with(|| lexical_chunk(hit));
        }

        let lists = [vector_list, lexical_list];
        let fused = match self.config.fusion_method {
            FusionMethod::Rrf => reciprocal_rank_fusion(&lists, self.config.rrf_k, None),
            FusionMethod::Weighted => weighted_score_fusion(
                &lists,
                &[self.config.vector_weight, self.config.bm25_weight],
                None,
            )?,
        };

        Ok(fused
            .into_iter()
            .filter_map(|result| {
                let mut chunk = chunks.remove(&result.document_id)?;
                chunk.score = result.combined_score;
                chunk.matched_by = result.sources;
                chunk.metadata = if include_metadata {
                    result.metadata
                } else {
                    Default::default()
                };
                Some(chunk)
            })
            .collect())
    }

    pub fn stats(&self) -> HybridStats {
        HybridStats {
            fusion_method: self.config.fusion_method,
            vector_weight: self.config.vector_weight,
            bm25_weight: self.config.bm25_weight,
            rrf_k: self.config.rrf_k,
            candidate_multiplier: self.config.candidate_multiplier,
            reranker: self.reranker.as_ref().map(|r| r.scorer_name().to_string()),
            bm25: self.lexical.lexical_stats(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared handle, for Prometheus export
    pub fn metrics_handle(&self) -> Arc<RetrievalMetrics> {
        Arc::clone(&self.metrics)
    }
}

fn lexical_chunk(hit: Bm25Hit) -> RetrievedChunk {
    let document_id = match hit.metadata.get("document_id") {
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => hit.id.clone(),
    };
    RetrievedChunk::new(hit.id, document_id, hit.content, hit.score)
}

fn validate(config: &HybridConfig) -> Result<()> {
    for (name, weight) in [("vector_weight", config.vector_weight), ("bm25_weight", config.bm25_weight)] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(RetrievalError::config(format!(
                "{} must be finite and non-negative, got {}",
                name, weight
            )));
        }
    }
    if config.fusion_method == FusionMethod::Weighted && config.vector_weight + config.bm25_weight <= 0.0 {
        return Err(RetrievalError::config("Weighted fusion needs at least one positive weight"));
    }
    if config.rrf_k == 0 {
        return Err(RetrievalError::config("rrf_k must be positive"));
    }
    Ok(())
}
