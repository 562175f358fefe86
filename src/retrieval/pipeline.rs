//! Vector-only retrieval
//!
//! Embeds the query through the [`EmbeddingCache`] and searches one
//! collection of the configured [`VectorIndex`]. Also used as the dense
//! source of the hybrid retriever.

use crate::embedding::{CacheStats, EmbeddingCache, EmbeddingParams};
use crate::error::Result;
use crate::types::{ChunkRecord, Metadata, RetrievalConfig, RetrievalMethod, RetrievedChunk};
use crate::util::truncate_str;
use crate::vector::{VectorHit, VectorIndex, VectorPoint};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payload fields the pipeline writes and reads back
pub const PAYLOAD_CHUNK_ID: &str = "chunk_id";
pub const PAYLOAD_DOCUMENT_ID: &str = "document_id";
pub const PAYLOAD_CONTENT: &str = "content";

/// Dense search source, as consumed by the hybrid retriever
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &str, config: &RetrievalConfig) -> Result<Vec<RetrievedChunk>>;
}

/// Single-source retrieval pipeline
#[derive(Debug)]
pub struct RetrievalPipeline {
    cache: Arc<EmbeddingCache>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    use_cache: bool,
}

impl RetrievalPipeline {
    pub fn new(cache: Arc<EmbeddingCache>, index: Arc<dyn VectorIndex>, collection: impl Into<String>) -> Self {
        Self {
            cache,
            index,
            collection: collection.into(),
            use_cache: true,
        }
    }

    /// Bypass the embedding cache for query vectors
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed `query` and return the closest chunks
    pub async fn retrieve(&self, query: &str, config: &RetrievalConfig) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || config.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .cache
            .embed_query_with(query, &EmbeddingParams::new(), self.use_cache)
            .await?;

        let hits = self
            .index
            .search(
                &self.collection,
                &vector,
                config.top_k,
                config.score_threshold,
                config.filter_conditions.as_ref(),
            )
            .await?;

        debug!(
            "Vector search for '{}': {} hits",
            truncate_str(query, 50),
            hits.len()
        );

        Ok(hits
            .into_iter()
            .map(|hit| hit_to_chunk(hit, config.include_metadata))
            .collect())
    }

    /// Run several queries concurrently. Output is in query order.
    pub async fn retrieve_multiple(
        &self,
        queries: &[String],
        config: &RetrievalConfig,
    ) -> Vec<Result<Vec<RetrievedChunk>>> {
        join_all(queries.iter().map(|q| self.retrieve(q, config))).await
    }

    /// Embed and upsert chunks into the collection
    pub async fn index_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.cache.embed(&texts, &EmbeddingParams::new(), true).await?;

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload = chunk.metadata.clone();
                payload.insert(PAYLOAD_CHUNK_ID.to_string(), Value::from(chunk.chunk_id.clone()));
                payload.insert(PAYLOAD_DOCUMENT_ID.to_string(), Value::from(chunk.document_id()));
                payload.insert(PAYLOAD_CONTENT.to_string(), Value::from(chunk.content.clone()));
                VectorPoint::new(chunk.chunk_id.clone(), vector.to_vec()).with_payload(payload)
            })
            .collect();

        let count = points.len();
        self.index.upsert(&self.collection, points).await?;
        info!("Indexed {} chunks into '{}'", count, self.collection);
        Ok(count)
    }

    /// Remove chunks from the collection
    pub async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        self.index.delete(&self.collection, chunk_ids).await
    }

    /// Whether the collection is reachable. Errors count as unhealthy.
    pub async fn health_check(&self) -> bool {
        match self.index.collection_exists(&self.collection).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Health check for '{}' failed: {}", self.collection, e);
                false
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl VectorSearch for RetrievalPipeline {
    async fn search(&self, query: &str, config: &RetrievalConfig) -> Result<Vec<RetrievedChunk>> {
        self.retrieve(query, config).await
    }
}

fn take_string(payload: &mut Metadata, key: &str) -> Option<String> {
    match payload.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

fn hit_to_chunk(hit: VectorHit, include_metadata: bool) -> RetrievedChunk {
    let mut payload = hit.payload;
    let chunk_id = take_string(&mut payload, PAYLOAD_CHUNK_ID).unwrap_or_else(|| hit.id.clone());
    let document_id = take_string(&mut payload, PAYLOAD_DOCUMENT_ID).unwrap_or_else(|| chunk_id.clone());
    let content = take_string(&mut payload, PAYLOAD_CONTENT).unwrap_or_default();

    let mut chunk = RetrievedChunk::new(chunk_id, document_id, content, hit.score);
    if include_metadata {
        chunk.metadata = payload;
    }
    chunk.matched_by = vec![RetrievalMethod::Vector];
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, DistanceMetric};
    use crate::embedding::HashEmbeddingProvider;
    use crate::error::{ProviderKind, RetrievalError};
    use crate::types::FilterConditions;
    use crate::vector::InMemoryVectorIndex;
    use serde_json::json;

    fn pipeline() -> RetrievalPipeline {
        let provider = Arc::new(HashEmbeddingProvider::new(128));
        let cache = Arc::new(EmbeddingCache::new(provider, &CacheConfig::default()));
        let index = Arc::new(InMemoryVectorIndex::new(DistanceMetric::Cosine));
        RetrievalPipeline::new(cache, index, "docs")
    }

    fn record(id: &str, doc: &str, content: &str, lang: &str) -> ChunkRecord {
        let mut metadata = Metadata::new();
        metadata.insert("lang".to_string(), json!(lang));
        ChunkRecord::new(id, content)
            .with_document_id(doc)
            .with_metadata(metadata)
    }

    async fn seeded() -> RetrievalPipeline {
        let pipeline = pipeline();
        pipeline
            .index_chunks(&[
                record("c1", "d1", "rust ownership and borrowing", "en"),
                record("c2", "d1", "async runtimes in rust", "en"),
                record("c3", "d2", "sourdough bread baking", "en"),
            ])
            .await
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_retrieve_maps_payload() {
        let pipeline = seeded().await;
        let config = RetrievalConfig::new(2).with_score_threshold(None);
        let results = pipeline.retrieve("rust ownership", &config).await.unwrap();

        assert_eq!(results.len(), 2);
        let top = &results[0];
        assert_eq!(top.chunk_id, "c1");
        assert_eq!(top.document_id, "d1");
        assert_eq!(top.content, "rust ownership and borrowing");
        assert_eq!(top.metadata["lang"], json!("en"));
        assert!(!top.metadata.contains_key(PAYLOAD_CONTENT));
        assert_eq!(top.matched_by, vec![RetrievalMethod::Vector]);
    }

    #[tokio::test]
    async fn test_retrieve_without_metadata() {
        let pipeline = seeded().await;
        let config = RetrievalConfig::new(1)
            .with_score_threshold(None)
            .with_metadata(false);
        let results = pipeline.retrieve("rust", &config).await.unwrap();
        assert!(results[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_applies_filter() {
        let pipeline = pipeline();
        pipeline
            .index_chunks(&[
                record("en", "d1", "contract penalty", "en"),
                record("zh", "d2", "contract penalty", "zh"),
            ])
            .await
            .unwrap();
        let mut config = RetrievalConfig::new(5).with_score_threshold(None);
        let mut filter = FilterConditions::new();
        filter.insert("lang".to_string(), json!("zh"));
        config.filter_conditions = Some(filter);

        let results = pipeline.retrieve("contract penalty", &config).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "zh");
    }

    #[tokio::test]
    async fn test_repeat_query_hits_cache() {
        let pipeline = seeded().await;
        let config = RetrievalConfig::new(1).with_score_threshold(None);
        let before = pipeline.cache_stats();
        pipeline.retrieve("borrow checker", &config).await.unwrap();
        pipeline.retrieve("borrow checker", &config).await.unwrap();
        let after = pipeline.cache_stats();
        assert_eq!(after.hits - before.hits, 1);
        assert_eq!(after.misses - before.misses, 1);
    }

    #[tokio::test]
    async fn test_retrieve_multiple_keeps_order() {
        let pipeline = seeded().await;
        let config = RetrievalConfig::new(1).with_score_threshold(None);
        let queries = vec!["sourdough bread".to_string(), "rust ownership".to_string()];
        let results = pipeline.retrieve_multiple(&queries, &config).await;
        assert_eq!(results[0].as_ref().unwrap()[0].chunk_id, "c3");
        assert_eq!(results[1].as_ref().unwrap()[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_health_check() {
        let pipeline = pipeline();
        assert!(!pipeline.health_check().await);
        pipeline
            .index_chunks(&[ChunkRecord::new("c1", "hello")])
            .await
            .unwrap();
        assert!(pipeline.health_check().await);
    }

    #[tokio::test]
    async fn test_missing_collection_is_vector_error() {
        let pipeline = pipeline();
        let err = pipeline
            .retrieve("anything", &RetrievalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Provider {
                provider: ProviderKind::VectorIndex,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blank_query_is_empty() {
        let pipeline = seeded().await;
        assert!(pipeline
            .retrieve("   ", &RetrievalConfig::default())
            .await
            .unwrap()
            .is_empty());
    }
}
