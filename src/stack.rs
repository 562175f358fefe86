//! Component wiring
//!
//! Builds every collaborator once from [`Config`] and hands them to the
//! retrievers as shared trait objects.

use crate::config::{Config, VectorBackend};
use crate::embedding::{create_provider, EmbeddingCache};
use crate::retrieval::{create_reranker, Bm25Document, Bm25Index, HybridRetriever, RetrievalPipeline};
use crate::storage::{open_store, KeyValueStore};
use crate::text::Tokenizer;
use crate::types::ChunkRecord;
use crate::vector::{create_vector_index, VectorIndex};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Metadata key carrying a chunk's document id in the lexical index
const DOCUMENT_ID_KEY: &str = "document_id";

/// Every component needed to index and query
pub struct RetrievalStack {
    pub store: Arc<dyn KeyValueStore>,
    pub bm25: Arc<Bm25Index>,
    pub cache: Arc<EmbeddingCache>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub pipeline: Arc<RetrievalPipeline>,
    pub retriever: HybridRetriever,
}

impl RetrievalStack {
    /// Open the configured store and indexes.
    ///
    /// The in-memory vector index does not survive restarts, so when it is
    /// selected it is refilled from the documents held by the lexical index.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = open_store(&config.storage).context("Failed to open key-value store")?;
        Self::open_with_store(config, store).await
    }

    /// Like [`RetrievalStack::open`], over an already opened store
    pub async fn open_with_store(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let tokenizer = Arc::new(Tokenizer::from_config(&config.tokenizer).context("Failed to build tokenizer")?);
        let bm25 = if config.bm25.persist {
            Bm25Index::load(tokenizer, &config.bm25, Arc::clone(&store))
                .await
                .context("Failed to load BM25 index")?
        } else {
            Bm25Index::new(tokenizer, &config.bm25)
        };
        let bm25 = Arc::new(bm25);

        let provider = create_provider(&config.embedding.backend).context("Failed to create embedding provider")?;
        let dimension = provider.dimension();
        let mut cache = EmbeddingCache::new(provider, &config.cache);
        if config.cache.persistent {
            cache = cache.with_store(
                Arc::clone(&store),
                Duration::from_secs(config.cache.persistent_ttl_secs),
            );
        }
        let cache = Arc::new(cache);

        let vector_index = create_vector_index(&config.vector, dimension).context("Failed to create vector index")?;
        let pipeline = Arc::new(RetrievalPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&vector_index),
            config.vector.collection.clone(),
        ));

        let mut retriever = HybridRetriever::new(bm25.clone(), pipeline.clone(), config.hybrid.clone())
            .context("Invalid hybrid configuration")?;
        if let Some(reranker) = create_reranker(&config.reranker).context("Failed to create reranker")? {
            retriever = retriever.with_reranker(reranker);
        }

        let stack = Self {
            store,
            bm25,
            cache,
            vector_index,
            pipeline,
            retriever,
        };

        if matches!(config.vector.backend, VectorBackend::Memory) && !stack.bm25.is_empty() {
            let chunks: Vec<ChunkRecord> = stack.bm25.documents().into_iter().map(chunk_from_document).collect();
            let count = stack
                .pipeline
                .index_chunks(&chunks)
                .await
                .context("Failed to rebuild in-memory vector index")?;
            info!("Rebuilt in-memory vector index with {} chunks", count);
        }

        Ok(stack)
    }

    /// Add chunks to both the lexical and the vector index.
    ///
    /// A transient storage failure while persisting the lexical records does
    /// not stop the vector upsert. The chunks are searchable through both
    /// sources and the storage error is returned afterwards.
    pub async fn index_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize> {
        let documents: Vec<Bm25Document> = chunks.iter().map(document_from_chunk).collect();
        let persisted = match self.bm25.add_documents(documents).await {
            Ok(()) => None,
            Err(e) if e.is_transient() => {
                warn!("BM25 records kept in memory only: {}", e);
                Some(e)
            }
            Err(e) => return Err(e).context("Failed to add BM25 documents"),
        };

        let count = self.pipeline.index_chunks(chunks).await?;

        match persisted {
            None => {
                self.store.flush().await?;
                Ok(count)
            }
            Some(e) => {
                if let Err(flush_err) = self.store.flush().await {
                    warn!("Store flush failed: {}", flush_err);
                }
                Err(anyhow::Error::new(e).context("Failed to persist BM25 documents"))
            }
        }
    }
}

fn document_from_chunk(chunk: &ChunkRecord) -> Bm25Document {
    let mut metadata = chunk.metadata.clone();
    metadata.insert(DOCUMENT_ID_KEY.to_string(), Value::from(chunk.document_id()));
    Bm25Document::new(chunk.chunk_id.clone(), chunk.content.clone()).with_metadata(metadata)
}

fn chunk_from_document(doc: Bm25Document) -> ChunkRecord {
    let mut metadata = doc.metadata;
    let document_id = match metadata.remove(DOCUMENT_ID_KEY) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    let mut chunk = ChunkRecord::new(doc.id, doc.text).with_metadata(metadata);
    chunk.document_id = document_id;
    chunk
}
