//! BM25 lexical search over an in-memory inverted index
//!
//! Postings are updated incrementally on every add/delete, so the corpus
//! aggregates (document count, total length) always match the postings.
//! When a [`KeyValueStore`] is attached, every document's term frequencies
//! are written under `bm25:doc:{id}` and [`Bm25Index::load`] rebuilds the
//! exact same index from those records.

use crate::config::Bm25Config;
use crate::error::{Result, RetrievalError};
use crate::storage::KeyValueStore;
use crate::text::Tokenizer;
use crate::types::Metadata;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key prefix for persisted document records
pub const BM25_KEY_PREFIX: &str = "bm25:doc:";

fn record_key(doc_id: &str) -> String {
    format!("{}{}", BM25_KEY_PREFIX, doc_id)
}

/// Document to index
#[derive(Debug, Clone, Default)]
pub struct Bm25Document {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl Bm25Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// BM25 search hit
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: Metadata,
}

/// Whether the index has ever held documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotBuilt,
    Ready,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::NotBuilt => write!(f, "not_built"),
            IndexStatus::Ready => write!(f, "ready"),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bm25Stats {
    pub status: IndexStatus,
    pub document_count: usize,
    pub vocabulary_size: usize,
    pub average_document_length: f32,
    pub k1: f32,
    pub b: f32,
    pub persistent: bool,
}

/// Persisted form of one document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocRecord {
    length: u32,
    term_freqs: BTreeMap<String, u32>,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default)]
struct Postings {
    /// term -> (doc_id -> term frequency)
    terms: HashMap<String, HashMap<String, u32>>,
    /// doc_id -> stored document
    docs: HashMap<String, DocRecord>,
    /// Sum of all document lengths
    total_length: u64,
}

impl Postings {
    fn average_length(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.docs.len() as f32
        }
    }

    fn insert(&mut self, doc_id: &str, record: DocRecord) {
        self.remove(doc_id);
        for (term, &tf) in &record.term_freqs {
            self.terms
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string(), tf);
        }
        self.total_length += u64::from(record.length);
        self.docs.insert(doc_id.to_string(), record);
    }

    fn remove(&mut self, doc_id: &str) -> bool {
        let Some(record) = self.docs.remove(doc_id) else {
            return false;
        };
        for term in record.term_freqs.keys() {
            if let Some(postings) = self.terms.get_mut(term) {
                postings.remove(doc_id);
                if postings.is_empty() {
                    self.terms.remove(term);
                }
            }
        }
        self.total_length = self.total_length.saturating_sub(u64::from(record.length));
        true
    }
}

/// Lexical search source, as consumed by the hybrid retriever
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Bm25Hit>>;

    /// Whether the source has any documents
    fn is_ready(&self) -> bool {
        true
    }

    fn lexical_stats(&self) -> Option<Bm25Stats> {
        None
    }
}

/// BM25 index
pub struct Bm25Index {
    tokenizer: Arc<Tokenizer>,
    postings: RwLock<Postings>,
    store: Option<Arc<dyn KeyValueStore>>,
    k1: f32,
    b: f32,
}

impl fmt::Debug for Bm25Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let postings = self.postings.read();
        f.debug_struct("Bm25Index")
            .field("documents", &postings.docs.len())
            .field("terms", &postings.terms.len())
            .field("k1", &self.k1)
            .field("b", &self.b)
            .finish()
    }
}

impl Bm25Index {
    /// Create an empty in-memory index
    pub fn new(tokenizer: Arc<Tokenizer>, config: &Bm25Config) -> Self {
        Self {
            tokenizer,
            postings: RwLock::new(Postings::default()),
            store: None,
            k1: config.k1,
            b: config.b,
        }
    }

    /// Attach a store. Subsequent writes are persisted to it.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Rebuild an index from the records persisted in `store`
    pub async fn load(
        tokenizer: Arc<Tokenizer>,
        config: &Bm25Config,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let entries = store.scan_prefix(BM25_KEY_PREFIX).await?;
        let mut postings = Postings::default();
        let mut skipped = 0usize;

        for (key, raw) in entries {
            let doc_id = &key[BM25_KEY_PREFIX.len()..];
            match serde_json::from_slice::<DocRecord>(&raw) {
                Ok(record) => postings.insert(doc_id, record),
                Err(e) => {
                    warn!("Skipping corrupt BM25 record {}: {}", key, e);
                    skipped += 1;
                }
            }
        }

        info!(
            "Loaded BM25 index from {} store: {} documents, {} terms ({} skipped)",
            store.name(),
            postings.docs.len(),
            postings.terms.len(),
            skipped
        );

        Ok(Self {
            tokenizer,
            postings: RwLock::new(postings),
            store: Some(store),
            k1: config.k1,
            b: config.b,
        })
    }

    fn build_record(&self, text: &str, metadata: Metadata) -> DocRecord {
        let tokens = self.tokenizer.tokenize(text);
        let mut term_freqs: BTreeMap<String, u32> = BTreeMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        DocRecord {
            length: tokens.len() as u32,
            term_freqs,
            content: text.to_string(),
            metadata,
        }
    }

    /// Index a document. Re-adding an id replaces the previous version.
    ///
    /// The in-memory index is always updated. A persistence failure is
    /// reported as [`RetrievalError::TransientStorage`] afterwards.
    pub async fn add(&self, doc_id: &str, text: &str) -> Result<()> {
        self.add_with_metadata(doc_id, text, Metadata::new()).await
    }

    pub async fn add_with_metadata(&self, doc_id: &str, text: &str, metadata: Metadata) -> Result<()> {
        let record = self.build_record(text, metadata);
        let persisted = self.store.as_ref().map(|_| record.clone());
        self.postings.write().insert(doc_id, record);
        debug!("BM25 indexed {}", doc_id);

        match persisted {
            Some(record) => self.persist_record(doc_id, &record).await,
            None => Ok(()),
        }
    }

    /// Index a batch. Every document reaches memory even if persisting one fails.
    pub async fn add_documents(&self, documents: Vec<Bm25Document>) -> Result<()> {
        let records: Vec<(String, DocRecord)> = documents
            .into_iter()
            .map(|doc| {
                let record = self.build_record(&doc.text, doc.metadata);
                (doc.id, record)
            })
            .collect();

        {
            let mut postings = self.postings.write();
            for (doc_id, record) in &records {
                postings.insert(doc_id, record.clone());
            }
        }
        debug!("BM25 indexed batch of {}", records.len());

        let mut first_error = None;
        if self.store.is_some() {
            for (doc_id, record) in &records {
                if let Err(e) = self.persist_record(doc_id, record).await {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Remove a document. Returns whether it was present in memory.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        let removed = self.postings.write().remove(doc_id);
        if removed {
            debug!("BM25 removed {}", doc_id);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&record_key(doc_id)).await {
                warn!("BM25 delete of {} not persisted: {}", doc_id, e);
                return Err(RetrievalError::TransientStorage(e.to_string()));
            }
        }
        Ok(removed)
    }

    /// Remove several documents. Returns how many were present.
    pub async fn delete_documents<S: AsRef<str>>(&self, doc_ids: &[S]) -> Result<usize> {
        let mut removed = 0;
        let mut first_error = None;
        for doc_id in doc_ids {
            match self.delete(doc_id.as_ref()).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    // memory removal already happened
                    removed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(removed), Err)
    }

    async fn persist_record(&self, doc_id: &str, record: &DocRecord) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let raw = serde_json::to_vec(record)
            .map_err(|e| RetrievalError::TransientStorage(format!("Failed to encode {}: {}", doc_id, e)))?;
        store.set(&record_key(doc_id), raw, None).await.map_err(|e| {
            warn!("BM25 add of {} not persisted: {}", doc_id, e);
            RetrievalError::TransientStorage(e.to_string())
        })
    }

    /// Rewrite every in-memory document to the store and flush.
    ///
    /// Used to resync after the store was unreachable.
    pub async fn persist_all(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let snapshot: Vec<(String, DocRecord)> = {
            let postings = self.postings.read();
            postings
                .docs
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect()
        };
        for (doc_id, record) in &snapshot {
            self.persist_record(doc_id, record).await?;
        }
        store
            .flush()
            .await
            .map_err(|e| RetrievalError::TransientStorage(e.to_string()))?;
        Ok(snapshot.len())
    }

    /// Search for `query`, best first.
    ///
    /// Scores use `idf * tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))`
    /// with `idf = ln((N - df + 0.5) / (df + 0.5) + 1)`. Equal scores are
    /// ordered by ascending id. Documents scoring zero are never returned.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        if top_k == 0 {
            return Vec::new();
        }
        let query_terms = self.tokenizer.tokenize(query);
        if query_terms.is_empty() {
            debug!("BM25 query has no index terms");
            return Vec::new();
        }

        let postings = self.postings.read();
        if postings.docs.is_empty() {
            debug!("BM25 index not built; returning no results");
            return Vec::new();
        }

        let n = postings.docs.len() as f32;
        let avgdl = postings.average_length().max(f32::MIN_POSITIVE);
        let mut scores: HashMap<&str, f32> = HashMap::new();

        for term in &query_terms {
            let Some(term_postings) = postings.terms.get(term) else {
                continue;
            };
            let df = term_postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, &tf) in term_postings {
                let dl = postings
                    .docs
                    .get(doc_id)
                    .map_or(0.0, |d| d.length as f32);
                let tf = tf as f32;
                let denominator = tf + self.k1 * (1.0 - self.b + self.b * dl / avgdl);
                *scores.entry(doc_id.as_str()).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / denominator;
            }
        }

        let mut ranked: Vec<(&str, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .filter_map(|(doc_id, score)| {
                postings.docs.get(doc_id).map(|record| Bm25Hit {
                    id: doc_id.to_string(),
                    score,
                    content: record.content.clone(),
                    metadata: record.metadata.clone(),
                })
            })
            .collect()
    }

    /// Every indexed document, ordered by id
    pub fn documents(&self) -> Vec<Bm25Document> {
        let postings = self.postings.read();
        let mut docs: Vec<Bm25Document> = postings
            .docs
            .iter()
            .map(|(id, record)| {
                Bm25Document::new(id.clone(), record.content.clone()).with_metadata(record.metadata.clone())
            })
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.postings.read().docs.contains_key(doc_id)
    }

    pub fn len(&self) -> usize {
        self.postings.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.read().docs.is_empty()
    }

    pub fn stats(&self) -> Bm25Stats {
        let postings = self.postings.read();
        Bm25Stats {
            status: if postings.docs.is_empty() {
                IndexStatus::NotBuilt
            } else {
                IndexStatus::Ready
            },
            document_count: postings.docs.len(),
            vocabulary_size: postings.terms.len(),
            average_document_length: postings.average_length(),
            k1: self.k1,
            b: self.b,
            persistent: self.store.is_some(),
        }
    }

    /// Drop every document from memory and from the store
    pub async fn clear(&self) -> Result<()> {
        *self.postings.write() = Postings::default();
        info!("BM25 index cleared");
        if let Some(store) = &self.store {
            store
                .delete_prefix(BM25_KEY_PREFIX)
                .await
                .map_err(|e| RetrievalError::TransientStorage(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl LexicalSearch for Bm25Index {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Bm25Hit>> {
        Ok(Bm25Index::search(self, query, top_k))
    }

    fn is_ready(&self) -> bool {
        !self.is_empty()
    }

    fn lexical_stats(&self) -> Option<Bm25Stats> {
        Some(self.stats())
    }
}
