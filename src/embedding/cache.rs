//! Memoizing wrapper around an embedding provider
//!
//! Two tiers:
//! - in-memory, bounded by `max_size`, LRU or FIFO eviction, optional TTL
//! - optional persistent tier on a [`KeyValueStore`] with its own TTL
//!
//! Cached vectors are handed out as `Arc<[f32]>`, so evicting an entry never
//! invalidates a vector a caller is still holding.

use super::backend::{EmbeddingParams, EmbeddingProvider};
use crate::config::{CacheConfig, EvictionPolicy};
use crate::error::{ProviderKind, Result, RetrievalError};
use crate::storage::KeyValueStore;
use crate::types::Embedding;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key prefix for persisted cache entries
pub const CACHE_KEY_PREFIX: &str = "emb:";

/// Shared, immutable embedding vector
pub type CachedEmbedding = Arc<[f32]>;

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Clone)]
struct CachedVector {
    vector: CachedEmbedding,
    expires_at: Option<Instant>,
}

/// Canonical input to the cache key hash
#[derive(Serialize)]
struct KeyMaterial<'a> {
    model: &'a str,
    text: &'a str,
    params: &'a EmbeddingParams,
}

#[derive(Debug)]
struct PersistentTier {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

/// Embedding cache
#[derive(Debug)]
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    entries: Mutex<LruCache<String, CachedVector>>,
    policy: EvictionPolicy,
    memory_ttl: Option<Duration>,
    persistent: Option<PersistentTier>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            entries: Mutex::new(LruCache::new(capacity)),
            policy: config.eviction,
            memory_ttl: config.memory_ttl_secs.map(Duration::from_secs),
            persistent: None,
            enabled: config.enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Add a write-through persistent tier
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        self.persistent = Some(PersistentTier { store, ttl });
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Deterministic key for `(model, text, params)`: sha256 hex of canonical JSON
    pub fn cache_key(&self, text: &str, params: &EmbeddingParams) -> String {
        let material = KeyMaterial {
            model: self.provider.model_name(),
            text,
            params,
        };
        // BTreeMap params and a fixed struct layout make this canonical
        let bytes = serde_json::to_vec(&material).unwrap_or_else(|_| text.as_bytes().to_vec());
        hex::encode(Sha256::digest(&bytes))
    }

    /// Embed `texts`, serving what it can from cache.
    ///
    /// Output has one vector per input, in input order. Misses are
    /// deduplicated and sent to the provider in a single batch. Each distinct
    /// uncached text counts as one miss. Every other input, including a
    /// repeat of a miss in the same call, counts as a hit.
    pub async fn embed(
        &self,
        texts: &[String],
        params: &EmbeddingParams,
        use_cache: bool,
    ) -> Result<Vec<CachedEmbedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !use_cache || !self.enabled {
            let vectors = self.fetch(texts, params).await?;
            return Ok(vectors.into_iter().map(CachedEmbedding::from).collect());
        }

        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t, params)).collect();
        let mut out: Vec<Option<CachedEmbedding>> = vec![None; texts.len()];

        {
            let now = Instant::now();
            let mut entries = self.entries.lock();
            for (slot, key) in out.iter_mut().zip(&keys) {
                *slot = self.lookup(&mut entries, key, now);
            }
        }

        if self.persistent.is_some() {
            self.fill_from_store(&keys, &mut out).await;
        }

        // unique misses, first-appearance order
        let mut miss_index: HashMap<&str, usize> = HashMap::new();
        let mut miss_texts: Vec<String> = Vec::new();
        let mut miss_keys: Vec<&str> = Vec::new();
        for (i, slot) in out.iter().enumerate() {
            if slot.is_none() && !miss_index.contains_key(keys[i].as_str()) {
                miss_index.insert(keys[i].as_str(), miss_texts.len());
                miss_texts.push(texts[i].clone());
                miss_keys.push(keys[i].as_str());
            }
        }

        // a repeat of a miss within the same call is served by that miss
        let miss_count = miss_texts.len() as u64;
        let hit_count = texts.len() as u64 - miss_count;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses.fetch_add(miss_count, Ordering::Relaxed);

        if !miss_texts.is_empty() {
            debug!(
                "Embedding cache: {} hits, {} unique misses",
                hit_count,
                miss_texts.len()
            );
            let vectors = self.fetch(&miss_texts, params).await?;
            let fresh: Vec<CachedEmbedding> = vectors.into_iter().map(CachedEmbedding::from).collect();

            self.store_memory(miss_keys.iter().copied().zip(fresh.iter()));
            self.store_persistent(&miss_keys, &fresh).await;

            for (slot, key) in out.iter_mut().zip(&keys) {
                if slot.is_none() {
                    if let Some(&idx) = miss_index.get(key.as_str()) {
                        *slot = Some(fresh[idx].clone());
                    }
                }
            }
        }

        out.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| {
            RetrievalError::provider(ProviderKind::Embedding, "Missing embedding after provider call")
        })
    }

    /// Embed a single query with default parameters
    pub async fn embed_query(&self, text: &str) -> Result<CachedEmbedding> {
        self.embed_query_with(text, &EmbeddingParams::new(), true).await
    }

    pub async fn embed_query_with(
        &self,
        text: &str,
        params: &EmbeddingParams,
        use_cache: bool,
    ) -> Result<CachedEmbedding> {
        self.embed(&[text.to_string()], params, use_cache)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::provider(ProviderKind::Embedding, "No embedding returned"))
    }

    /// Provider call for uncached texts. A lone text goes through the
    /// provider's single-query path.
    async fn fetch(&self, texts: &[String], params: &EmbeddingParams) -> Result<Vec<Embedding>> {
        let vectors = match texts {
            [text] => vec![self.provider.embed_query(text, params).await?],
            _ => self.provider.embed(texts, params).await?,
        };
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }

    fn lookup(
        &self,
        entries: &mut LruCache<String, CachedVector>,
        key: &str,
        now: Instant,
    ) -> Option<CachedEmbedding> {
        let entry = match self.policy {
            EvictionPolicy::Lru => entries.get(key),
            EvictionPolicy::Fifo => entries.peek(key),
        }?;
        let expired = entry.expires_at.is_some_and(|t| t <= now);
        let vector = entry.vector.clone();
        if expired {
            entries.pop(key);
            return None;
        }
        Some(vector)
    }

    fn store_memory<'a>(&self, items: impl Iterator<Item = (&'a str, &'a CachedEmbedding)>) {
        let expires_at = self.memory_ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock();
        for (key, vector) in items {
            entries.put(
                key.to_string(),
                CachedVector {
                    vector: vector.clone(),
                    expires_at,
                },
            );
        }
    }

    async fn fill_from_store(&self, keys: &[String], out: &mut [Option<CachedEmbedding>]) {
        let Some(tier) = &self.persistent else {
            return;
        };
        let mut promoted: Vec<(String, CachedEmbedding)> = Vec::new();
        for i in 0..keys.len() {
            if out[i].is_some() {
                continue;
            }
            if let Some((_, vector)) = promoted.iter().find(|(k, _)| *k == keys[i]) {
                out[i] = Some(vector.clone());
                continue;
            }
            let raw = match tier.store.get(&format!("{}{}", CACHE_KEY_PREFIX, keys[i])).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Persistent embedding cache unavailable: {}", e);
                    return;
                }
            };
            match bincode::deserialize::<Vec<f32>>(&raw) {
                Ok(vector) => {
                    let vector = CachedEmbedding::from(vector);
                    out[i] = Some(vector.clone());
                    promoted.push((keys[i].clone(), vector));
                }
                Err(e) => warn!("Discarding undecodable cached embedding: {}", e),
            }
        }
        if !promoted.is_empty() {
            self.store_memory(promoted.iter().map(|(k, v)| (k.as_str(), v)));
        }
    }

    async fn store_persistent(&self, keys: &[&str], vectors: &[CachedEmbedding]) {
        let Some(tier) = &self.persistent else {
            return;
        };
        for (key, vector) in keys.iter().zip(vectors) {
            let raw = match bincode::serialize(&vector[..]) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to encode embedding for cache: {}", e);
                    continue;
                }
            };
            let store_key = format!("{}{}", CACHE_KEY_PREFIX, key);
            if let Err(e) = tier.store.set(&store_key, raw, Some(tier.ttl)).await {
                warn!("Failed to persist cached embedding: {}", e);
                return;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.entries.lock().len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Drop all entries (both tiers) and reset counters
    pub async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        if let Some(tier) = &self.persistent {
            tier.store.delete_prefix(CACHE_KEY_PREFIX).await?;
        }
        Ok(())
    }
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(RetrievalError::provider(
            ProviderKind::Embedding,
            format!("Provider returned {} vectors for {} texts", got, expected),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::backend::{EmbeddingError, EmbeddingResult, HashEmbeddingProvider};
    use crate::storage::testing::FlakyStore;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    /// Records every batch the cache sends to the provider
    #[derive(Debug, Default)]
    struct RecordingProvider {
        inner: Option<HashEmbeddingProvider>,
        calls: Mutex<Vec<Vec<String>>>,
        queries: Mutex<Vec<String>>,
        short_by: usize,
    }

    impl RecordingProvider {
        fn new() -> Self {
            Self {
                inner: Some(HashEmbeddingProvider::new(8)),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed(&self, texts: &[String], params: &EmbeddingParams) -> EmbeddingResult<Vec<Embedding>> {
            self.calls.lock().push(texts.to_vec());
            let mut out = match &self.inner {
                Some(inner) => inner.embed(texts, params).await?,
                None => Vec::new(),
            };
            out.truncate(texts.len().saturating_sub(self.short_by));
            Ok(out)
        }

        async fn embed_query(&self, text: &str, params: &EmbeddingParams) -> EmbeddingResult<Embedding> {
            self.queries.lock().push(text.to_string());
            self.embed(&[text.to_string()], params)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("short".to_string()))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "recording"
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn cache_with(provider: Arc<RecordingProvider>, max_size: usize) -> EmbeddingCache {
        let config = CacheConfig {
            max_size,
            ..Default::default()
        };
        EmbeddingCache::new(provider, &config)
    }

    #[tokio::test]
    async fn test_repeat_is_hit_with_identical_vector() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10);
        let params = EmbeddingParams::new();

        let first = cache.embed(&strings(&["hello"]), &params, true).await.unwrap();
        let second = cache.embed(&strings(&["hello"]), &params, true).await.unwrap();
        assert_eq!(first[0][..], second[0][..]);
        assert_eq!(provider.calls().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mixed_hits_preserve_input_order() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10);
        let params = EmbeddingParams::new();
        let direct = HashEmbeddingProvider::new(8);

        cache.embed(&strings(&["b", "d"]), &params, true).await.unwrap();
        let texts = strings(&["a", "b", "c", "d", "a"]);
        let out = cache.embed(&texts, &params, true).await.unwrap();

        assert_eq!(out.len(), texts.len());
        for (text, vector) in texts.iter().zip(&out) {
            assert_eq!(vector[..], direct.embed_text(text)[..]);
        }
        // second call only fetched the unique misses
        assert_eq!(provider.calls()[1], strings(&["a", "c"]));
    }

    #[tokio::test]
    async fn test_repeat_within_call_counts_as_hit() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10);
        cache
            .embed(&strings(&["same", "same", "other"]), &EmbeddingParams::new(), true)
            .await
            .unwrap();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
        assert_eq!(provider.calls(), vec![strings(&["same", "other"])]);
    }

    #[tokio::test]
    async fn test_single_miss_uses_query_path() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10);
        cache.embed_query("hello").await.unwrap();
        cache.embed(&strings(&["a", "b"]), &EmbeddingParams::new(), true).await.unwrap();
        cache.embed_query("hello").await.unwrap();
        assert_eq!(*provider.queries.lock(), strings(&["hello"]));
    }

    #[tokio::test]
    async fn test_size_never_exceeds_max() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider, 3);
        let params = EmbeddingParams::new();
        for i in 0..10 {
            cache.embed(&[format!("text {i}")], &params, true).await.unwrap();
            assert!(cache.stats().size <= 3);
        }
        assert_eq!(cache.stats().size, 3);
    }

    #[tokio::test]
    async fn test_lru_vs_fifo_eviction() {
        let params = EmbeddingParams::new();
        for (policy, survivor_expected) in [(EvictionPolicy::Lru, true), (EvictionPolicy::Fifo, false)] {
            let provider = Arc::new(RecordingProvider::new());
            let config = CacheConfig {
                max_size: 2,
                eviction: policy,
                ..Default::default()
            };
            let cache = EmbeddingCache::new(provider.clone(), &config);
            cache.embed(&strings(&["x"]), &params, true).await.unwrap();
            cache.embed(&strings(&["y"]), &params, true).await.unwrap();
            cache.embed(&strings(&["x"]), &params, true).await.unwrap(); // touch x
            cache.embed(&strings(&["z"]), &params, true).await.unwrap(); // evicts one

            let calls_before = provider.calls().len();
            cache.embed(&strings(&["x"]), &params, true).await.unwrap();
            let x_was_cached = provider.calls().len() == calls_before;
            assert_eq!(x_was_cached, survivor_expected, "policy {:?}", policy);
        }
    }

    #[tokio::test]
    async fn test_params_change_key() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider, 10);
        let mut params = EmbeddingParams::new();
        let plain = cache.cache_key("text", &params);
        params.insert("dimensions".to_string(), 256.into());
        assert_ne!(plain, cache.cache_key("text", &params));
        assert_eq!(cache.cache_key("text", &params), cache.cache_key("text", &params));
        assert_eq!(plain.len(), 64);
    }

    #[tokio::test]
    async fn test_bypass_cache() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10);
        let params = EmbeddingParams::new();
        cache.embed(&strings(&["q"]), &params, false).await.unwrap();
        cache.embed(&strings(&["q"]), &params, false).await.unwrap();
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().hits + cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_short_provider_response_is_error() {
        let provider = Arc::new(RecordingProvider {
            short_by: 1,
            ..RecordingProvider::new()
        });
        let cache = cache_with(provider, 10);
        let err = cache
            .embed(&strings(&["a", "b"]), &EmbeddingParams::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Provider {
                provider: ProviderKind::Embedding,
                ..
            }
        ));
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_memory_ttl_expires() {
        let provider = Arc::new(RecordingProvider::new());
        let config = CacheConfig {
            memory_ttl_secs: Some(1),
            ..Default::default()
        };
        let cache = EmbeddingCache::new(provider.clone(), &config);
        let params = EmbeddingParams::new();
        cache.embed(&strings(&["t"]), &params, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        cache.embed(&strings(&["t"]), &params, true).await.unwrap();
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_persistent_tier_survives_memory_clear() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let params = EmbeddingParams::new();

        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider.clone(), 10).with_store(store.clone(), Duration::from_secs(60));
        let first = cache.embed(&strings(&["persist me"]), &params, true).await.unwrap();

        // fresh cache, same store: served without a provider call
        let provider2 = Arc::new(RecordingProvider::new());
        let cache2 = cache_with(provider2.clone(), 10).with_store(store, Duration::from_secs(60));
        let second = cache2.embed(&strings(&["persist me"]), &params, true).await.unwrap();
        assert_eq!(first[0][..], second[0][..]);
        assert!(provider2.calls().is_empty());
        assert_eq!(cache2.stats().size, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_not_fatal() {
        let store = Arc::new(FlakyStore::new());
        store.set_down(true);
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider, 10).with_store(store, Duration::from_secs(60));
        let out = cache
            .embed(&strings(&["a", "b"]), &EmbeddingParams::new(), true)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let provider = Arc::new(RecordingProvider::new());
        let cache = cache_with(provider, 10);
        cache.embed_query("hello").await.unwrap();
        cache.clear().await.unwrap();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    }
}
