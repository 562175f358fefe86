//! Deterministic hash embeddings
//!
//! Feature-hashes each word (and CJK bigram) into a fixed number of
//! buckets with xxh3, then normalizes. Texts sharing words get positive
//! cosine similarity, which is enough for tests and offline demos. Carries
//! no semantic meaning.

use super::traits::{EmbeddingParams, EmbeddingProvider, EmbeddingResult};
use crate::embedding::math::normalize_embedding;
use crate::text::{Segmenter, UnicodeSegmenter};
use crate::types::Embedding;
use async_trait::async_trait;
use xxhash_rust::xxh3::xxh3_64;

/// Test double provider. Never calls out of process.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
    model: String,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: "xxh3-hash".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Embed one text synchronously
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return vector;
        }
        for word in UnicodeSegmenter.segment(&text.to_lowercase()) {
            let hash = xxh3_64(word.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            // top bit picks the sign so collisions partly cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize_embedding(&vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, texts: &[String], _params: &EmbeddingParams) -> EmbeddingResult<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::math::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed_text("liquidated damages clause");
        let b = provider.embed_text("liquidated damages clause");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_are_similar() {
        let provider = HashEmbeddingProvider::new(256);
        let query = provider.embed_text("rust ownership");
        let related = provider.embed_text("ownership rules in rust");
        let unrelated = provider.embed_text("baking sourdough bread");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let provider = HashEmbeddingProvider::new(32);
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = provider.embed(&texts, &EmbeddingParams::new()).await.unwrap();
        let single = provider.embed_query("two", &EmbeddingParams::new()).await.unwrap();
        assert_eq!(batch[1], single);
    }
}
