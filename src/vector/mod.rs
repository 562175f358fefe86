//! Vector index clients
//!
//! The dense side of retrieval talks to an external index through
//! [`VectorIndex`]. Two backends ship: a brute-force in-process index used
//! for tests and small corpora, and a Qdrant client over its REST API.

mod memory;
mod qdrant;

pub use memory::InMemoryVectorIndex;
pub use qdrant::QdrantIndex;

use crate::config::{VectorBackend, VectorStoreConfig};
use crate::error::Result;
use crate::types::{FilterConditions, Metadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// A point to store in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: Metadata,
}

impl VectorPoint {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Metadata::new(),
        }
    }

    pub fn with_payload(mut self, payload: Metadata) -> Self {
        self.payload = payload;
        self
    }
}

/// A search hit, higher score is more similar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: Metadata,
}

/// Nearest-neighbour search over named collections
#[async_trait]
pub trait VectorIndex: Send + Sync + Debug {
    /// Top `limit` hits for `vector`, best first. Hits scoring below
    /// `score_threshold` are dropped and every filter condition must match
    /// the hit payload exactly.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&FilterConditions>,
    ) -> Result<Vec<VectorHit>>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Insert or replace points, creating the collection if needed
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    fn name(&self) -> &str;
}

/// Build the configured vector index
pub fn create_vector_index(config: &VectorStoreConfig, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    match &config.backend {
        VectorBackend::Memory => {
            info!("Using in-memory vector index ({})", config.distance);
            Ok(Arc::new(InMemoryVectorIndex::new(config.distance)))
        }
        VectorBackend::Qdrant {
            url,
            api_key,
            timeout_secs,
        } => {
            info!("Using Qdrant vector index at {}", url);
            Ok(Arc::new(QdrantIndex::new(
                url,
                api_key.clone(),
                *timeout_secs,
                config.distance,
                dimension,
            )?))
        }
    }
}

/// Euclidean distance as a higher-is-better score in (0, 1]
pub(crate) fn euclid_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Largest distance whose [`euclid_similarity`] still reaches `threshold`.
/// `None` when every distance qualifies.
pub(crate) fn euclid_max_distance(threshold: f32) -> Option<f32> {
    if threshold <= 0.0 {
        None
    } else {
        Some(1.0 / threshold - 1.0)
    }
}

/// Whether every condition matches the payload value for its key
pub(crate) fn payload_matches(payload: &Metadata, filter: Option<&FilterConditions>) -> bool {
    match filter {
        None => true,
        Some(conditions) => conditions
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_matches() {
        let mut payload = Metadata::new();
        payload.insert("lang".to_string(), json!("zh"));
        payload.insert("year".to_string(), json!(2024));

        let mut filter = FilterConditions::new();
        assert!(payload_matches(&payload, Some(&filter)));
        filter.insert("lang".to_string(), json!("zh"));
        assert!(payload_matches(&payload, Some(&filter)));
        filter.insert("year".to_string(), json!(2023));
        assert!(!payload_matches(&payload, Some(&filter)));
        assert!(payload_matches(&payload, None));
    }

    #[test]
    fn test_create_memory_index() {
        let index = create_vector_index(&VectorStoreConfig::default(), 8).unwrap();
        assert_eq!(index.name(), "memory");
    }
}
