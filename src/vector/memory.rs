//! Brute-force in-process vector index

use super::{euclid_similarity, payload_matches, VectorHit, VectorIndex, VectorPoint};
use crate::config::DistanceMetric;
use crate::embedding::math::{cosine_similarity, dot_product, euclidean_distance};
use crate::error::{ProviderKind, Result, RetrievalError};
use crate::types::FilterConditions;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Exact nearest-neighbour search over every stored point
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    distance: DistanceMetric,
    collections: RwLock<HashMap<String, BTreeMap<String, VectorPoint>>>,
}

impl InMemoryVectorIndex {
    pub fn new(distance: DistanceMetric) -> Self {
        Self {
            distance,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty collection if it does not exist
    pub fn create_collection(&self, collection: &str) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
    }

    /// Number of points in a collection (0 when missing)
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|points| points.len())
            .unwrap_or(0)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot_product(a, b),
            // map distance into (0, 1] so higher stays better
            DistanceMetric::Euclid => euclid_similarity(euclidean_distance(a, b)),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&FilterConditions>,
    ) -> Result<Vec<VectorHit>> {
        let collections = self.collections.read();
        let points = collections.get(collection).ok_or_else(|| {
            RetrievalError::provider(
                ProviderKind::VectorIndex,
                format!("Collection '{}' not found", collection),
            )
        })?;

        let mut hits: Vec<VectorHit> = points
            .values()
            .filter(|point| point.vector.len() == vector.len())
            .filter(|point| payload_matches(&point.payload, filter))
            .map(|point| VectorHit {
                id: point.id.clone(),
                score: self.similarity(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .filter(|hit| score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(collection))
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            stored.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if let Some(stored) = self.collections.write().get_mut(collection) {
            for id in ids {
                stored.remove(id);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use serde_json::json;

    fn point(id: &str, vector: Vec<f32>, lang: &str) -> VectorPoint {
        let mut payload = Metadata::new();
        payload.insert("lang".to_string(), json!(lang));
        VectorPoint::new(id, vector).with_payload(payload)
    }

    async fn seeded(distance: DistanceMetric) -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new(distance);
        index
            .upsert(
                "docs",
                vec![
                    point("a", vec![1.0, 0.0], "en"),
                    point("b", vec![0.0, 1.0], "zh"),
                    point("c", vec![0.7, 0.7], "zh"),
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = seeded(DistanceMetric::Cosine).await;
        let hits = index.search("docs", &[1.0, 0.1], 3, None, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_threshold_and_filter() {
        let index = seeded(DistanceMetric::Cosine).await;
        let hits = index
            .search("docs", &[1.0, 0.0], 10, Some(0.5), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let mut filter = FilterConditions::new();
        filter.insert("lang".to_string(), json!("zh"));
        let hits = index
            .search("docs", &[1.0, 0.0], 10, None, Some(&filter))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.payload["lang"] == json!("zh")));
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_euclid_scores_are_bounded() {
        let index = seeded(DistanceMetric::Euclid).await;
        let hits = index.search("docs", &[1.0, 0.0], 3, None, None).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    }

    #[tokio::test]
    async fn test_missing_collection_is_provider_error() {
        let index = InMemoryVectorIndex::new(DistanceMetric::Cosine);
        assert!(!index.collection_exists("nope").await.unwrap());
        let err = index.search("nope", &[1.0], 1, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Provider {
                provider: ProviderKind::VectorIndex,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let index = seeded(DistanceMetric::Dot).await;
        index
            .upsert("docs", vec![point("a", vec![0.0, 2.0], "en")])
            .await
            .unwrap();
        assert_eq!(index.len("docs"), 3);
        let hits = index.search("docs", &[0.0, 1.0], 1, None, None).await.unwrap();
        assert_eq!(hits[0].id, "a");

        index.delete("docs", &["a".to_string()]).await.unwrap();
        assert_eq!(index.len("docs"), 2);
    }
}
