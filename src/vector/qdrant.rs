//! Qdrant client over the REST API
//!
//! Qdrant only accepts unsigned integers or UUIDs as point ids. Chunk ids
//! that are not plain integers are mapped to a UUID derived from their
//! SHA-256, and the original id travels in the `chunk_id` payload field so
//! hits can be mapped back.

use super::{euclid_max_distance, euclid_similarity, VectorHit, VectorIndex, VectorPoint};
use crate::config::DistanceMetric;
use crate::error::{ProviderKind, Result, RetrievalError};
use crate::types::{FilterConditions, Metadata};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

/// Payload field holding the caller's point id
pub const CHUNK_ID_FIELD: &str = "chunk_id";

#[derive(Debug)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    distance: DistanceMetric,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

fn provider_error(message: impl Into<String>) -> RetrievalError {
    RetrievalError::provider(ProviderKind::VectorIndex, message)
}

/// Qdrant point id for a chunk id
pub(crate) fn point_id(id: &str) -> Value {
    if let Ok(n) = id.parse::<u64>() {
        return json!(n);
    }
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    Value::String(format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    ))
}

fn filter_body(filter: &FilterConditions) -> Value {
    let must: Vec<Value> = filter
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

impl QdrantIndex {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        distance: DistanceMetric,
        dimension: usize,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = api_key.or_else(|| std::env::var("QDRANT_API_KEY").ok());
        if let Some(key) = api_key {
            headers.insert(
                "api-key",
                HeaderValue::from_str(&key)
                    .map_err(|e| RetrievalError::config(format!("Invalid Qdrant API key: {}", e)))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrievalError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            distance,
            dimension,
        })
    }

    /// Qdrant reports raw distances for `Euclid`, lower being closer
    fn hit_score(&self, raw: f32) -> f32 {
        match self.distance {
            DistanceMetric::Euclid => euclid_similarity(raw),
            DistanceMetric::Cosine | DistanceMetric::Dot => raw,
        }
    }

    /// Threshold in Qdrant's own units. For `Euclid` that is a maximum distance.
    fn wire_threshold(&self, threshold: f32) -> Option<f32> {
        match self.distance {
            DistanceMetric::Euclid => euclid_max_distance(threshold),
            DistanceMetric::Cosine | DistanceMetric::Dot => Some(threshold),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(format!("Qdrant returned {}: {}", status, body)));
        }
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| provider_error(format!("Invalid Qdrant response: {}", e)))?;
        Ok(parsed.result)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| provider_error(format!("Qdrant request failed: {}", e)))
    }

    /// Create the collection when it does not exist yet
    pub async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }
        info!(
            "Creating Qdrant collection '{}' ({} dims, {})",
            collection,
            dimension,
            self.distance.qdrant_name()
        );
        let body = json!({
            "vectors": { "size": dimension, "distance": self.distance.qdrant_name() }
        });
        let response = self
            .send(self.client.put(self.url(&format!("/collections/{}", collection))).json(&body))
            .await?;
        Self::parse::<Value>(response).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&FilterConditions>,
    ) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold.and_then(|t| self.wire_threshold(t)) {
            body["score_threshold"] = json!(threshold);
        }
        if let Some(conditions) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_body(conditions);
        }

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{}/points/search", collection)))
                    .json(&body),
            )
            .await?;
        let points: Vec<ScoredPoint> = Self::parse(response).await?;
        debug!("Qdrant returned {} hits from '{}'", points.len(), collection);

        Ok(points
            .into_iter()
            .map(|point| {
                let payload = point.payload.unwrap_or_default();
                let id = match payload.get(CHUNK_ID_FIELD) {
                    Some(Value::String(s)) => s.clone(),
                    _ => match point.id {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                };
                VectorHit {
                    id,
                    score: self.hit_score(point.score),
                    payload,
                }
            })
            .collect())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let response = self
            .send(self.client.get(self.url(&format!("/collections/{}/exists", collection))))
            .await?;
        let result: ExistsResult = Self::parse(response).await?;
        Ok(result.exists)
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let dimension = points
            .first()
            .map(|p| p.vector.len())
            .unwrap_or(self.dimension);
        self.ensure_collection(collection, dimension).await?;

        let count = points.len();
        let points: Vec<Value> = points
            .into_iter()
            .map(|point| {
                let mut payload = point.payload;
                payload.insert(CHUNK_ID_FIELD.to_string(), Value::String(point.id.clone()));
                json!({ "id": point_id(&point.id), "vector": point.vector, "payload": payload })
            })
            .collect();

        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/collections/{}/points?wait=true", collection)))
                    .json(&json!({ "points": points })),
            )
            .await?;
        Self::parse::<Value>(response).await?;
        debug!("Upserted {} points into '{}'", count, collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Value> = ids.iter().map(|id| point_id(id)).collect();
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{}/points/delete?wait=true", collection)))
                    .json(&json!({ "points": ids })),
            )
            .await?;
        Self::parse::<Value>(response).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
