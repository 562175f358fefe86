//! HTTP embedding backend for OpenAI-compatible APIs
//!
//! This backend supports any OpenAI-compatible embedding API, including:
//! - OpenAI API
//! - Azure OpenAI
//! - Local servers (LM Studio, vLLM, text-embeddings-inference)
//!
//! Requests are not retried here. Rate limiting surfaces as
//! [`EmbeddingError::RateLimited`] for the caller's network layer to handle.

use super::traits::{EmbeddingError, EmbeddingParams, EmbeddingProvider, EmbeddingResult};
use crate::embedding::math::normalize_embedding;
use crate::types::Embedding;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the HTTP embedding backend
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// API endpoint (e.g., "https://api.openai.com/v1/embeddings")
    pub endpoint: String,
    /// API key (optional, can be from env var)
    pub api_key: Option<String>,
    /// Model name (e.g., "text-embedding-3-small")
    pub model: String,
    /// Embedding dimensions
    pub dimensions: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum batch size for requests
    pub max_batch_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: 30,
            max_batch_size: 100,
        }
    }
}

/// HTTP embedding backend for OpenAI-compatible APIs
#[derive(Debug)]
pub struct HttpEmbeddingProvider {
    client: Client,
    config: HttpConfig,
}

/// OpenAI embedding request format
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'a str,
}

/// OpenAI embedding response format
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

/// OpenAI error response format
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl HttpEmbeddingProvider {
    /// Create a new HTTP embedding backend
    pub fn new(config: HttpConfig) -> EmbeddingResult<Self> {
        info!(
            "Initializing HTTP embedding backend: endpoint={}, model={}",
            config.endpoint, config.model
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Get API key from config or environment
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());

        if let Some(key) = &api_key {
            let auth_value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| EmbeddingError::Config(format!("Invalid API key format: {}", e)))?,
            );
        } else if config.endpoint.contains("openai.com") || config.endpoint.contains("azure.com") {
            warn!("No API key provided for {}", config.endpoint);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Requested output dimensions: an explicit `dimensions` param wins,
    /// otherwise only text-embedding-3 models accept the field.
    fn requested_dimensions(&self, params: &EmbeddingParams) -> Option<usize> {
        params
            .get("dimensions")
            .and_then(|v| v.as_u64())
            .map(|d| d as usize)
            .or_else(|| {
                self.config
                    .model
                    .contains("text-embedding-3")
                    .then_some(self.config.dimensions)
            })
    }

    /// Make one embedding request to the API
    async fn request_embeddings(
        &self,
        texts: &[String],
        params: &EmbeddingParams,
    ) -> EmbeddingResult<Vec<Embedding>> {
        let model = params
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.model);
        let request = EmbeddingRequest {
            model,
            input: texts,
            dimensions: self.requested_dimensions(params),
            encoding_format: "float",
        };

        debug!(
            "Sending embedding request to {} for {} texts",
            self.config.endpoint,
            texts.len()
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000);

            return Err(EmbeddingError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "API error ({}): {}",
                    status, error_response.error.message
                )));
            }

            return Err(EmbeddingError::EmbeddingFailed(format!(
                "HTTP error ({}): {}",
                status, error_text
            )));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to parse response: {}", e))
        })?;

        if let Some(usage) = &embedding_response.usage {
            debug!("Embedding request used {} tokens", usage.total_tokens);
        }

        let mut data = embedding_response.data;
        if data.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);

        Ok(data
            .into_iter()
            .map(|d| normalize_embedding(&d.embedding))
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String], params: &EmbeddingParams) -> EmbeddingResult<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch_size.max(1)) {
            all_embeddings.extend(self.request_embeddings(chunk, params).await?);
        }
        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "http"
    }
}
