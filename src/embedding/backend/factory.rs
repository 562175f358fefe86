//! Provider factory
//!
//! The provider is selected once from configuration. Components receive
//! the resulting handle and never switch providers on their own.

use super::hash::HashEmbeddingProvider;
use super::http::{HttpConfig, HttpEmbeddingProvider};
use super::traits::{EmbeddingProvider, EmbeddingResult};
use crate::config::BackendConfig;
use std::sync::Arc;
use tracing::info;

/// Create an embedding provider from configuration
///
/// Returns an `Arc<dyn EmbeddingProvider>` that can be shared across tasks.
pub fn create_provider(config: &BackendConfig) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    match config {
        BackendConfig::Http {
            endpoint,
            api_key,
            model,
            dimensions,
            timeout_secs,
            max_batch_size,
        } => {
            info!("Creating HTTP embedding provider: endpoint={}", endpoint);

            let http_config = HttpConfig {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
                model: model.clone(),
                dimensions: *dimensions,
                timeout_secs: *timeout_secs,
                max_batch_size: *max_batch_size,
            };

            Ok(Arc::new(HttpEmbeddingProvider::new(http_config)?))
        }

        BackendConfig::Hash { dimensions, model } => {
            info!("Creating hash embedding provider: {} dimensions", dimensions);
            Ok(Arc::new(
                HashEmbeddingProvider::new(*dimensions).with_model(model.clone()),
            ))
        }
    }
}
