//! Error taxonomy for retrieval operations

use crate::embedding::EmbeddingError;
use std::fmt;

/// External collaborator that produced a [`RetrievalError::Provider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Embedding,
    VectorIndex,
    Reranker,
    Lexical,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::VectorIndex => "vector_index",
            Self::Reranker => "reranker",
            Self::Lexical => "lexical",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the retrieval core
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The persistence layer could not be reached. In-memory state is still valid.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// An upstream provider call failed
    #[error("{provider} provider error: {message}")]
    Provider {
        provider: ProviderKind,
        message: String,
    },

    /// Invalid configuration (fusion method, weights, distance metric, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every retrieval source failed for a query
    #[error("All retrieval sources failed (lexical: {lexical}; vector: {vector})")]
    AllSourcesFailed { lexical: String, vector: String },
}

impl RetrievalError {
    pub fn provider(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error leaves in-memory state usable
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }
}

impl From<EmbeddingError> for RetrievalError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Config(msg) => Self::Configuration(msg),
            other => Self::provider(ProviderKind::Embedding, other.to_string()),
        }
    }
}

impl From<sled::Error> for RetrievalError {
    fn from(err: sled::Error) -> Self {
        Self::TransientStorage(err.to_string())
    }
}

impl From<bincode::Error> for RetrievalError {
    fn from(err: bincode::Error) -> Self {
        Self::TransientStorage(format!("Serialization failed: {}", err))
    }
}

/// Result type for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_maps_to_provider() {
        let err: RetrievalError = EmbeddingError::EmbeddingFailed("boom".to_string()).into();
        match err {
            RetrievalError::Provider { provider, message } => {
                assert_eq!(provider, ProviderKind::Embedding);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_embedding_config_error_maps_to_configuration() {
        let err: RetrievalError = EmbeddingError::Config("bad key".to_string()).into();
        assert!(matches!(err, RetrievalError::Configuration(_)));
    }

    #[test]
    fn test_display() {
        let err = RetrievalError::provider(ProviderKind::VectorIndex, "timeout");
        assert_eq!(err.to_string(), "vector_index provider error: timeout");
        assert!(RetrievalError::TransientStorage("down".into()).is_transient());
    }
}
