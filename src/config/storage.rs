//! Persistence and vector index configuration

use crate::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Key-value store backing BM25 postings and persistent cache entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local map, lost on exit
    Memory,
    /// Embedded sled database
    Sled {
        #[serde(default = "default_storage_path")]
        path: PathBuf,
    },
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".hybrid-retrieval/store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sled {
            path: default_storage_path(),
        }
    }
}

/// Similarity function used by the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclid => "euclid",
            Self::Dot => "dot",
        }
    }

    /// Name used by the Qdrant API
    pub fn qdrant_name(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Euclid => "Euclid",
            Self::Dot => "Dot",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclid" => Ok(Self::Euclid),
            "dot" => Ok(Self::Dot),
            other => Err(RetrievalError::config(format!(
                "Invalid distance metric '{}': expected 'cosine', 'euclid' or 'dot'",
                other
            ))),
        }
    }
}

/// External vector index backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum VectorBackend {
    /// Brute-force in-process index
    Memory,
    /// Qdrant over its REST API
    Qdrant {
        #[serde(default = "default_qdrant_url")]
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_vector_timeout")]
        timeout_secs: u64,
    },
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_vector_timeout() -> u64 {
    30
}

/// Vector index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(flatten)]
    pub backend: VectorBackend,
    /// Collection holding chunk vectors
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub distance: DistanceMetric,
}

fn default_collection() -> String {
    "documents".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            collection: default_collection(),
            distance: DistanceMetric::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("EUCLID".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclid);
        assert_eq!("dot".parse::<DistanceMetric>().unwrap(), DistanceMetric::Dot);
        assert!(matches!(
            "manhattan".parse::<DistanceMetric>(),
            Err(RetrievalError::Configuration(_))
        ));
    }

    #[test]
    fn test_vector_config_from_toml() {
        let config: VectorStoreConfig = toml::from_str(
            r#"
            backend = "qdrant"
            collection = "contracts"
            distance = "dot"
            "#,
        )
        .unwrap();
        assert_eq!(config.collection, "contracts");
        assert_eq!(config.distance, DistanceMetric::Dot);
        match config.backend {
            VectorBackend::Qdrant { url, .. } => assert_eq!(url, "http://localhost:6333"),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_distance_in_toml() {
        let result: Result<VectorStoreConfig, _> = toml::from_str(
            r#"
            backend = "memory"
            distance = "hamming"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_default_is_sled() {
        assert!(matches!(StorageConfig::default(), StorageConfig::Sled { .. }));
    }
}
