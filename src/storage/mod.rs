//! Key-value persistence for BM25 postings and cached embeddings
//!
//! Everything the engine persists goes through [`KeyValueStore`], so the
//! backing store can be swapped (embedded sled, in-process map) without
//! touching the index or cache code.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::config::StorageConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Minimal async key-value interface with optional per-entry expiry
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Fetch a value; expired entries read as absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any existing one
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// All live entries whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key under `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let entries = self.scan_prefix(prefix).await?;
        let mut removed = 0;
        for (key, _) in entries {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Flush buffered writes, if the backend buffers
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Open the configured store
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config {
        StorageConfig::Memory => {
            info!("Using in-memory key-value store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageConfig::Sled { path } => {
            info!("Opening sled key-value store at {}", path.display());
            Ok(Arc::new(SledStore::open(path)?))
        }
    }
}
