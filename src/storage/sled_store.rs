//! Embedded sled store
//!
//! Values are wrapped in a small bincode envelope carrying an optional
//! absolute expiry (unix millis). Expired entries are removed lazily on read.

use super::KeyValueStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at_ms: Option<i64>,
    data: Vec<u8>,
}

impl Envelope {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|t| t > now_ms)
    }
}

/// Persistent store on a sled tree
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        debug!("Opened sled store at {:?}", path.as_ref());
        Ok(Self { db })
    }

    /// Temporary database removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn decode(&self, key: &[u8], raw: &[u8], now_ms: i64) -> Option<Vec<u8>> {
        match bincode::deserialize::<Envelope>(raw) {
            Ok(envelope) if envelope.is_live(now_ms) => Some(envelope.data),
            Ok(_) => {
                if let Err(e) = self.db.remove(key) {
                    warn!("Failed to purge expired key: {}", e);
                }
                None
            }
            Err(e) => {
                warn!(
                    "Skipping undecodable entry {}: {}",
                    String::from_utf8_lossy(key),
                    e
                );
                None
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now_ms = Utc::now().timestamp_millis();
        Ok(self
            .db
            .get(key.as_bytes())?
            .and_then(|raw| self.decode(key.as_bytes(), &raw, now_ms)))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let envelope = Envelope {
            expires_at_ms: ttl.map(|d| Utc::now().timestamp_millis() + d.as_millis() as i64),
            data: value,
        };
        let raw = bincode::serialize(&envelope)?;
        self.db.insert(key.as_bytes(), raw)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, raw) = item?;
            if let Some(data) = self.decode(&key, &raw, now_ms) {
                out.push((String::from_utf8_lossy(&key).into_owned(), data));
            }
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.db.remove(key.as_bytes())?.is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sled"
    }
}
