//! Generic key-value cache with per-entry expiry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::CacheRepository;
use crate::database::time::{ms_after, now_ms};
use crate::utils::json::{self, JsonContext};

/// Memoization for small values that do not deserve their own table.
///
/// Expired entries read as absent and are deleted when they are read, when
/// [`ExpiringCache::purge_expired`] runs at startup and by the periodic purge task.
#[derive(Clone)]
pub struct ExpiringCache {
    repo: Arc<dyn CacheRepository>,
}

impl ExpiringCache {
    pub fn new(repo: Arc<dyn CacheRepository>) -> Self {
        Self { repo }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = json::to_column(value)?;
        self.repo.set(key, &raw, ms_after(ttl)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.repo.get(key).await? else {
            return Ok(None);
        };

        if entry.expires_at <= now_ms() {
            debug!(key, "Cache entry expired; purging");
            self.repo.delete(key).await?;
            return Ok(None);
        }

        match json::parse_strict(&entry.value, JsonContext::CacheEntry { key }) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // A memo that cannot be decoded is just a miss.
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.repo.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.repo.delete(key).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let purged = self.repo.purge_expired(now_ms()).await?;
        if purged > 0 {
            info!(count = purged, "Purged expired cache entries");
        }
        Ok(purged)
    }
}
