//! Local tier in front of the shared tier.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::LocalCacheTier;
use crate::domain::ports::{CacheKey, SharedCache, SharedCacheError};

/// Two-tier cache.
///
/// `get` checks the local tier, then the shared tier, promoting shared hits
/// into the local tier for at most `local_ttl`. Shared-tier read failures
/// are logged and treated as misses; write failures are returned so the
/// caller can decide whether they matter.
pub struct TieredCache {
    local: LocalCacheTier,
    shared: Arc<dyn SharedCache>,
    clock: Arc<dyn Clock>,
    local_ttl: Duration,
}

impl TieredCache {
    /// Build a tiered cache.
    pub fn new(
        local: LocalCacheTier,
        shared: Arc<dyn SharedCache>,
        clock: Arc<dyn Clock>,
        local_ttl: Duration,
    ) -> Self {
        Self {
            local,
            shared,
            clock,
            local_ttl,
        }
    }

    /// Shared tier, for atomic operations the tiered view does not offer.
    pub fn shared(&self) -> &Arc<dyn SharedCache> {
        &self.shared
    }

    /// Fetch raw bytes.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let now = self.clock.utc();
        if let Some(value) = self.local.get(key, now) {
            return Some(value);
        }
        match self.shared.get(key).await {
            Ok(Some(value)) => {
                self.local.put(key.clone(), value.clone(), self.local_ttl, now);
                Some(value)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(key = %key, error = %error, kind = error.kind(), "shared cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store raw bytes in both tiers.
    pub async fn put(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), SharedCacheError> {
        self.local.put(
            key.clone(),
            value.to_vec(),
            ttl.min(self.local_ttl),
            self.clock.utc(),
        );
        self.shared.put(key, value, ttl).await
    }

    /// Remove from both tiers.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), SharedCacheError> {
        self.local.remove(key);
        self.shared.remove(key).await
    }

    /// Fetch and decode a JSON value. Undecodable entries are evicted and
    /// reported as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                debug!(key = %key, error = %error, "discarding undecodable cache entry");
                if let Err(remove_error) = self.remove(key).await {
                    debug!(key = %key, error = %remove_error, "failed to evict undecodable entry");
                }
                None
            }
        }
    }

    /// Encode and store a JSON value.
    pub async fn put_json<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<(), SharedCacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|error| SharedCacheError::corrupt(error.to_string()))?;
        self.put(key, &bytes, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockSharedCache;
    use crate::outbound::memory::InMemorySharedCache;
    use crate::test_support::MutableClock;
    use rstest::rstest;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).expect("valid key")
    }

    #[rstest]
    #[tokio::test]
    async fn shared_hits_are_promoted_to_the_local_tier() {
        let clock = Arc::new(MutableClock::default());
        let shared = Arc::new(InMemorySharedCache::new(clock.clone()));
        shared
            .put(&key("users:v0:id:1"), b"{}", Duration::from_secs(60))
            .await
            .expect("seed");
        let cache = TieredCache::new(
            LocalCacheTier::new(8),
            shared.clone(),
            clock.clone(),
            Duration::from_secs(5),
        );

        assert_eq!(cache.get(&key("users:v0:id:1")).await, Some(b"{}".to_vec()));

        shared
            .remove(&key("users:v0:id:1"))
            .await
            .expect("remove from shared only");
        assert_eq!(
            cache.get(&key("users:v0:id:1")).await,
            Some(b"{}".to_vec()),
            "served from the local tier"
        );

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.get(&key("users:v0:id:1")).await, None);
    }

    #[rstest]
    #[tokio::test]
    async fn shared_read_failures_degrade_to_misses() {
        let mut shared = MockSharedCache::new();
        shared
            .expect_get()
            .returning(|_| Err(SharedCacheError::backend("connection refused")));
        let cache = TieredCache::new(
            LocalCacheTier::new(8),
            Arc::new(shared),
            Arc::new(MutableClock::default()),
            Duration::from_secs(5),
        );

        assert_eq!(cache.get(&key("users:v0:id:1")).await, None);
    }

    #[rstest]
    #[tokio::test]
    async fn json_helpers_round_trip_and_evict_garbage() {
        let clock = Arc::new(MutableClock::default());
        let shared = Arc::new(InMemorySharedCache::new(clock.clone()));
        let cache = TieredCache::new(
            LocalCacheTier::new(8),
            shared.clone(),
            clock,
            Duration::from_secs(5),
        );

        cache
            .put_json(&key("k"), &vec![1_u8, 2, 3], Duration::from_secs(30))
            .await
            .expect("put");
        assert_eq!(cache.get_json::<Vec<u8>>(&key("k")).await, Some(vec![1, 2, 3]));

        cache
            .put(&key("bad"), b"not json", Duration::from_secs(30))
            .await
            .expect("put");
        assert_eq!(cache.get_json::<Vec<u8>>(&key("bad")).await, None);
        assert_eq!(shared.get(&key("bad")).await.expect("read"), None);
    }
}
