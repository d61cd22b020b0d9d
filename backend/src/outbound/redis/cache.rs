//! Redis implementation of the shared cache tier.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis::{self, RedisError};
use tracing::debug;

use super::{RedisPool, RedisPoolError, expiry_millis};
use crate::domain::ports::{CacheKey, SharedCache, SharedCacheError};

/// [`SharedCache`] backed by plain Redis strings.
///
/// Values are stored under the cache key verbatim; expiries use `PX` so
/// sub-second TTLs survive. Counters use `INCR` and carry no expiry.
#[derive(Clone)]
pub struct RedisSharedCache {
    pool: RedisPool,
}

impl RedisSharedCache {
    /// Wrap a connection pool.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: RedisPoolError) -> SharedCacheError {
    SharedCacheError::backend(error.to_string())
}

fn map_redis_error(error: RedisError) -> SharedCacheError {
    SharedCacheError::backend(error.to_string())
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, SharedCacheError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        redis::cmd("GET")
            .arg(key.as_str())
            .query_async::<Option<Vec<u8>>>(&mut *conn)
            .await
            .map_err(map_redis_error)
    }

    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), SharedCacheError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async::<()>(&mut *conn)
            .await
            .map_err(map_redis_error)
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), SharedCacheError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let removed = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        debug!(key = %key, removed, "shared cache entry removed");
        Ok(())
    }

    async fn increment(&self, key: &CacheKey) -> Result<i64, SharedCacheError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        redis::cmd("INCR")
            .arg(key.as_str())
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|error| {
                if error.to_string().contains("not an integer") {
                    SharedCacheError::corrupt(format!("{key} is not an integer"))
                } else {
                    map_redis_error(error)
                }
            })
    }

    async fn put_if_absent(
        &self,
        key: &CacheKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, SharedCacheError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let reply = redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async::<Option<String>>(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_failures_are_transient_backend_errors() {
        use crate::domain::resilience::RemoteFailure;

        let error = map_pool_error(RedisPoolError::checkout("timed out"));

        assert_eq!(error.kind(), "backend");
        assert!(error.is_retryable());
        assert!(error.to_string().contains("timed out"));
    }
}
