//! Epoch-versioned cache access for one namespace.
//!
//! Reads derive their key from the current epoch on every call. Writers call
//! [`CachePublisher::publish`] after the store commit and before giving up
//! their lock: the epoch is bumped through the executor and the committed
//! value is written under the new epoch's keys.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use super::CoordinatorDeps;
use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;
use crate::domain::cache::{CacheNamespace, CacheVersionRegistry, TieredCache};
use crate::domain::ports::CacheKey;
use crate::domain::resilience::{ExecuteOptions, ResilientExecutor, RetryPolicy};

/// Cache reads and post-commit refreshes for one namespace.
#[derive(Clone)]
pub struct CachePublisher {
    namespace: CacheNamespace,
    cache: Arc<TieredCache>,
    versions: Arc<CacheVersionRegistry>,
    executor: Arc<ResilientExecutor>,
    policy: RetryPolicy,
    ttl: Duration,
}

impl CachePublisher {
    /// Publisher for `namespace` writing entries with `ttl`.
    pub fn new(
        namespace: CacheNamespace,
        deps: &CoordinatorDeps,
        policy: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            namespace,
            cache: Arc::clone(&deps.cache),
            versions: Arc::clone(&deps.versions),
            executor: Arc::clone(&deps.executor),
            policy,
            ttl,
        }
    }

    /// Serve `entity` from the cache, falling back to `load` and filling the
    /// cache with what it returns.
    ///
    /// Cache failures degrade to a load; only `load` errors are returned.
    pub async fn read_through<T, F, Fut>(&self, entity: &str, load: F) -> Result<Option<T>, Error>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, Error>>,
    {
        let key = self.key(entity).await;
        if let Some(key) = key.as_ref() {
            if let Some(value) = self.cache.get_json::<T>(key).await {
                return Ok(Some(value));
            }
        }
        let value = load().await?;
        if let (Some(key), Some(value)) = (key.as_ref(), value.as_ref()) {
            self.fill(key, value).await;
        }
        Ok(value)
    }

    /// Bump the namespace epoch and store `value` under each entity's key at
    /// the new epoch.
    ///
    /// The store already holds the write, so failures are logged rather than
    /// returned. When the bump fails the entries at the current epoch are
    /// evicted so readers fall through to the store.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        entities: &[String],
        value: &T,
        budget: &ExecutionBudget,
    ) {
        let versions = Arc::clone(&self.versions);
        let namespace = self.namespace.clone();
        let bumped = self
            .executor
            .execute(
                &ExecuteOptions::idempotent("cache.epoch", self.policy),
                budget,
                move |_| {
                    let versions = Arc::clone(&versions);
                    let namespace = namespace.clone();
                    async move { versions.bump_epoch(&namespace).await }
                },
            )
            .await;

        match bumped {
            Ok(epoch) => {
                for entity in entities {
                    match CacheVersionRegistry::versioned_key(&self.namespace, epoch, entity) {
                        Ok(key) => self.fill(&key, value).await,
                        Err(error) => warn!(error = %error, "cannot build refreshed cache key"),
                    }
                }
            }
            Err(bump_error) => {
                error!(
                    namespace = %self.namespace,
                    error = %bump_error,
                    "epoch bump failed after commit; evicting current entries"
                );
                for entity in entities {
                    let Some(key) = self.key(entity).await else {
                        continue;
                    };
                    if let Err(error) = self.cache.remove(&key).await {
                        warn!(key = %key, error = %error, "failed to evict cache entry");
                    }
                }
            }
        }
    }

    async fn key(&self, entity: &str) -> Option<CacheKey> {
        match self.versions.key_for(&self.namespace, entity).await {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(
                    namespace = %self.namespace,
                    error = %error,
                    kind = error.kind(),
                    "epoch read failed; bypassing cache"
                );
                None
            }
        }
    }

    async fn fill<T: Serialize + Sync>(&self, key: &CacheKey, value: &T) {
        if let Err(error) = self.cache.put_json(key, value, self.ttl).await {
            warn!(key = %key, error = %error, "failed to refresh cache entry");
        }
    }
}
