//! Namespace epochs for cache invalidation.
//!
//! Each namespace has an integer epoch stored in the shared tier under
//! `cache-epoch:<namespace>` without expiry. Versioned entry keys embed the
//! epoch, so bumping it orphans every entry written under the old value.
//! Bumps use the shared tier's atomic increment so concurrent writers never
//! lose one another's bump.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::CacheNamespace;
use crate::domain::ports::{CacheKey, SharedCache, SharedCacheError};

/// Version number of a cache namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// Wrap a raw epoch.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw epoch.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared-tier key holding the epoch counter of `namespace`.
pub fn epoch_counter_key(namespace: &CacheNamespace) -> Result<CacheKey, SharedCacheError> {
    CacheKey::new(format!("cache-epoch:{namespace}"))
        .map_err(|error| SharedCacheError::corrupt(error.to_string()))
}

/// Reads and bumps namespace epochs.
///
/// The registry remembers the highest epoch it has seen per namespace and
/// never reports a lower one, even if the shared tier loses the counter.
pub struct CacheVersionRegistry {
    shared: Arc<dyn SharedCache>,
    observed: Mutex<HashMap<CacheNamespace, u64>>,
}

impl CacheVersionRegistry {
    /// Build a registry over the shared tier.
    pub fn new(shared: Arc<dyn SharedCache>) -> Self {
        Self {
            shared,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Current epoch of `namespace`; absent counters read as zero.
    pub async fn current_epoch(&self, namespace: &CacheNamespace) -> Result<Epoch, SharedCacheError> {
        let key = epoch_counter_key(namespace)?;
        let stored = match self.shared.get(&key).await? {
            Some(bytes) => parse_counter(&bytes)?,
            None => 0,
        };
        Ok(self.observe(namespace, stored))
    }

    /// Atomically advance the epoch of `namespace` and return the new value.
    pub async fn bump_epoch(&self, namespace: &CacheNamespace) -> Result<Epoch, SharedCacheError> {
        let key = epoch_counter_key(namespace)?;
        let raw = self.shared.increment(&key).await?;
        let value = u64::try_from(raw)
            .map_err(|_| SharedCacheError::corrupt(format!("negative epoch {raw} for {key}")))?;
        Ok(self.observe(namespace, value))
    }

    /// Versioned key for `entity` at the current epoch.
    pub async fn key_for(
        &self,
        namespace: &CacheNamespace,
        entity: &str,
    ) -> Result<CacheKey, SharedCacheError> {
        let epoch = self.current_epoch(namespace).await?;
        Self::versioned_key(namespace, epoch, entity)
    }

    /// Compose `<namespace>:v<epoch>:<entity>`; whitespace in `entity` is
    /// replaced with `_`.
    pub fn versioned_key(
        namespace: &CacheNamespace,
        epoch: Epoch,
        entity: &str,
    ) -> Result<CacheKey, SharedCacheError> {
        let entity = entity.replace(char::is_whitespace, "_");
        CacheKey::new(format!("{namespace}:v{epoch}:{entity}"))
            .map_err(|error| SharedCacheError::corrupt(error.to_string()))
    }

    fn observe(&self, namespace: &CacheNamespace, value: u64) -> Epoch {
        let mut observed = self.lock_observed();
        let slot = observed.entry(namespace.clone()).or_insert(0);
        *slot = (*slot).max(value);
        Epoch(*slot)
    }

    fn lock_observed(&self) -> MutexGuard<'_, HashMap<CacheNamespace, u64>> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_counter(bytes: &[u8]) -> Result<u64, SharedCacheError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .ok_or_else(|| SharedCacheError::corrupt("epoch counter is not an unsigned integer"))
}
