//! Port abstraction for the cross-process cache tier.

use std::time::Duration;

use async_trait::async_trait;

use super::CacheKey;
use super::define_port_error;
use crate::domain::resilience::{FailureClass, RemoteFailure};

define_port_error! {
    /// Errors raised by shared cache adapters.
    pub enum SharedCacheError {
        /// The cache backend could not be reached or failed the command.
        Backend { message: String } => "shared cache backend failure: {message}",
        /// A stored value could not be interpreted.
        Corrupt { message: String } => "shared cache value is corrupt: {message}",
    }
}

impl RemoteFailure for SharedCacheError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Backend { .. } => FailureClass::Transient,
            Self::Corrupt { .. } => FailureClass::Permanent,
        }
    }
}

/// Shared key/value cache with expiry and atomic counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Fetch the bytes stored under `key`, if present and unexpired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, SharedCacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Duration)
    -> Result<(), SharedCacheError>;

    /// Remove `key`; removing an absent key succeeds.
    async fn remove(&self, key: &CacheKey) -> Result<(), SharedCacheError>;

    /// Atomically increment the integer counter under `key` and return the
    /// new value. Absent counters start from zero and never expire.
    async fn increment(&self, key: &CacheKey) -> Result<i64, SharedCacheError>;

    /// Store `value` only when `key` is absent. Returns whether it was stored.
    async fn put_if_absent(
        &self,
        key: &CacheKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, SharedCacheError>;
}
