//! Two-tier caching with epoch-versioned keys.
//!
//! Reads consult a bounded per-process tier, then the shared tier, then the
//! store. Writers never delete cached entries; they bump the namespace epoch
//! so every key minted before the write becomes unreachable.

use thiserror::Error;

mod epoch;
mod local;
mod tiered;

pub use epoch::{CacheVersionRegistry, Epoch, epoch_counter_key};
pub use local::LocalCacheTier;
pub use tiered::TieredCache;

/// Group of cache entries invalidated together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheNamespace(String);

impl CacheNamespace {
    /// Validate a namespace: lowercase ASCII letters, digits, `-` and `_`.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheNamespaceError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(CacheNamespaceError { value });
        }
        Ok(Self(value))
    }

    /// User records.
    pub fn users() -> Self {
        Self("users".to_owned())
    }

    /// Reaction cells.
    pub fn reactions() -> Self {
        Self("reactions".to_owned())
    }

    /// Borrow the namespace.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache namespace {value:?} must be lowercase letters, digits, '-' or '_'")]
pub struct CacheNamespaceError {
    value: String,
}
