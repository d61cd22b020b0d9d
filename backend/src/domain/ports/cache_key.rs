//! Cache key type shared by the shared-cache adapters and the local tier.
use thiserror::Error;

/// Longest key accepted by any cache adapter.
pub const MAX_CACHE_KEY_LEN: usize = 512;

/// Validated cache key.
///
/// Keys are opaque to adapters; the domain composes them as
/// `<namespace>:v<epoch>:<entity>` for versioned entries and uses fixed
/// prefixes for epoch counters and toggle guards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Construct a cache key after validating that it is non-empty, bounded
    /// and free of whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheKeyValidationError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(CacheKeyValidationError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(CacheKeyValidationError::ContainsWhitespace);
        }
        if raw.len() > MAX_CACHE_KEY_LEN {
            return Err(CacheKeyValidationError::TooLong { length: raw.len() });
        }
        Ok(Self(raw))
    }

    /// Borrow the underlying key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Validation errors returned when constructing [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyValidationError {
    /// Key is empty after trimming whitespace.
    #[error("cache key must not be empty")]
    Empty,
    /// Key contains whitespace anywhere.
    #[error("cache key must not contain whitespace")]
    ContainsWhitespace,
    /// Key exceeds [`MAX_CACHE_KEY_LEN`].
    #[error("cache key is {length} bytes; limit is 512")]
    TooLong {
        /// Length of the rejected key in bytes.
        length: usize,
    },
}
