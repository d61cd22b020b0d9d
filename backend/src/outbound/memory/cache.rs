//! Process-local shared cache tier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{CacheKey, SharedCache, SharedCacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// [`SharedCache`] kept in process memory.
pub struct InMemorySharedCache {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl InMemorySharedCache {
    /// Create an empty cache that expires entries against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `entry` and drop every entry that has already expired, so keys
    /// that are never read again do not accumulate.
    fn store(
        entries: &mut HashMap<CacheKey, Entry>,
        key: &CacheKey,
        entry: Entry,
        now: DateTime<Utc>,
    ) {
        entries.retain(|_, stored| stored.is_live(now));
        entries.insert(key.clone(), entry);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.lock_entries().len()
    }

    fn expiry(&self, ttl: Duration) -> Result<DateTime<Utc>, SharedCacheError> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|error| SharedCacheError::backend(format!("ttl out of range: {error}")))?;
        Ok(self.clock.utc() + ttl)
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, SharedCacheError> {
        let now = self.clock.utc();
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), SharedCacheError> {
        let now = self.clock.utc();
        let expires_at = self.expiry(ttl)?;
        Self::store(
            &mut self.lock_entries(),
            key,
            Entry {
                value: value.to_vec(),
                expires_at: Some(expires_at),
            },
            now,
        );
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), SharedCacheError> {
        self.lock_entries().remove(key);
        Ok(())
    }

    async fn increment(&self, key: &CacheKey) -> Result<i64, SharedCacheError> {
        let now = self.clock.utc();
        let mut entries = self.lock_entries();
        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| SharedCacheError::corrupt(format!("{key} is not an integer")))?,
            _ => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| SharedCacheError::corrupt(format!("{key} overflowed")))?;
        entries.insert(
            key.clone(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn put_if_absent(
        &self,
        key: &CacheKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, SharedCacheError> {
        let now = self.clock.utc();
        let expires_at = self.expiry(ttl)?;
        let mut entries = self.lock_entries();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        Self::store(
            &mut entries,
            key,
            Entry {
                value: value.to_vec(),
                expires_at: Some(expires_at),
            },
            now,
        );
        Ok(true)
    }
}
