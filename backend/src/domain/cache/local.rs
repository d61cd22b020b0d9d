//! Bounded in-process cache tier.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::ports::CacheKey;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Per-process cache with per-entry expiry and a fixed capacity.
///
/// When full, expired entries are purged first; if none expired, the entry
/// closest to expiry is evicted.
#[derive(Debug)]
pub struct LocalCacheTier {
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, LocalEntry>>,
}

impl LocalCacheTier {
    /// Create a tier holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch an unexpired entry.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Vec<u8>> {
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store an entry for `ttl`.
    pub fn put(&self, key: CacheKey, value: Vec<u8>, ttl: Duration, now: DateTime<Utc>) {
        let Ok(ttl) = TimeDelta::from_std(ttl) else {
            return;
        };
        if ttl <= TimeDelta::zero() {
            return;
        }
        let mut entries = self.lock_entries();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone());
                if let Some(soonest) = soonest {
                    entries.remove(&soonest);
                }
            }
        }
        entries.insert(
            key,
            LocalEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop an entry.
    pub fn remove(&self, key: &CacheKey) {
        self.lock_entries().remove(key);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, LocalEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
