//! Redis implementation of named locks.
//!
//! A lock is a key `lock:<name>` holding a random token, set with `NX` and a
//! lease so a crashed holder cannot block a scope forever. Release deletes
//! the key only while it still holds this process's token.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis::{self, Script};
use tracing::warn;
use uuid::Uuid;

use super::{RedisPool, expiry_millis};
use crate::domain::ports::{LockName, LockServiceError, NamedLock};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Lease and polling parameters for [`RedisNamedLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisLockConfig {
    /// How long a grant survives without release.
    pub lease: Duration,
    /// Delay between acquisition attempts while contended.
    pub poll_interval: Duration,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// [`NamedLock`] shared by every process using the same Redis.
pub struct RedisNamedLock {
    pool: RedisPool,
    config: RedisLockConfig,
    tokens: Mutex<HashMap<LockName, String>>,
    release: Script,
}

impl RedisNamedLock {
    /// Build a lock service over `pool`.
    pub fn new(pool: RedisPool, config: RedisLockConfig) -> Self {
        Self {
            pool,
            config,
            tokens: Mutex::new(HashMap::new()),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    fn lock_tokens(&self) -> MutexGuard<'_, HashMap<LockName, String>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn try_set(&self, key: &str, token: &str) -> Result<bool, LockServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|error| LockServiceError::backend(error.to_string()))?;
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(expiry_millis(self.config.lease))
            .query_async::<Option<String>>(&mut *conn)
            .await
            .map_err(|error| LockServiceError::backend(error.to_string()))?;
        Ok(reply.is_some())
    }
}

fn lock_key(name: &LockName) -> String {
    format!("lock:{name}")
}

#[async_trait]
impl NamedLock for RedisNamedLock {
    async fn try_acquire(
        &self,
        name: &LockName,
        timeout: Duration,
    ) -> Result<bool, LockServiceError> {
        let key = lock_key(name);
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_set(&key, &token).await? {
                self.lock_tokens().insert(name.clone(), token);
                return Ok(true);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, name: &LockName) -> Result<(), LockServiceError> {
        let token = self
            .lock_tokens()
            .remove(name)
            .ok_or_else(|| LockServiceError::not_held(name.as_str()))?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|error| LockServiceError::backend(error.to_string()))?;
        let deleted = self
            .release
            .key(lock_key(name))
            .arg(token)
            .invoke_async::<i64>(&mut *conn)
            .await
            .map_err(|error| LockServiceError::backend(error.to_string()))?;
        if deleted == 0 {
            warn!(lock = %name, "lock lease lapsed before release");
            return Err(LockServiceError::not_held(name.as_str()));
        }
        Ok(())
    }
}
