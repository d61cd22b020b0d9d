//! Scoped acquisition on top of the [`NamedLock`] port.
//!
//! A granted lock is represented by a [`HeldLock`]. Releasing it explicitly
//! surfaces release failures; dropping it (early return, `?`, panic unwind or
//! cancellation) schedules a release on the current Tokio runtime so a scope
//! is never left held by a finished task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::{LockName, LockServiceError, NamedLock};

/// Identity of one granted acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// Locked scope.
    pub scope: LockName,
    /// Unique holder id for this acquisition.
    pub holder: Uuid,
    /// When the lock was granted.
    pub acquired_at: DateTime<Utc>,
    /// Wait that was allowed for the grant.
    pub timeout: Duration,
}

/// Result of a bounded acquisition attempt.
#[derive(Debug)]
pub enum Acquisition {
    /// The lock was granted.
    Held(HeldLock),
    /// The scope stayed held by someone else for the whole wait.
    Contended,
}

/// Guard for a granted lock.
pub struct HeldLock {
    lock: Arc<dyn NamedLock>,
    token: LockToken,
    released: bool,
}

impl HeldLock {
    /// Try to take `name`, waiting at most `timeout`.
    pub async fn acquire(
        lock: Arc<dyn NamedLock>,
        name: LockName,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Acquisition, LockServiceError> {
        if !lock.try_acquire(&name, timeout).await? {
            return Ok(Acquisition::Contended);
        }
        let token = LockToken {
            scope: name,
            holder: Uuid::new_v4(),
            acquired_at: now,
            timeout,
        };
        debug!(scope = %token.scope, holder = %token.holder, "lock acquired");
        Ok(Acquisition::Held(Self {
            lock,
            token,
            released: false,
        }))
    }

    /// Acquisition details.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release the lock now.
    pub async fn release(mut self) -> Result<(), LockServiceError> {
        self.released = true;
        let result = self.lock.release(&self.token.scope).await;
        debug!(scope = %self.token.scope, holder = %self.token.holder, "lock released");
        result
    }
}

impl std::fmt::Debug for HeldLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLock")
            .field("token", &self.token)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = Arc::clone(&self.lock);
        let scope = self.token.scope.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = lock.release(&scope).await {
                        warn!(scope = %scope, error = %error, "deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    scope = %scope,
                    "lock dropped outside a runtime; relying on backend expiry"
                );
            }
        }
    }
}
