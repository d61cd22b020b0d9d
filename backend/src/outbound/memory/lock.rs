//! Process-local named lock.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::ports::{LockName, LockServiceError, NamedLock};

/// Named lock shared by the tasks of one process.
#[derive(Debug, Default)]
pub struct InMemoryNamedLock {
    held: Mutex<HashSet<LockName>>,
    released: Notify,
}

impl InMemoryNamedLock {
    /// Create a lock table with nothing held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held.
    pub fn is_held(&self, name: &LockName) -> bool {
        self.lock_held().contains(name)
    }

    fn try_take(&self, name: &LockName) -> bool {
        self.lock_held().insert(name.clone())
    }

    fn lock_held(&self) -> MutexGuard<'_, HashSet<LockName>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NamedLock for InMemoryNamedLock {
    async fn try_acquire(
        &self,
        name: &LockName,
        timeout: Duration,
    ) -> Result<bool, LockServiceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for the wake-up before checking so a release between
            // the check and the wait is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_take(name) {
                return Ok(true);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_take(name));
            }
        }
    }

    async fn release(&self, name: &LockName) -> Result<(), LockServiceError> {
        let removed = self.lock_held().remove(name);
        self.released.notify_waiters();
        if removed {
            Ok(())
        } else {
            Err(LockServiceError::not_held(name.as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use rstest::rstest;

    fn name(raw: &str) -> LockName {
        LockName::new(raw).expect("valid name")
    }

    #[rstest]
    #[tokio::test]
    async fn second_acquirer_times_out_while_held() {
        let lock = InMemoryNamedLock::new();

        assert!(lock.try_acquire(&name("a"), Duration::ZERO).await.expect("ok"));
        assert!(
            !lock
                .try_acquire(&name("a"), Duration::from_millis(20))
                .await
                .expect("ok")
        );
        assert!(
            lock.try_acquire(&name("b"), Duration::ZERO).await.expect("ok"),
            "scopes are independent"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn waiter_is_granted_on_release() {
        let lock = Arc::new(InMemoryNamedLock::new());
        assert!(lock.try_acquire(&name("a"), Duration::ZERO).await.expect("ok"));

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.try_acquire(&name("a"), Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        lock.release(&name("a")).await.expect("release");

        assert!(waiter.await.expect("join").expect("ok"));
        assert!(lock.is_held(&name("a")));
    }

    #[rstest]
    #[tokio::test]
    async fn releasing_an_unheld_scope_is_reported() {
        let lock = InMemoryNamedLock::new();
        let error = lock.release(&name("a")).await.expect_err("not held");
        assert_eq!(error.kind(), "not_held");
    }
}
