//! Lock-scoped critical sections.
//!
//! Every mutation runs through [`ExclusiveRunner::run`], which walks the
//! phases `REQUESTED → LOCK_WAIT → HOLDING → COMMITTING → RELEASED` (or
//! `REJECTED` when the lock is not granted), logging each transition with the
//! scope, the operation and the elapsed time. The lock is released on every
//! exit from the body; a panicking or cancelled body falls back to the
//! deferred release of [`HeldLock`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;
use crate::domain::mutation::{Contention, MutationOutcome, MutationResult};
use crate::domain::named_lock::{Acquisition, HeldLock};
use crate::domain::ports::{LockName, NamedLock};
use crate::domain::resilience::millis;

/// Coordinator phase of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The mutation was received.
    Requested,
    /// Waiting for the scope lock.
    LockWait,
    /// The lock is held; reading and merging.
    Holding,
    /// Writing to the store.
    Committing,
    /// The lock was given back.
    Released,
    /// The lock was not granted.
    Rejected,
}

impl Phase {
    /// Upper-case label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::LockWait => "LOCK_WAIT",
            Self::Holding => "HOLDING",
            Self::Committing => "COMMITTING",
            Self::Released => "RELEASED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// Handle passed to a critical section body.
#[derive(Clone)]
pub struct CriticalSection {
    scope: LockName,
    operation: &'static str,
    budget: ExecutionBudget,
    requested_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl CriticalSection {
    /// Locked scope.
    pub fn scope(&self) -> &LockName {
        &self.scope
    }

    /// Budget of the request holding the lock.
    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    /// Move to `COMMITTING`, refusing when the budget has run out so the
    /// caller abandons the write and releases the lock instead.
    pub fn enter_commit(&self) -> Result<(), Error> {
        if self.budget.is_exhausted() {
            warn!(
                phase = Phase::Committing.as_str(),
                scope = %self.scope,
                operation = self.operation,
                elapsed_ms = elapsed_ms(self.clock.as_ref(), self.requested_at),
                "execution budget exhausted before commit; abandoning write"
            );
            return Err(Error::deadline_exceeded(format!(
                "{} abandoned before commit: execution budget exhausted",
                self.operation
            ))
            .with_details(json!({ "scope": self.scope.as_str(), "operation": self.operation })));
        }
        debug!(
            phase = Phase::Committing.as_str(),
            scope = %self.scope,
            operation = self.operation,
            elapsed_ms = elapsed_ms(self.clock.as_ref(), self.requested_at),
            "committing"
        );
        Ok(())
    }
}

/// Runs bodies under a named lock.
#[derive(Clone)]
pub struct ExclusiveRunner {
    locks: Arc<dyn NamedLock>,
    clock: Arc<dyn Clock>,
}

impl ExclusiveRunner {
    /// Build a runner over a lock service.
    pub fn new(locks: Arc<dyn NamedLock>, clock: Arc<dyn Clock>) -> Self {
        Self { locks, clock }
    }

    /// Run `body` while holding `scope`.
    ///
    /// The lock wait is `lock_timeout` clamped to the remaining budget. A
    /// wait that ends without a grant yields [`Contention::LockBusy`]; an
    /// exhausted budget or a failing lock service yields an error.
    pub async fn run<T, F, Fut>(
        &self,
        scope: LockName,
        operation: &'static str,
        lock_timeout: Duration,
        budget: &ExecutionBudget,
        body: F,
    ) -> MutationResult<T>
    where
        F: FnOnce(CriticalSection) -> Fut,
        Fut: Future<Output = MutationResult<T>>,
    {
        let requested_at = self.clock.utc();
        let log = |phase: Phase| {
            debug!(
                phase = phase.as_str(),
                scope = %scope,
                operation,
                elapsed_ms = elapsed_ms(self.clock.as_ref(), requested_at),
                "coordinator phase"
            );
        };
        log(Phase::Requested);

        let Some(wait) = budget.bounded(lock_timeout) else {
            self.log_rejected(&scope, operation, requested_at, "budget exhausted");
            return Err(Error::deadline_exceeded(format!(
                "{operation} not attempted: execution budget exhausted"
            ))
            .with_details(json!({ "scope": scope.as_str(), "operation": operation })));
        };
        debug!(
            phase = Phase::LockWait.as_str(),
            scope = %scope,
            operation,
            wait_ms = millis(wait),
            elapsed_ms = elapsed_ms(self.clock.as_ref(), requested_at),
            "coordinator phase"
        );

        let acquisition =
            HeldLock::acquire(Arc::clone(&self.locks), scope.clone(), wait, self.clock.utc()).await;
        let held = match acquisition {
            Ok(Acquisition::Held(held)) => held,
            Ok(Acquisition::Contended) => {
                self.log_rejected(&scope, operation, requested_at, "lock busy");
                return Ok(MutationOutcome::Contended(Contention::LockBusy {
                    scope: scope.to_string(),
                }));
            }
            Err(error) => {
                self.log_rejected(&scope, operation, requested_at, "lock service failed");
                return Err(Error::unavailable(format!("lock service failed: {error}"))
                    .with_details(json!({ "scope": scope.as_str(), "kind": error.kind() })));
            }
        };
        log(Phase::Holding);

        let section = CriticalSection {
            scope: scope.clone(),
            operation,
            budget: budget.clone(),
            requested_at,
            clock: Arc::clone(&self.clock),
        };
        let result = body(section).await;

        if let Err(error) = held.release().await {
            warn!(scope = %scope, operation, error = %error, "lock release failed");
        }
        info!(
            phase = Phase::Released.as_str(),
            scope = %scope,
            operation,
            outcome = outcome_label(&result),
            elapsed_ms = elapsed_ms(self.clock.as_ref(), requested_at),
            "coordinator phase"
        );
        result
    }

    fn log_rejected(
        &self,
        scope: &LockName,
        operation: &'static str,
        requested_at: DateTime<Utc>,
        reason: &'static str,
    ) {
        info!(
            phase = Phase::Rejected.as_str(),
            scope = %scope,
            operation,
            reason,
            elapsed_ms = elapsed_ms(self.clock.as_ref(), requested_at),
            "coordinator phase"
        );
    }
}

fn outcome_label<T>(result: &MutationResult<T>) -> &'static str {
    match result {
        Ok(MutationOutcome::Applied(_)) => "applied",
        Ok(MutationOutcome::Contended(_)) => "contended",
        Err(_) => "failed",
    }
}

fn elapsed_ms(clock: &dyn Clock, since: DateTime<Utc>) -> u64 {
    (clock.utc() - since)
        .to_std()
        .map_or(0, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::ports::{LockServiceError, MockNamedLock};
    use crate::outbound::memory::InMemoryNamedLock;
    use crate::test_support::MutableClock;
    use rstest::{fixture, rstest};

    struct Fixture {
        clock: Arc<MutableClock>,
        locks: Arc<InMemoryNamedLock>,
        runner: ExclusiveRunner,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let clock = Arc::new(MutableClock::default());
        let locks = Arc::new(InMemoryNamedLock::new());
        let runner = ExclusiveRunner::new(locks.clone(), clock.clone());
        Fixture {
            clock,
            locks,
            runner,
        }
    }

    fn scope() -> LockName {
        LockName::new("record:42").expect("valid name")
    }

    fn budget(clock: &Arc<MutableClock>) -> ExecutionBudget {
        ExecutionBudget::start(clock.clone(), Duration::from_secs(30), Duration::from_secs(5))
    }

    #[rstest]
    #[tokio::test]
    async fn body_runs_under_the_lock_and_releases_it(fixture: Fixture) {
        let locks = fixture.locks.clone();
        let result = fixture
            .runner
            .run(
                scope(),
                "update",
                Duration::from_secs(1),
                &budget(&fixture.clock),
                |section| async move {
                    assert!(locks.is_held(section.scope()));
                    Ok(MutationOutcome::Applied(7_u32))
                },
            )
            .await
            .expect("applied");

        assert_eq!(result, MutationOutcome::Applied(7));
        assert!(!fixture.locks.is_held(&scope()));
    }

    #[rstest]
    #[tokio::test]
    async fn failing_bodies_still_release(fixture: Fixture) {
        let error = fixture
            .runner
            .run(
                scope(),
                "update",
                Duration::from_secs(1),
                &budget(&fixture.clock),
                |_| async { Err::<MutationOutcome<()>, _>(Error::not_found("gone")) },
            )
            .await
            .expect_err("body failed");

        assert_eq!(error.code(), ErrorCode::NotFound);
        assert!(!fixture.locks.is_held(&scope()));
    }

    #[rstest]
    #[tokio::test]
    async fn held_scopes_report_contention(fixture: Fixture) {
        assert!(
            fixture
                .locks
                .try_acquire(&scope(), Duration::ZERO)
                .await
                .expect("acquire")
        );

        let outcome = fixture
            .runner
            .run(
                scope(),
                "update",
                Duration::from_millis(10),
                &budget(&fixture.clock),
                |_| async { Ok(MutationOutcome::Applied(())) },
            )
            .await
            .expect("contention is not an error");

        assert_eq!(
            outcome,
            MutationOutcome::Contended(Contention::LockBusy {
                scope: "record:42".to_owned()
            })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn exhausted_budgets_never_wait_for_the_lock(fixture: Fixture) {
        let budget = budget(&fixture.clock);
        fixture.clock.advance(Duration::from_secs(25));

        let error = fixture
            .runner
            .run(scope(), "update", Duration::from_secs(1), &budget, |_| async {
                Ok(MutationOutcome::Applied(()))
            })
            .await
            .expect_err("no budget left");

        assert_eq!(error.code(), ErrorCode::DeadlineExceeded);
        assert!(!fixture.locks.is_held(&scope()));
    }

    #[rstest]
    #[tokio::test]
    async fn commit_is_refused_once_the_budget_runs_out(fixture: Fixture) {
        let clock = fixture.clock.clone();
        let error = fixture
            .runner
            .run(
                scope(),
                "update",
                Duration::from_secs(1),
                &budget(&fixture.clock),
                |section| async move {
                    clock.advance(Duration::from_secs(26));
                    section.enter_commit()?;
                    Ok(MutationOutcome::Applied(()))
                },
            )
            .await
            .expect_err("commit refused");

        assert_eq!(error.code(), ErrorCode::DeadlineExceeded);
        assert!(!fixture.locks.is_held(&scope()));
    }

    #[rstest]
    #[tokio::test]
    async fn lock_service_failures_are_unavailable(fixture: Fixture) {
        let mut locks = MockNamedLock::new();
        locks
            .expect_try_acquire()
            .returning(|_, _| Err(LockServiceError::backend("connection refused")));
        let runner = ExclusiveRunner::new(Arc::new(locks), fixture.clock.clone());

        let error = runner
            .run(
                scope(),
                "update",
                Duration::from_secs(1),
                &budget(&fixture.clock),
                |_| async { Ok(MutationOutcome::Applied(())) },
            )
            .await
            .expect_err("lock service down");

        assert_eq!(error.code(), ErrorCode::Unavailable);
    }

    #[rstest]
    #[case(Phase::Requested, "REQUESTED")]
    #[case(Phase::LockWait, "LOCK_WAIT")]
    #[case(Phase::Holding, "HOLDING")]
    #[case(Phase::Committing, "COMMITTING")]
    #[case(Phase::Released, "RELEASED")]
    #[case(Phase::Rejected, "REJECTED")]
    fn phases_have_stable_labels(#[case] phase: Phase, #[case] label: &str) {
        assert_eq!(phase.as_str(), label);
    }
}
