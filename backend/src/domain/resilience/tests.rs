//! Tests for retry, backoff, budget and circuit breaker behaviour.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::domain::ErrorCode;
use crate::test_support::{MutableClock, NoJitter, RecordingSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
enum ProbeFailure {
    #[error("transient")]
    Transient,
    #[error("ambiguous")]
    Ambiguous,
    #[error("denied")]
    Denied,
    #[error("permanent")]
    Permanent,
}

impl RemoteFailure for ProbeFailure {
    fn class(&self) -> FailureClass {
        match self {
            Self::Transient => FailureClass::Transient,
            Self::Ambiguous => FailureClass::Ambiguous,
            Self::Denied => FailureClass::PermissionDenied,
            Self::Permanent => FailureClass::Permanent,
        }
    }
}

struct Harness {
    clock: Arc<MutableClock>,
    sleeper: Arc<RecordingSleeper>,
    executor: ResilientExecutor,
}

impl Harness {
    fn budget(&self, ceiling: Duration) -> ExecutionBudget {
        ExecutionBudget::start(self.clock.clone(), ceiling, Duration::ZERO)
    }

    async fn run_script(
        &self,
        options: &ExecuteOptions,
        script: &[Result<u32, ProbeFailure>],
        calls: &AtomicU32,
    ) -> Result<u32, ExecutionError<ProbeFailure>> {
        let budget = self.budget(Duration::from_secs(60));
        self.executor
            .execute(options, &budget, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                let index = usize::try_from(attempt - 1).expect("attempt fits usize");
                let outcome = script
                    .get(index)
                    .copied()
                    .unwrap_or(Err(ProbeFailure::Transient));
                async move { outcome }
            })
            .await
    }
}

fn harness_with(config: CircuitBreakerConfig) -> Harness {
    let clock = Arc::new(MutableClock::default());
    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = ResilientExecutor::with_runtime(
        clock.clone(),
        ExecutorRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        },
        config,
    );
    Harness {
        clock,
        sleeper,
        executor,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(CircuitBreakerConfig {
        failure_threshold: 50,
        ..CircuitBreakerConfig::default()
    })
}

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(300),
        backoff_multiplier: 2.0,
    }
}

#[rstest]
#[case(1, Duration::from_millis(100))]
#[case(2, Duration::from_millis(200))]
#[case(3, Duration::from_millis(300))]
#[case(12, Duration::from_millis(300))]
fn base_delay_grows_geometrically_until_capped(#[case] attempt: u32, #[case] expected: Duration) {
    assert_eq!(policy(5).base_delay_for(attempt), expected);
}

#[rstest]
#[tokio::test]
async fn retries_transient_failures_then_succeeds(harness: Harness) {
    let calls = AtomicU32::new(0);
    let options = ExecuteOptions::idempotent("sheets.read", policy(3));

    let result = harness
        .run_script(
            &options,
            &[
                Err(ProbeFailure::Transient),
                Err(ProbeFailure::Ambiguous),
                Ok(7),
            ],
            &calls,
        )
        .await;

    assert_eq!(result.expect("third attempt succeeds"), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        harness.sleeper.recorded(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[rstest]
#[tokio::test]
async fn gives_up_after_max_retries(harness: Harness) {
    let calls = AtomicU32::new(0);
    let options = ExecuteOptions::idempotent("sheets.read", policy(2));

    let error = harness
        .run_script(&options, &[], &calls)
        .await
        .expect_err("every attempt fails");

    assert!(matches!(
        error,
        ExecutionError::Exhausted {
            attempts: 3,
            failure: ProbeFailure::Transient,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(Error::from(error).code(), ErrorCode::Unavailable);
}

#[rstest]
#[case(ProbeFailure::Permanent, ErrorCode::InternalError)]
#[case(ProbeFailure::Denied, ErrorCode::Forbidden)]
#[tokio::test]
async fn non_retryable_failures_fail_immediately(
    harness: Harness,
    #[case] failure: ProbeFailure,
    #[case] code: ErrorCode,
) {
    let calls = AtomicU32::new(0);
    let options = ExecuteOptions::idempotent("sheets.write", policy(3));

    let error = harness
        .run_script(&options, &[Err(failure)], &calls)
        .await
        .expect_err("rejected");

    assert!(matches!(error, ExecutionError::Rejected { attempts: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.sleeper.recorded().is_empty());
    assert_eq!(Error::from(error).code(), code);
}

#[rstest]
#[tokio::test]
async fn ambiguous_failures_of_non_idempotent_calls_are_not_repeated(harness: Harness) {
    let calls = AtomicU32::new(0);
    let options = ExecuteOptions::non_idempotent("sheets.append", policy(3));

    let error = harness
        .run_script(&options, &[Err(ProbeFailure::Ambiguous), Ok(1)], &calls)
        .await
        .expect_err("ambiguous failure surfaces");

    assert!(matches!(error, ExecutionError::Exhausted { attempts: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn non_idempotent_calls_still_retry_failures_that_did_not_apply(harness: Harness) {
    let calls = AtomicU32::new(0);
    let options = ExecuteOptions::non_idempotent("sheets.append", policy(3));

    let result = harness
        .run_script(&options, &[Err(ProbeFailure::Transient), Ok(4)], &calls)
        .await;

    assert_eq!(result.expect("retried"), 4);
}

#[rstest]
#[tokio::test]
async fn retry_on_predicate_overrides_classification(harness: Harness) {
    let budget = harness.budget(Duration::from_secs(60));
    let options = ExecuteOptions::idempotent("auth", policy(3));
    let calls = AtomicU32::new(0);

    let error = harness
        .executor
        .execute_with(
            &options,
            &budget,
            |failure: &ProbeFailure| *failure != ProbeFailure::Ambiguous,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ProbeFailure::Ambiguous) }
            },
        )
        .await
        .expect_err("predicate rejects");

    assert!(matches!(error, ExecutionError::Rejected { attempts: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn stops_when_next_delay_exceeds_budget(harness: Harness) {
    let budget = harness.budget(Duration::from_millis(150));
    let options = ExecuteOptions::idempotent("sheets.read", policy(5));
    let clock = harness.clock.clone();

    let error = harness
        .executor
        .execute(&options, &budget, |_attempt| {
            clock.advance(Duration::from_millis(40));
            async { Err::<u32, _>(ProbeFailure::Transient) }
        })
        .await
        .expect_err("budget runs out");

    // 150ms ceiling: attempt 1 uses 40ms and sleeps 100ms (not advanced by
    // the recording sleeper), attempt 2 uses 40ms and 200ms no longer fits.
    assert!(matches!(
        error,
        ExecutionError::BudgetExhausted {
            attempts: 2,
            last_failure: Some(ProbeFailure::Transient),
            ..
        }
    ));
    assert_eq!(harness.sleeper.recorded(), vec![Duration::from_millis(100)]);
    assert_eq!(Error::from(error).code(), ErrorCode::DeadlineExceeded);
}

#[rstest]
#[tokio::test]
async fn exhausted_budget_prevents_the_first_attempt(harness: Harness) {
    let budget = harness.budget(Duration::from_millis(10));
    harness.clock.advance(Duration::from_millis(10));
    let calls = AtomicU32::new(0);

    let error = harness
        .executor
        .execute(
            &ExecuteOptions::idempotent("sheets.read", policy(1)),
            &budget,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, ProbeFailure>(1) }
            },
        )
        .await
        .expect_err("no time left");

    assert!(matches!(
        error,
        ExecutionError::BudgetExhausted {
            attempts: 0,
            last_failure: None,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn breaker_opens_sheds_and_recovers() {
    let harness = harness_with(CircuitBreakerConfig {
        failure_threshold: 5,
        monitor_window: Duration::from_secs(60),
        reset_timeout: Duration::from_secs(30),
        success_threshold: 2,
    });
    let options = ExecuteOptions::idempotent("sheets.read", policy(0));
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let result = harness
            .run_script(&options, &[Err(ProbeFailure::Transient)], &calls)
            .await;
        assert!(matches!(result, Err(ExecutionError::Exhausted { .. })));
    }
    assert_eq!(
        harness.executor.circuit_state("sheets.read"),
        CircuitState::Open
    );

    let shed = harness.run_script(&options, &[Ok(1)], &calls).await;
    assert!(matches!(shed, Err(ExecutionError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 5, "open circuit skips the call");
    assert_eq!(
        Error::from(shed.expect_err("open")).code(),
        ErrorCode::Degraded
    );

    harness.clock.advance(Duration::from_secs(31));
    let probe = harness.run_script(&options, &[Ok(2)], &calls).await;
    assert_eq!(probe.expect("probe admitted"), 2);
    assert_eq!(
        harness.executor.circuit_state("sheets.read"),
        CircuitState::HalfOpen
    );

    let second = harness.run_script(&options, &[Ok(3)], &calls).await;
    assert_eq!(second.expect("second probe admitted"), 3);
    assert_eq!(
        harness.executor.circuit_state("sheets.read"),
        CircuitState::Closed
    );
}

#[rstest]
#[tokio::test]
async fn permanent_failures_do_not_open_the_breaker() {
    let harness = harness_with(CircuitBreakerConfig {
        failure_threshold: 2,
        ..CircuitBreakerConfig::default()
    });
    let options = ExecuteOptions::idempotent("sheets.write", policy(0));
    let calls = AtomicU32::new(0);

    for _ in 0..4 {
        let result = harness
            .run_script(&options, &[Err(ProbeFailure::Permanent)], &calls)
            .await;
        assert!(matches!(result, Err(ExecutionError::Rejected { .. })));
    }

    assert_eq!(
        harness.executor.circuit_state("sheets.write"),
        CircuitState::Closed
    );
}

#[rstest]
#[tokio::test]
async fn breakers_are_isolated_per_name() {
    let harness = harness_with(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    });
    let calls = AtomicU32::new(0);

    let _ = harness
        .run_script(
            &ExecuteOptions::idempotent("auth", policy(0)),
            &[Err(ProbeFailure::Transient)],
            &calls,
        )
        .await;
    let other = harness
        .run_script(
            &ExecuteOptions::idempotent("sheets.read", policy(0)),
            &[Ok(9)],
            &calls,
        )
        .await;

    assert_eq!(harness.executor.circuit_state("auth"), CircuitState::Open);
    assert_eq!(other.expect("independent breaker"), 9);
}
