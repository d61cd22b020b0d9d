//! Retry, backoff and circuit breaking for remote calls.
//!
//! [`ResilientExecutor`] wraps every call the coordinators make to the sheet
//! store, the credential source and the epoch counter. It retries transient
//! failures with jittered exponential backoff, refuses to repeat ambiguous
//! failures of non-idempotent calls, sheds load through per-name circuit
//! breakers and never sleeps past the caller's [`ExecutionBudget`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;

mod circuit;
mod runtime;

use circuit::{Admission, CircuitBreaker, CircuitTransition};
pub use circuit::{CircuitBreakerConfig, CircuitState};
pub use runtime::{ExecutorRuntime, RandomJitter, TokioSleeper};

/// How a remote failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Temporary and known not to have taken effect.
    Transient,
    /// Temporary, but the call may have taken effect (timeouts, dropped
    /// connections after send).
    Ambiguous,
    /// Credentials were refused.
    PermissionDenied,
    /// Retrying cannot help.
    Permanent,
}

/// Classification contract for errors returned by remote calls.
pub trait RemoteFailure: std::error::Error + Send + Sync + 'static {
    /// Classify the failure.
    fn class(&self) -> FailureClass;

    /// Whether the failure is temporary and worth retrying.
    fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Transient | FailureClass::Ambiguous)
    }

    /// Whether the call may have been applied despite failing.
    fn is_ambiguous(&self) -> bool {
        self.class() == FailureClass::Ambiguous
    }
}

/// Async clock-independent sleeping abstraction for retries.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use formboard::domain::resilience::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct StepJitter;
    /// impl BackoffJitter for StepJitter {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<chrono::Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt) * 5)
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid time");
    /// let delay = StepJitter.jittered_delay(Duration::from_millis(100), 2, now);
    /// assert_eq!(delay, Duration::from_millis(110));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Backoff parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay, jitter included.
    pub max_delay: Duration,
    /// Growth factor applied per retry; values below 1 are treated as 1.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Unjittered delay before retry number `attempt` (1-based), capped at
    /// `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let scaled = self.base_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    /// Operation class; also selects the circuit breaker.
    pub name: String,
    /// Whether repeating the call after an ambiguous failure is safe.
    pub idempotent: bool,
    /// Backoff parameters.
    pub policy: RetryPolicy,
}

impl ExecuteOptions {
    /// Options for a call that may be repeated freely.
    pub fn idempotent(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            idempotent: true,
            policy,
        }
    }

    /// Options for a call that must not be repeated after an ambiguous
    /// failure.
    pub fn non_idempotent(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            idempotent: false,
            policy,
        }
    }
}

/// Why an executed call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The breaker for `name` is open; the call was not attempted.
    #[error("circuit for {name} is open")]
    CircuitOpen {
        /// Operation class.
        name: String,
    },
    /// The call failed with an error that must not be retried.
    #[error("{name} rejected after {attempts} attempt(s): {failure}")]
    Rejected {
        /// Operation class.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Final failure.
        failure: E,
    },
    /// Retries ran out, or the failure was ambiguous and the call is not
    /// idempotent.
    #[error("{name} failed after {attempts} attempt(s): {failure}")]
    Exhausted {
        /// Operation class.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Final failure.
        failure: E,
    },
    /// The next retry would not fit in the execution budget.
    #[error("{name} ran out of execution budget after {attempts} attempt(s)")]
    BudgetExhausted {
        /// Operation class.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Failure of the last attempt, if any ran.
        last_failure: Option<E>,
    },
}

impl<E> ExecutionError<E> {
    /// Operation class the error belongs to.
    pub fn name(&self) -> &str {
        match self {
            Self::CircuitOpen { name }
            | Self::Rejected { name, .. }
            | Self::Exhausted { name, .. }
            | Self::BudgetExhausted { name, .. } => name.as_str(),
        }
    }

    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { .. } => 0,
            Self::Rejected { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::BudgetExhausted { attempts, .. } => *attempts,
        }
    }

    /// Map the inner failure type.
    pub fn map_failure<F>(self, map: impl FnOnce(E) -> F) -> ExecutionError<F> {
        match self {
            Self::CircuitOpen { name } => ExecutionError::CircuitOpen { name },
            Self::Rejected {
                name,
                attempts,
                failure,
            } => ExecutionError::Rejected {
                name,
                attempts,
                failure: map(failure),
            },
            Self::Exhausted {
                name,
                attempts,
                failure,
            } => ExecutionError::Exhausted {
                name,
                attempts,
                failure: map(failure),
            },
            Self::BudgetExhausted {
                name,
                attempts,
                last_failure,
            } => ExecutionError::BudgetExhausted {
                name,
                attempts,
                last_failure: last_failure.map(map),
            },
        }
    }
}

impl<E: RemoteFailure> From<ExecutionError<E>> for Error {
    fn from(value: ExecutionError<E>) -> Self {
        let details = json!({ "operation": value.name(), "attempts": value.attempts() });
        let message = value.to_string();
        let error = match &value {
            ExecutionError::CircuitOpen { .. } => Self::degraded(message),
            ExecutionError::Rejected { failure, .. } => match failure.class() {
                FailureClass::PermissionDenied => Self::forbidden(message),
                _ => Self::internal(message),
            },
            ExecutionError::Exhausted { .. } => Self::unavailable(message),
            ExecutionError::BudgetExhausted { .. } => Self::deadline_exceeded(message),
        };
        error.with_details(details)
    }
}

/// Retrying executor with per-name circuit breakers.
pub struct ResilientExecutor {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl ResilientExecutor {
    /// Build an executor using Tokio sleeps and random jitter.
    pub fn new(clock: Arc<dyn Clock>, breaker_config: CircuitBreakerConfig) -> Self {
        Self::with_runtime(clock, ExecutorRuntime::default(), breaker_config)
    }

    /// Build an executor with injected runtime abstractions.
    pub fn with_runtime(
        clock: Arc<dyn Clock>,
        runtime: ExecutorRuntime,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            breaker_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation`, retrying failures the error classifies as retryable.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(
        &self,
        options: &ExecuteOptions,
        budget: &ExecutionBudget,
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: RemoteFailure,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(options, budget, |failure: &E| failure.is_retryable(), operation)
            .await
    }

    /// Run `operation`, retrying failures accepted by `retry_on`.
    ///
    /// Breaker accounting always follows [`RemoteFailure::is_retryable`]:
    /// only transient failures count towards opening the breaker.
    pub async fn execute_with<T, E, F, Fut, R>(
        &self,
        options: &ExecuteOptions,
        budget: &ExecutionBudget,
        retry_on: R,
        mut operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: RemoteFailure,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let name = options.name.as_str();
        let max_attempts = options.policy.max_retries.saturating_add(1);
        let mut last_failure: Option<E> = None;
        let mut attempt: u32 = 0;

        loop {
            if budget.is_exhausted() {
                return Err(ExecutionError::BudgetExhausted {
                    name: name.to_owned(),
                    attempts: attempt,
                    last_failure,
                });
            }
            attempt = attempt.saturating_add(1);

            if !self.admit(name) {
                debug!(operation = name, attempt, "circuit open; failing fast");
                return Err(ExecutionError::CircuitOpen {
                    name: name.to_owned(),
                });
            }

            let failure = match operation(attempt).await {
                Ok(value) => {
                    self.record(name, None);
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            let transient = failure.is_retryable();
            // A permanent answer still proves the dependency is reachable.
            self.record(name, transient.then(|| self.clock.utc()));

            if !retry_on(&failure) {
                return Err(ExecutionError::Rejected {
                    name: name.to_owned(),
                    attempts: attempt,
                    failure,
                });
            }
            if failure.is_ambiguous() && !options.idempotent {
                warn!(
                    operation = name,
                    attempt,
                    error = %failure,
                    "ambiguous failure of non-idempotent call; not retrying"
                );
                return Err(ExecutionError::Exhausted {
                    name: name.to_owned(),
                    attempts: attempt,
                    failure,
                });
            }
            if attempt >= max_attempts {
                warn!(operation = name, attempt, error = %failure, "retries exhausted");
                return Err(ExecutionError::Exhausted {
                    name: name.to_owned(),
                    attempts: attempt,
                    failure,
                });
            }

            let delay = self.retry_delay(&options.policy, attempt);
            if !budget.can_afford(delay) {
                warn!(
                    operation = name,
                    attempt,
                    delay_ms = millis(delay),
                    remaining_ms = millis(budget.remaining()),
                    "retry delay exceeds remaining budget"
                );
                return Err(ExecutionError::BudgetExhausted {
                    name: name.to_owned(),
                    attempts: attempt,
                    last_failure: Some(failure),
                });
            }

            debug!(
                operation = name,
                attempt,
                delay_ms = millis(delay),
                error = %failure,
                "retrying remote call"
            );
            last_failure = Some(failure);
            self.sleeper.sleep(delay).await;
        }
    }

    /// Current breaker state for `name`; unknown names are closed.
    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.lock_breakers()
            .get(name)
            .map_or(CircuitState::Closed, CircuitBreaker::state)
    }

    fn retry_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = policy.base_delay_for(attempt);
        self.jitter
            .jittered_delay(base, attempt, self.clock.utc())
            .min(policy.max_delay)
    }

    fn admit(&self, name: &str) -> bool {
        let now = self.clock.utc();
        let admission = {
            let mut breakers = self.lock_breakers();
            breakers
                .entry(name.to_owned())
                .or_insert_with(|| CircuitBreaker::new(self.breaker_config))
                .admit(now)
        };
        match admission {
            Admission::Allowed => true,
            Admission::Probe(transition) => {
                if let Some(transition) = transition {
                    log_transition(name, transition);
                }
                true
            }
            Admission::Denied => false,
        }
    }

    /// Record a call outcome; `failed_at` is set for transient failures.
    fn record(&self, name: &str, failed_at: Option<DateTime<Utc>>) {
        let transition = {
            let mut breakers = self.lock_breakers();
            let breaker = breakers
                .entry(name.to_owned())
                .or_insert_with(|| CircuitBreaker::new(self.breaker_config));
            match failed_at {
                Some(now) => breaker.record_failure(now),
                None => breaker.record_success(),
            }
        };
        if let Some(transition) = transition {
            log_transition(name, transition);
        }
    }

    fn lock_breakers(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        // Breaker state is plain counters; a panicked holder cannot leave it
        // structurally invalid.
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whole milliseconds in `duration`, saturating, for log fields.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn log_transition(name: &str, transition: CircuitTransition) {
    if transition.to == CircuitState::Open {
        warn!(
            operation = name,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "circuit breaker opened"
        );
    } else {
        info!(
            operation = name,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "circuit breaker transition"
        );
    }
}

#[cfg(test)]
mod tests;
